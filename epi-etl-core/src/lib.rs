#![doc = "epi-etl-core: read, clean, persist and re-run tabular epidemiological data."]

//! Pipeline building blocks shared by the `epi-etl` CLI and any dashboard or
//! report front end:
//!
//! - [`read`]: CSV/JSON files and HTTP(S) JSON endpoints into a [`table::RawTable`]
//! - [`transform`]: normalization, typing, missing values, deduplication
//! - [`write`]: atomic CSV persistence
//! - [`pipeline`]: the orchestrator tying the three together
//! - [`trigger`] and [`watch`]: re-running the pipeline on file changes
//! - [`view`] and [`report`]: filtered views and PDF summaries
//!
//! Side-effecting collaborators sit behind the traits in [`contract`].

pub mod contract;
pub mod error;
pub mod pipeline;
pub mod read;
pub mod report;
pub mod table;
pub mod transform;
pub mod trigger;
pub mod view;
pub mod watch;
pub mod write;

pub use contract::{RunReport, RunRequest};
pub use error::{RunError, Stage};
pub use pipeline::{Pipeline, PipelineConfig};
pub use table::{CanonicalTable, ColumnKind, RawTable, Value};
pub use trigger::{ChangeTrigger, WatchConfig};
