//! CLI interface for epi-etl: argument parsing and dispatch to `epi-etl-core`.
//!
//! All pipeline logic lives in `epi-etl-core`; this module resolves
//! configuration, builds the pipeline and reports outcomes.
//!
//! - `run`: one ETL run, the configured defaults or an explicit input/output pair
//! - `batch`: every CSV file of a directory into `cleaned_<stem>.csv`
//! - `watch`: re-run on file changes until Ctrl-C
//! - `report`: extract, filter and render a PDF summary
//!
//! For programmatic and integration use, call [`run`] with a constructed [`Cli`].

use crate::load_config::{resolve_config, CliConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use epi_etl_core::contract::RunRequest;
use epi_etl_core::report::write_report;
use epi_etl_core::trigger::ChangeTrigger;
use epi_etl_core::view::{self, Filter};
use epi_etl_core::watch::PollingWatcher;
use epi_etl_core::Pipeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// CLI for epi-etl: clean tabular epidemiological data into a canonical CSV.
#[derive(Parser)]
#[clap(
    name = "epi-etl",
    version,
    about = "Extract, clean and persist epidemiological datasets; re-run on file changes"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline once (configured defaults unless --input/--output are given)
    Run {
        /// Path to the YAML config file (falls back to $EPI_ETL_CONFIG)
        #[clap(long)]
        config: Option<PathBuf>,
        /// Source locator: a .csv/.json path or an http(s) URL
        #[clap(long)]
        input: Option<String>,
        /// Destination CSV path
        #[clap(long)]
        output: Option<PathBuf>,
        /// Print the run report as JSON
        #[clap(long)]
        json: bool,
    },
    /// Run the pipeline for every CSV file in a directory
    Batch {
        #[clap(long)]
        config: Option<PathBuf>,
        #[clap(long)]
        input_dir: PathBuf,
        #[clap(long)]
        output_dir: PathBuf,
    },
    /// Watch the configured directory and re-run on changes until Ctrl-C
    Watch {
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Write a PDF summary of a (filtered) source
    Report {
        #[clap(long)]
        config: Option<PathBuf>,
        /// Source locator: a .csv/.json path or an http(s) URL
        #[clap(long)]
        input: String,
        /// Directory the report is written to (default from config)
        #[clap(long)]
        reports_dir: Option<PathBuf>,
        /// Keep rows whose column equals one of the values: `column=v1|v2`
        #[clap(long = "filter")]
        filters: Vec<String>,
        /// Keep rows whose numeric or timestamp column is within bounds: `column=min..max`
        #[clap(long = "range")]
        ranges: Vec<String>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run {
            config,
            input,
            output,
            json,
        } => {
            let config = resolve_config(config.as_deref())?;
            run_once(config, input, output, json).await
        }
        Commands::Batch {
            config,
            input_dir,
            output_dir,
        } => {
            let config = resolve_config(config.as_deref())?;
            run_batch(config, &input_dir, &output_dir).await
        }
        Commands::Watch { config } => {
            let config = resolve_config(config.as_deref())?;
            run_watch(config).await
        }
        Commands::Report {
            config,
            input,
            reports_dir,
            filters,
            ranges,
        } => {
            let config = resolve_config(config.as_deref())?;
            let reports_dir = reports_dir.unwrap_or_else(|| config.report.output_dir.clone());
            run_report(config, &input, &reports_dir, &filters, &ranges).await
        }
    }
}

async fn run_once(
    config: CliConfig,
    input: Option<String>,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let request = RunRequest::new(
        input.unwrap_or_else(|| config.pipeline.default_input.clone()),
        output.unwrap_or_else(|| config.pipeline.default_output.clone()),
    );
    tracing::info!(command = "run", input = %request.input, output = %request.output.display(), "Starting ETL run");

    let pipeline = Pipeline::new(config.pipeline)?;
    let report = pipeline.run(request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "ETL completed: {} rows ({} duplicates removed) written to {}",
            report.rows_written,
            report.duplicates_removed,
            report.output.display()
        );
    }
    Ok(())
}

async fn run_batch(config: CliConfig, input_dir: &Path, output_dir: &Path) -> Result<()> {
    tracing::info!(command = "batch", input_dir = %input_dir.display(), output_dir = %output_dir.display(), "Starting batch run");
    let pipeline = Pipeline::new(config.pipeline)?;
    let outcomes = pipeline.run_directory(input_dir, output_dir).await?;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "{} -> {} ({} rows)",
                outcome.input.display(),
                outcome.output.display(),
                report.rows_written
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{} failed: {e}", outcome.input.display());
            }
        }
    }
    println!("Processed {} file(s), {} failed", outcomes.len(), failed);

    if failed > 0 {
        anyhow::bail!("{failed} of {} file(s) failed", outcomes.len());
    }
    Ok(())
}

async fn run_watch(config: CliConfig) -> Result<()> {
    let watch = config.watch.clone();
    std::fs::create_dir_all(&watch.directory)
        .with_context(|| format!("Failed to create watch directory {:?}", watch.directory))?;

    let canonical_input = PathBuf::from(&config.pipeline.default_input);
    let canonical_output = config.pipeline.default_output.clone();
    let pipeline = Arc::new(Pipeline::new(config.pipeline)?);
    let trigger = ChangeTrigger::new(pipeline, watch.clone())
        .with_canonical(canonical_input, canonical_output);

    let stopper = trigger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(command = "watch", "Interrupt received, stopping watcher");
            stopper.shutdown();
        }
    });

    println!(
        "Watching {} for changes (Ctrl-C to stop)...",
        watch.directory.display()
    );
    let watcher = PollingWatcher::new(watch.poll_interval());
    let summary = trigger.watch(&watcher).await?;
    tracing::info!(command = "watch", ?summary, "Watcher stopped");
    println!(
        "Watcher stopped: {} run(s), {} succeeded, {} failed, {} coalesced",
        summary.started, summary.succeeded, summary.failed, summary.coalesced
    );
    Ok(())
}

async fn run_report(
    config: CliConfig,
    input: &str,
    reports_dir: &Path,
    filters: &[String],
    ranges: &[String],
) -> Result<()> {
    tracing::info!(command = "report", input, "Building report");
    let pipeline = Pipeline::new(config.pipeline)?;
    let table = pipeline.extract(input).await?;

    let mut parsed = Vec::with_capacity(filters.len() + ranges.len());
    for expr in filters {
        parsed.push(Filter::parse_one_of(expr)?);
    }
    for expr in ranges {
        parsed.push(Filter::parse_range(expr, &table)?);
    }
    let filtered = view::apply(&table, &parsed)?;

    for (column, total) in view::totals(&filtered) {
        println!("Total {column}: {total:.2}");
    }
    let path = write_report(&filtered, reports_dir, chrono::Local::now().naive_local())?;
    println!("Report written to {}", path.display());
    Ok(())
}
