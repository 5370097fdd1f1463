//! `load_config`: reads the YAML configuration file into [`CliConfig`].
//!
//! Every section and key is optional; anything absent takes the documented
//! default, so an empty file and no file at all configure the same pipeline.
//!
//! ```yaml
//! pipeline:
//!   default_input: data/worldometer_data.csv
//!   default_output: data/etl_output.csv
//!   fetch_timeout_secs: 30
//!   categorical_ratio: 0.05
//! watch:
//!   directory: data
//!   suffixes: [".csv"]
//!   output_dir: data/cleaned
//!   output_prefix: cleaned_
//!   poll_interval_ms: 1000
//! report:
//!   output_dir: reports
//! ```
//!
//! # Errors
//! All errors use `anyhow::Error` and are surfaced at the CLI boundary.

use anyhow::Result;
use epi_etl_core::{PipelineConfig, WatchConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Environment variable naming the config file when `--config` is not given.
pub const CONFIG_ENV: &str = "EPI_ETL_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub pipeline: PipelineConfig,
    pub watch: WatchConfig,
    pub report: ReportSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub output_dir: PathBuf,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
        }
    }
}

/// Loads a YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    if config_content.trim().is_empty() {
        info!(config_path = ?path_ref, "Config file is empty, using defaults");
        return Ok(CliConfig::default());
    }

    match serde_yaml::from_str::<CliConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Resolves the effective configuration: `--config` first, then
/// `EPI_ETL_CONFIG`, otherwise built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<CliConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => {
            info!(env = CONFIG_ENV, "Using config file from environment");
            load_config(PathBuf::from(path))
        }
        _ => {
            info!("No config file given, using defaults");
            Ok(CliConfig::default())
        }
    }
}
