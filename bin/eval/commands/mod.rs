//! CLI subcommands

pub mod parse_log;
pub mod run;
pub mod summarize;

use anyhow::{Context, Result};
use clap::Args;
use patch_eval::{load_work_items, DatasetFilters, RunConfig, WorkItem};
use std::path::PathBuf;

/// Dataset, predictions and the three dimension filters
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Dataset file (JSONL, one instance per line)
    #[arg(long)]
    pub dataset_path: PathBuf,

    /// Predictions file (JSON object keyed by instance id)
    #[arg(long)]
    pub predictions_path: PathBuf,

    /// Programming languages to keep (comma-separated or ALL)
    #[arg(long, default_value = "ALL")]
    pub programming_languages: String,

    /// Programming scenarios to keep (comma-separated or ALL)
    #[arg(long, default_value = "ALL")]
    pub programming_scenarios: String,

    /// Task types to keep (comma-separated or ALL)
    #[arg(long, default_value = "ALL")]
    pub task_types: String,
}

impl DatasetArgs {
    pub fn load(&self) -> Result<Vec<WorkItem>> {
        let filters = DatasetFilters::new(
            &self.programming_languages,
            &self.programming_scenarios,
            &self.task_types,
        );
        let (items, _) = load_work_items(&self.dataset_path, &self.predictions_path, &filters)
            .with_context(|| {
                format!(
                    "Failed to load {} with {}",
                    self.dataset_path.display(),
                    self.predictions_path.display()
                )
            })?;
        Ok(items)
    }
}

/// Where run outputs live
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// TOML file overlaying the default run configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Unique identifier of the run (default: local timestamp)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Root directory for work, tmp and results
    #[arg(long)]
    pub output_root: Option<PathBuf>,
}

impl OutputArgs {
    /// Defaults, then the config file, then flags.
    pub fn config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_toml_path(path)
                .with_context(|| format!("Invalid config file {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(run_id) = &self.run_id {
            config.run_id = run_id.clone();
        }
        if let Some(root) = &self.output_root {
            config.output_root = root.clone();
        }
        Ok(config)
    }
}
