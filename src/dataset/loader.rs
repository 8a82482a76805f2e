//! Dataset and predictions loading with dimension filters

use super::types::{Dimension, Prediction, WorkItem};
use crate::error::{EvalError, EvalResult};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Allow-list for one dimension; `None` accepts everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetFilter {
    allowed: Option<HashSet<String>>,
}

impl DatasetFilter {
    /// Parse `"ALL"` (any case), empty, or a comma-separated allow-list.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.is_empty() || spec.eq_ignore_ascii_case("ALL") {
            return Self::default();
        }
        Self {
            allowed: Some(spec.split(',').map(|s| s.trim().to_string()).collect()),
        }
    }

    pub fn accepts(&self, value: &str) -> bool {
        match &self.allowed {
            Some(set) => set.contains(value),
            None => true,
        }
    }
}

/// Filters for the three reporting dimensions
#[derive(Debug, Clone, Default)]
pub struct DatasetFilters {
    pub languages: DatasetFilter,
    pub scenarios: DatasetFilter,
    pub task_types: DatasetFilter,
}

impl DatasetFilters {
    pub fn new(languages: &str, scenarios: &str, task_types: &str) -> Self {
        Self {
            languages: DatasetFilter::parse(languages),
            scenarios: DatasetFilter::parse(scenarios),
            task_types: DatasetFilter::parse(task_types),
        }
    }

    pub fn accepts(&self, item: &WorkItem) -> bool {
        self.languages.accepts(item.dimension(Dimension::Language))
            && self.scenarios.accepts(item.dimension(Dimension::Scenario))
            && self.task_types.accepts(item.dimension(Dimension::TaskType))
    }
}

/// Statistics gathered while loading
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Rows that passed the filters
    pub total_filtered: usize,
    /// Rows kept (filtered and with a prediction)
    pub loaded: usize,
    pub missing_predictions: Vec<String>,
    pub breakdown: BTreeMap<&'static str, BTreeMap<String, usize>>,
}

impl LoadReport {
    fn log(&self) {
        if self.total_filtered == 0 {
            warn!("No data passed the filtering criteria.");
            return;
        }
        let pct = |n: usize| n as f64 / self.total_filtered as f64 * 100.0;
        info!(
            "Items after filter criteria: {} (loaded {} / {:.1}%, missing predictions {} / {:.1}%)",
            self.total_filtered,
            self.loaded,
            pct(self.loaded),
            self.missing_predictions.len(),
            pct(self.missing_predictions.len())
        );

        if !self.missing_predictions.is_empty() {
            let preview: Vec<&str> = self
                .missing_predictions
                .iter()
                .take(10)
                .map(String::as_str)
                .collect();
            warn!(
                "Excluded instances without predictions (first {} of {}): {}",
                preview.len(),
                self.missing_predictions.len(),
                preview.join(", ")
            );
        }

        if self.loaded == 0 {
            warn!("No valid predictions found. Cannot proceed.");
            return;
        }

        for (field, counts) in &self.breakdown {
            for (key, count) in counts {
                info!(
                    "  [{}] {:.<30} {:>4} ({:>5.1}%)",
                    field,
                    key,
                    count,
                    *count as f64 / self.loaded as f64 * 100.0
                );
            }
        }
    }
}

/// Predictions file: `{instance_id: {model_patch, model_name_or_path?}}`
pub fn load_predictions(path: &Path) -> EvalResult<IndexMap<String, Prediction>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EvalError::MissingInput(format!("predictions file {}: {}", path.display(), e))
    })?;
    let predictions: IndexMap<String, Prediction> = serde_json::from_str(&content)?;
    info!(
        "Loaded {} predictions from {}",
        predictions.len(),
        path.display()
    );
    Ok(predictions)
}

/// Parse dataset JSONL, one item per non-blank line
pub fn load_dataset(path: &Path) -> EvalResult<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EvalError::MissingInput(format!("dataset {}: {}", path.display(), e)))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<WorkItem>(line).map_err(|e| {
                EvalError::Serialization(format!("{} line {}: {}", path.display(), idx + 1, e))
            })
        })
        .collect()
}

/// Load the dataset, apply filters and merge predictions.
///
/// Only rows that pass every filter and have a prediction are returned.
pub fn load_work_items(
    dataset_path: &Path,
    predictions_path: &Path,
    filters: &DatasetFilters,
) -> EvalResult<(Vec<WorkItem>, LoadReport)> {
    let predictions = load_predictions(predictions_path)?;
    let rows = load_dataset(dataset_path)?;

    let mut report = LoadReport::default();
    let mut items = Vec::new();

    for mut item in rows.into_iter().filter(|item| filters.accepts(item)) {
        report.total_filtered += 1;

        let Some(prediction) = predictions.get(&item.instance_id) else {
            report.missing_predictions.push(item.instance_id);
            continue;
        };

        item.model_patch = prediction.model_patch.clone();
        if prediction.model_name_or_path.is_some() {
            item.model_name_or_path = prediction.model_name_or_path.clone();
        }

        for dim in Dimension::ALL {
            *report
                .breakdown
                .entry(dim.field_name())
                .or_default()
                .entry(item.dimension(dim).to_string())
                .or_default() += 1;
        }
        items.push(item);
    }

    report.loaded = items.len();
    report.log();
    Ok((items, report))
}
