//! Result aggregation and export
//!
//! Every dispatched item gets exactly one record: its score is read back
//! from the result artifact of its track, and a missing or unreadable
//! artifact scores 0 with the failure kept in `result_details`.

use crate::dataset::{Dimension, WorkItem};
use crate::error::EvalResult;
use crate::track::Track;
use crate::util::round2;
use comfy_table::Table;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const RAW_DATA_FILE: &str = "raw_data.jsonl";
pub const REPORT_FILE: &str = "result.json";

/// Sources graded by an external harness into `report.json`
const OPEN_SOURCE: [&str; 4] = [
    "swe-bench-live",
    "swe-bench-multilingual",
    "swe-bench-verified",
    "swe-Rebench",
];

/// One line of `raw_data.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub instance_id: String,
    pub repo_key: String,
    pub source: String,
    pub programming_languages: String,
    pub programming_scenarios: String,
    pub task_types: String,
    pub score: f64,
    pub result_details: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub count: usize,
    pub average_score: f64,
}

/// Contents of the run's `result.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub overall: ScoreStats,
    pub programming_languages: BTreeMap<String, ScoreStats>,
    pub programming_scenarios: BTreeMap<String, ScoreStats>,
    pub task_types: BTreeMap<String, ScoreStats>,
}

#[derive(Default)]
struct Tally {
    count: usize,
    sum: f64,
}

impl Tally {
    fn add(&mut self, score: f64) {
        self.count += 1;
        self.sum += score;
    }

    fn stats(&self) -> ScoreStats {
        ScoreStats {
            count: self.count,
            average_score: if self.count > 0 {
                round2(self.sum / self.count as f64)
            } else {
                0.0
            },
        }
    }
}

impl RunReport {
    pub fn from_records(records: &[AggregateRecord]) -> Self {
        let mut overall = Tally::default();
        let mut dims: [BTreeMap<String, Tally>; 3] = Default::default();

        for record in records {
            overall.add(record.score);
            let keys = [
                &record.programming_languages,
                &record.programming_scenarios,
                &record.task_types,
            ];
            for (tallies, key) in dims.iter_mut().zip(keys) {
                tallies.entry(key.clone()).or_default().add(record.score);
            }
        }

        let [languages, scenarios, task_types] = dims.map(|tallies| {
            tallies
                .into_iter()
                .map(|(k, t)| (k, t.stats()))
                .collect::<BTreeMap<_, _>>()
        });
        Self {
            overall: overall.stats(),
            programming_languages: languages,
            programming_scenarios: scenarios,
            task_types,
        }
    }

    pub fn dimension(&self, dim: Dimension) -> &BTreeMap<String, ScoreStats> {
        match dim {
            Dimension::Language => &self.programming_languages,
            Dimension::Scenario => &self.programming_scenarios,
            Dimension::TaskType => &self.task_types,
        }
    }

    /// Overall and per-dimension averages as a printable table
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec!["Dimension", "Value", "Count", "Average score"]);
        table.add_row(vec![
            "overall".to_string(),
            "-".to_string(),
            self.overall.count.to_string(),
            format!("{:.2}", self.overall.average_score),
        ]);
        for dim in Dimension::ALL {
            for (value, stats) in self.dimension(dim) {
                table.add_row(vec![
                    dim.field_name().to_string(),
                    value.clone(),
                    stats.count.to_string(),
                    format!("{:.2}", stats.average_score),
                ]);
            }
        }
        table
    }
}

fn read_json(path: &Path) -> Result<Value, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

fn not_found(path: &Path) -> (f64, Value) {
    (
        0.0,
        json!({"error": "File not found", "path": path.display().to_string()}),
    )
}

/// Read one artifact and score it; `(0, {"error": ...})` when it can't be read.
fn score_artifact(path: &Path, required: bool, score: impl Fn(&Value) -> f64) -> (f64, Value) {
    if required && !path.exists() {
        return not_found(path);
    }
    match read_json(path) {
        Ok(details) => (score(&details), details),
        Err(e) => {
            error!("Error reading result {}: {}", path.display(), e);
            (0.0, json!({ "error": e }))
        }
    }
}

/// 1 when both test sets held and the run produced output
fn standard_score(result: &Value) -> f64 {
    let flag = |key: &str| result.get(key).and_then(Value::as_bool).unwrap_or(false);
    let run_state = result
        .get("run_state")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if run_state && flag("PASS_TO_PASS_result") && flag("FAIL_TO_PASS_result") {
        1.0
    } else {
        0.0
    }
}

fn coverage_score(result: &Value) -> f64 {
    result
        .pointer("/overall/line_coverage/percentage")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        / 100.0
}

fn understanding_score(result: &Value) -> f64 {
    result
        .get("average_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Score of one item read back from the work directory
pub fn score_item(work_dir: &Path, item: &WorkItem) -> (f64, Value) {
    let dir = work_dir.join(&item.source).join(&item.instance_id);
    let id = item.instance_id.as_str();

    if OPEN_SOURCE.contains(&item.source.as_str()) {
        return score_artifact(&dir.join("report.json"), false, |report| {
            let resolved = report
                .get(id)
                .and_then(|r| r.get("resolved"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if resolved {
                1.0
            } else {
                0.0
            }
        });
    }

    match Track::from_source(&item.source) {
        Some(track @ Track::Coverage) => {
            score_artifact(&dir.join(track.artifact(id)), true, coverage_score)
        }
        Some(track @ Track::Understanding) => {
            score_artifact(&dir.join(track.artifact(id)), true, understanding_score)
        }
        _ => score_artifact(&dir.join(crate::track::RESULT_FILE), true, standard_score),
    }
}

pub struct Aggregator {
    work_dir: PathBuf,
    result_dir: PathBuf,
}

impl Aggregator {
    pub fn new(work_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            result_dir: result_dir.into(),
        }
    }

    /// One record per item, in dataset order
    pub fn collect(&self, items: &[WorkItem]) -> Vec<AggregateRecord> {
        items
            .iter()
            .map(|item| {
                let (score, result_details) = score_item(&self.work_dir, item);
                AggregateRecord {
                    instance_id: item.instance_id.clone(),
                    repo_key: item.repo_key.clone(),
                    source: item.source.clone(),
                    programming_languages: item.dimension(Dimension::Language).to_string(),
                    programming_scenarios: item.dimension(Dimension::Scenario).to_string(),
                    task_types: item.dimension(Dimension::TaskType).to_string(),
                    score,
                    result_details,
                }
            })
            .collect()
    }

    pub fn write_raw(&self, records: &[AggregateRecord]) -> EvalResult<PathBuf> {
        std::fs::create_dir_all(&self.result_dir)?;
        let path = self.result_dir.join(RAW_DATA_FILE);
        let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        for record in records {
            serde_json::to_writer(&mut file, record)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        info!("Raw results saved to {}", path.display());
        Ok(path)
    }

    pub fn write_report(&self, report: &RunReport) -> EvalResult<PathBuf> {
        std::fs::create_dir_all(&self.result_dir)?;
        let path = self.result_dir.join(REPORT_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
        info!("Statistical report saved to {}", path.display());
        Ok(path)
    }

    /// Collect, write both outputs and return the report.
    pub fn run(&self, items: &[WorkItem]) -> EvalResult<RunReport> {
        info!("Starting result summarization for {} items", items.len());
        let records = self.collect(items);
        self.write_raw(&records)?;
        let report = RunReport::from_records(&records);
        self.write_report(&report)?;
        info!(
            "Summary complete. Overall average score: {:.4}",
            report.overall.average_score
        );
        Ok(report)
    }
}
