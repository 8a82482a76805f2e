//! Patch coverage measurement
//!
//! Coverage is restricted to the lines a patch adds or keeps as context:
//! for every supported source file in the patch, those lines are looked up
//! in the coverage report, and only executable lines count towards the total.

pub mod patch;
pub mod report;

use crate::error::EvalResult;
use crate::util::percentage;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use patch::{patch_lines, split_file_sections, FileSection};
pub use report::{BranchCount, CoverageIndex, CoverageSource, FileHits};

/// Artifact written into the instance directory
pub const RESULT_FILE: &str = "patch_coverage_result.json";

const SUPPORTED_EXTENSIONS: [&str; 3] = [".py", ".ts", ".js"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageCount {
    pub covered: u64,
    pub total: u64,
    pub percentage: f64,
}

impl CoverageCount {
    fn new(covered: u64, total: u64) -> Self {
        Self {
            covered,
            total,
            percentage: percentage(covered, total),
        }
    }

    fn add(&mut self, other: &CoverageCount) {
        *self = Self::new(self.covered + other.covered, self.total + other.total);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overall {
    pub line_coverage: CoverageCount,
    pub branch_coverage: CoverageCount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub line_coverage: CoverageCount,
    pub branch_coverage: CoverageCount,
    pub uncovered_lines: Vec<u32>,
    /// Lines where some branch outcomes were never taken
    pub partial_branches: BTreeMap<u32, BranchCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchCoverage {
    pub overall: Overall,
    pub files: IndexMap<String, FileReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PatchCoverage {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Overall line coverage as a fraction
    pub fn score(&self) -> f64 {
        self.overall.line_coverage.percentage / 100.0
    }
}

/// Source files whose coverage counts: no docs, only supported extensions.
pub fn is_tracked_file(path: &str) -> bool {
    !path.starts_with("docs/")
        && !path.ends_with(".md")
        && SUPPORTED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Coverage of `lines` in one file; `None` when the report lacks the file.
pub fn file_report(source: &dyn CoverageSource, path: &str, lines: &[u32]) -> Option<FileReport> {
    let hits = source.file_hits(path)?;

    let mut unique = lines.to_vec();
    unique.sort_unstable();
    unique.dedup();

    let mut covered = 0;
    let mut total = 0;
    let mut uncovered_lines = Vec::new();
    let mut branch = BranchCount::default();
    let mut partial_branches = BTreeMap::new();

    for line in unique {
        if let Some(ran) = hits.lines.get(&line) {
            total += 1;
            if *ran {
                covered += 1;
            } else {
                uncovered_lines.push(line);
            }
        }
        if let Some(outcomes) = hits.branches.get(&line) {
            branch.total += outcomes.total;
            branch.covered += outcomes.covered;
            if outcomes.covered < outcomes.total {
                partial_branches.insert(line, *outcomes);
            }
        }
    }

    Some(FileReport {
        line_coverage: CoverageCount::new(covered, total),
        branch_coverage: CoverageCount::new(branch.covered, branch.total),
        uncovered_lines,
        partial_branches,
    })
}

/// Measure a patch against a coverage source.
pub fn measure_patch(patch: &str, source: &dyn CoverageSource) -> PatchCoverage {
    let touched = patch_lines(patch);
    if touched.is_empty() {
        return PatchCoverage::failed("No related files found in patch");
    }

    let mut result = PatchCoverage::default();
    for (path, lines) in touched {
        if !is_tracked_file(&path) {
            continue;
        }
        let Some(report) = file_report(source, &path, &lines) else {
            continue;
        };
        result.overall.line_coverage.add(&report.line_coverage);
        result.overall.branch_coverage.add(&report.branch_coverage);
        result.files.insert(path, report);
    }

    if result.overall.line_coverage.total == 0 {
        result.error = Some("No trackable lines in patch".to_string());
    }
    result
}

/// Measure `<dir>/code.patch` against the reports under `<dir>/coverage`.
pub fn calculate_patch_coverage(instance_dir: &Path) -> PatchCoverage {
    let patch_file = instance_dir.join("code.patch");
    let coverage_dir = instance_dir.join("coverage");

    if !patch_file.exists() {
        return PatchCoverage::failed(format!("Patch file not found: {}", patch_file.display()));
    }
    if !coverage_dir.exists() {
        return PatchCoverage::failed(format!(
            "Coverage directory not found: {}",
            coverage_dir.display()
        ));
    }

    let patch = match std::fs::read_to_string(&patch_file) {
        Ok(patch) => patch,
        Err(e) => return PatchCoverage::failed(format!("Failed to read patch file: {}", e)),
    };
    let index = match CoverageIndex::load(&coverage_dir) {
        Ok(index) => index,
        Err(e) => return PatchCoverage::failed(format!("Failed to read coverage reports: {}", e)),
    };

    measure_patch(&patch, &index)
}

/// Write `result` as `patch_coverage_result.json`.
pub fn write_result(instance_dir: &Path, result: &PatchCoverage) -> EvalResult<PathBuf> {
    let path = instance_dir.join(RESULT_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(result)?)?;
    Ok(path)
}

/// Measure, write `patch_coverage_result.json`, return the score.
pub fn write_patch_coverage(instance_dir: &Path) -> f64 {
    let result = calculate_patch_coverage(instance_dir);
    if let Some(error) = &result.error {
        warn!("Patch coverage for {}: {}", instance_dir.display(), error);
    }
    if let Err(e) = write_result(instance_dir, &result) {
        warn!("Failed to write coverage result: {}", e);
    }

    let score = result.score();
    info!(
        "Patch line coverage {}% ({} / {})",
        result.overall.line_coverage.percentage,
        result.overall.line_coverage.covered,
        result.overall.line_coverage.total
    );
    score
}
