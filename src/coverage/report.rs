//! Coverage report readers
//!
//! Two JSON formats are understood: coverage.py's `coverage.json`
//! (`--cov-report=json`) and istanbul's `coverage-final.json` (c8
//! `--reporter=json`). Both are folded into per-line hit maps.

use crate::error::EvalResult;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Branch outcomes recorded on one source line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCount {
    pub covered: u64,
    pub total: u64,
}

/// Line and branch hits for one source file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHits {
    /// Executable line to whether it ran
    pub lines: BTreeMap<u32, bool>,
    pub branches: BTreeMap<u32, BranchCount>,
}

/// Line/branch coverage for a source file, looked up by repository path
pub trait CoverageSource {
    fn file_hits(&self, path: &str) -> Option<&FileHits>;
}

/// All coverage reports found under one directory
#[derive(Debug, Default)]
pub struct CoverageIndex {
    files: IndexMap<String, FileHits>,
}

impl CoverageIndex {
    /// Walk `dir` and load every `coverage.json` and `coverage-final.json`.
    pub fn load(dir: &Path) -> EvalResult<Self> {
        let mut index = Self::default();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let parse: fn(&str) -> EvalResult<Vec<(String, FileHits)>> = match name.as_ref() {
                "coverage.json" => parse_coverage_py,
                "coverage-final.json" => parse_istanbul,
                _ => continue,
            };

            let content = std::fs::read_to_string(entry.path())?;
            match parse(&content) {
                Ok(files) => {
                    debug!(
                        "Loaded {} files from {}",
                        files.len(),
                        entry.path().display()
                    );
                    index.files.extend(files);
                }
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
        Ok(index)
    }

    pub fn insert(&mut self, path: impl Into<String>, hits: FileHits) {
        self.files.insert(path.into(), hits);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl CoverageSource for CoverageIndex {
    /// Exact key first, then a key ending in `/<path>` (absolute report paths).
    fn file_hits(&self, path: &str) -> Option<&FileHits> {
        let path = path.trim_start_matches("./");
        if let Some(hits) = self.files.get(path) {
            return Some(hits);
        }
        let suffix = format!("/{}", path);
        self.files
            .iter()
            .find(|(key, _)| key.ends_with(&suffix))
            .map(|(_, hits)| hits)
    }
}

#[derive(Deserialize)]
struct CoveragePyReport {
    #[serde(default)]
    files: HashMap<String, CoveragePyFile>,
}

#[derive(Deserialize)]
struct CoveragePyFile {
    #[serde(default)]
    executed_lines: Vec<u32>,
    #[serde(default)]
    missing_lines: Vec<u32>,
    #[serde(default)]
    executed_branches: Vec<(i64, i64)>,
    #[serde(default)]
    missing_branches: Vec<(i64, i64)>,
}

/// Branch arcs are `(from, to)` pairs; they are grouped by source line.
fn parse_coverage_py(content: &str) -> EvalResult<Vec<(String, FileHits)>> {
    let report: CoveragePyReport = serde_json::from_str(content)?;
    let files = report
        .files
        .into_iter()
        .map(|(path, file)| {
            let mut hits = FileHits::default();
            for line in file.missing_lines {
                hits.lines.insert(line, false);
            }
            for line in file.executed_lines {
                hits.lines.insert(line, true);
            }
            let arcs = file
                .executed_branches
                .into_iter()
                .map(|arc| (arc, true))
                .chain(file.missing_branches.into_iter().map(|arc| (arc, false)));
            for ((from, _), taken) in arcs {
                let Ok(line) = u32::try_from(from) else {
                    continue;
                };
                let count = hits.branches.entry(line).or_default();
                count.total += 1;
                if taken {
                    count.covered += 1;
                }
            }
            (path, hits)
        })
        .collect();
    Ok(files)
}

#[derive(Deserialize)]
struct Position {
    line: Option<u32>,
}

#[derive(Deserialize)]
struct Span {
    start: Position,
}

#[derive(Deserialize)]
struct IstanbulBranch {
    line: Option<u32>,
    loc: Option<Span>,
    #[serde(default)]
    locations: Vec<Span>,
}

#[derive(Deserialize)]
struct IstanbulFile {
    #[serde(default, rename = "statementMap")]
    statement_map: HashMap<String, Span>,
    #[serde(default)]
    s: HashMap<String, u64>,
    #[serde(default, rename = "branchMap")]
    branch_map: HashMap<String, IstanbulBranch>,
    #[serde(default)]
    b: HashMap<String, Vec<u64>>,
}

/// A line is covered when any statement starting on it ran.
fn parse_istanbul(content: &str) -> EvalResult<Vec<(String, FileHits)>> {
    let report: HashMap<String, IstanbulFile> = serde_json::from_str(content)?;
    let files = report
        .into_iter()
        .map(|(path, file)| {
            let mut hits = FileHits::default();
            for (id, span) in &file.statement_map {
                let Some(line) = span.start.line else {
                    continue;
                };
                let ran = file.s.get(id).copied().unwrap_or(0) > 0;
                let entry = hits.lines.entry(line).or_insert(false);
                *entry |= ran;
            }
            for (id, branch) in &file.branch_map {
                let line = branch
                    .line
                    .or_else(|| branch.loc.as_ref().and_then(|l| l.start.line))
                    .or_else(|| branch.locations.first().and_then(|l| l.start.line));
                let Some(line) = line else {
                    continue;
                };
                let counts = file.b.get(id).map(Vec::as_slice).unwrap_or(&[]);
                let outcomes = counts.len().max(branch.locations.len()) as u64;
                let count = hits.branches.entry(line).or_default();
                count.total += outcomes;
                count.covered += counts.iter().filter(|c| **c > 0).count() as u64;
            }
            (path, hits)
        })
        .collect();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COVERAGE_PY: &str = r#"{
        "meta": {"version": "7.4.0", "branch_coverage": true},
        "files": {
            "keras/src/ops/core.py": {
                "executed_lines": [1, 2, 4, 5],
                "missing_lines": [6, 7],
                "excluded_lines": [],
                "executed_branches": [[4, 5], [4, -1]],
                "missing_branches": [[5, 7]],
                "summary": {"covered_lines": 4}
            }
        },
        "totals": {"covered_lines": 4}
    }"#;

    const ISTANBUL: &str = r#"{
        "/testbed/lib/rules/no-var.js": {
            "path": "/testbed/lib/rules/no-var.js",
            "statementMap": {
                "0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 20}},
                "1": {"start": {"line": 3, "column": 2}, "end": {"line": 3, "column": 10}},
                "2": {"start": {"line": 3, "column": 12}, "end": {"line": 3, "column": 30}},
                "3": {"start": {"line": 4, "column": 2}, "end": {"line": 4, "column": 10}}
            },
            "s": {"0": 1, "1": 0, "2": 2, "3": 0},
            "branchMap": {
                "0": {
                    "loc": {"start": {"line": 3, "column": 2}, "end": {"line": 5, "column": 3}},
                    "type": "if",
                    "locations": [
                        {"start": {"line": 3, "column": 2}, "end": {"line": 5, "column": 3}},
                        {"start": {"line": 3, "column": 2}, "end": {"line": 5, "column": 3}}
                    ],
                    "line": 3
                }
            },
            "b": {"0": [2, 0]},
            "fnMap": {},
            "f": {}
        }
    }"#;

    #[test]
    fn test_parse_coverage_py() {
        let files = parse_coverage_py(COVERAGE_PY).unwrap();
        let (path, hits) = &files[0];
        assert_eq!(path, "keras/src/ops/core.py");
        assert_eq!(hits.lines.get(&1), Some(&true));
        assert_eq!(hits.lines.get(&6), Some(&false));
        assert_eq!(hits.lines.get(&3), None);
        assert_eq!(hits.branches[&4], BranchCount { covered: 2, total: 2 });
        assert_eq!(hits.branches[&5], BranchCount { covered: 0, total: 1 });
    }

    #[test]
    fn test_parse_istanbul() {
        let files = parse_istanbul(ISTANBUL).unwrap();
        let (_, hits) = &files[0];
        assert_eq!(hits.lines.get(&1), Some(&true));
        // one of two statements on line 3 ran
        assert_eq!(hits.lines.get(&3), Some(&true));
        assert_eq!(hits.lines.get(&4), Some(&false));
        assert_eq!(hits.branches[&3], BranchCount { covered: 1, total: 2 });
    }

    #[test]
    fn test_index_walks_directory_and_matches_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("coverage.json"), COVERAGE_PY).unwrap();
        let nested = dir.path().join("js");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("coverage-final.json"), ISTANBUL).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let index = CoverageIndex::load(dir.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.file_hits("keras/src/ops/core.py").is_some());
        assert!(index.file_hits("./keras/src/ops/core.py").is_some());
        assert!(index.file_hits("lib/rules/no-var.js").is_some());
        assert!(index.file_hits("rules/other.js").is_none());
    }

    #[test]
    fn test_unreadable_report_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("coverage.json"), "{not json").unwrap();
        let index = CoverageIndex::load(dir.path()).unwrap();
        assert!(index.is_empty());
    }
}
