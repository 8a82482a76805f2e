//! Functional correctness track (`selected`)

use super::{Prepared, Stage, StageReport, Track, TrackOutcome, TrackPolicy, Workspace};
use crate::container::StagedAsset;
use crate::dataset::WorkItem;
use crate::error::EvalResult;
use crate::gate::{functional_gate, GateResult};
use crate::parsers::ParserTable;
use crate::runner::{CleanPolicy, StagePlan};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result artifact shared by the functional, performance and deployment tracks
pub const RESULT_FILE: &str = "result.json";

pub(crate) const TESTS_PATCH: &str = "/patches/pr_tests.patch";
pub(crate) const CODE_PATCH: &str = "/patches/pr_code.patch";

/// Contents of `result.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<String>,
    pub base_commit: String,
    pub run_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(rename = "PASS_TO_PASS_result")]
    pub pass_to_pass: bool,
    #[serde(rename = "FAIL_TO_PASS_result")]
    pub fail_to_pass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn new(item: &WorkItem, gate: &GateResult) -> Self {
        Self {
            repo: item.repo_key.clone(),
            pr_number: Some(item.pull_number.clone()),
            base_commit: item.base_commit.clone(),
            run_state: gate.run_state,
            created_at: None,
            pass_to_pass: gate.pass_to_pass_ok,
            fail_to_pass: gate.fail_to_pass_ok,
            error: None,
        }
    }

    /// Score the aggregator derives from this record
    pub fn score(&self) -> f64 {
        if self.run_state && self.pass_to_pass && self.fail_to_pass {
            1.0
        } else {
            0.0
        }
    }

    pub fn write(&self, dir: &Path) -> EvalResult<PathBuf> {
        let path = dir.join(RESULT_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn outcome(&self, track: Track) -> TrackOutcome {
        TrackOutcome {
            track,
            score: self.score(),
            run_state: self.run_state,
            error: self.error.clone(),
        }
    }
}

/// Write `PASS_TO_PASS_list.json` and `FAIL_TO_PASS_list.json`.
pub(crate) fn write_test_lists(item: &WorkItem, dir: &Path) -> EvalResult<()> {
    std::fs::write(
        dir.join("PASS_TO_PASS_list.json"),
        serde_json::to_string_pretty(&item.pass_to_pass)?,
    )?;
    std::fs::write(
        dir.join("FAIL_TO_PASS_list.json"),
        serde_json::to_string_pretty(&item.fail_to_pass)?,
    )?;
    Ok(())
}

/// Write a patch into scratch and keep a copy in the instance directory.
pub(crate) fn stage_patch(
    ws: &Workspace,
    stem: &str,
    keep_as: &str,
    content: &str,
    container_path: &str,
) -> EvalResult<StagedAsset> {
    let scratch = ws.scratch_file(stem, "patch");
    std::fs::write(&scratch, content)?;
    std::fs::write(ws.dir.join(keep_as), content)?;
    Ok(StagedAsset::new(scratch, container_path))
}

/// Test patch and model patch, staged under `/patches/`
pub(crate) fn stage_pr_patches(item: &WorkItem, ws: &Workspace) -> EvalResult<Vec<StagedAsset>> {
    Ok(vec![
        stage_patch(
            ws,
            "test",
            "pr_tests.patch",
            item.test_patch.as_deref().unwrap_or_default(),
            TESTS_PATCH,
        )?,
        stage_patch(ws, "code", "pr_code.patch", &item.model_patch, CODE_PATCH)?,
    ])
}

/// `<repo_key>-<pull_number>-<local time>`
pub(crate) fn timestamped_name(item: &WorkItem) -> String {
    format!(
        "{}-{}-{}",
        item.repo_key,
        item.pull_number,
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    )
}

/// Applies the tests and the model patch, runs the test command once.
#[derive(Debug, Clone)]
pub struct FunctionalPolicy {
    timeout: Duration,
}

impl FunctionalPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn plan(&self) -> StagePlan {
        StagePlan {
            branch: "stage_e".to_string(),
            suffix: "test_patch".to_string(),
            patches: vec![TESTS_PATCH.to_string(), CODE_PATCH.to_string()],
            parser: ParserTable::Functional,
            clean: CleanPolicy::ByRepo,
            timeout: self.timeout,
        }
    }
}

impl TrackPolicy for FunctionalPolicy {
    fn track(&self) -> Track {
        Track::Functional
    }

    fn container_name(&self, item: &WorkItem) -> String {
        timestamped_name(item)
    }

    fn prepare(&self, item: &WorkItem, ws: &Workspace) -> EvalResult<Prepared> {
        Ok(Prepared::Run {
            assets: stage_pr_patches(item, ws)?,
            stages: vec![Stage::Tests(self.plan())],
        })
    }

    fn score(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reports: &[StageReport],
    ) -> EvalResult<TrackOutcome> {
        let outcome = StageReport::tests(reports, "stage_e");
        let status = outcome
            .as_ref()
            .and_then(|o| o.parsed.as_ref())
            .and_then(|p| p.as_status());
        let gate = functional_gate(status, &item.pass_to_pass, &item.fail_to_pass);

        write_test_lists(item, &ws.dir)?;
        let record = ResultRecord::new(item, &gate);
        record.write(&ws.dir)?;
        Ok(record.outcome(self.track()))
    }

    fn record_failure(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reason: &str,
    ) -> EvalResult<TrackOutcome> {
        let mut record = ResultRecord::new(item, &GateResult::not_run());
        record.error = Some(reason.to_string());
        record.write(&ws.dir)?;
        Ok(record.outcome(self.track()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{ParsedLog, StatusMap, TestStatus};
    use crate::runner::StageOutcome;

    fn item() -> WorkItem {
        WorkItem {
            instance_id: "systemd-101".to_string(),
            repo_key: "systemd".to_string(),
            pull_number: "101".to_string(),
            base_commit: "abc123".to_string(),
            model_patch: "diff --git a/x b/x\n".to_string(),
            test_patch: Some("diff --git a/t b/t\n".to_string()),
            pass_to_pass: vec!["a".to_string()],
            fail_to_pass: vec!["c".to_string()],
            source: "selected".to_string(),
            ..Default::default()
        }
    }

    fn workspace(root: &Path) -> Workspace {
        let ws = Workspace {
            dir: root.join("work"),
            scratch: root.join("tmp"),
            uid: "systemd-101-deadbeef".to_string(),
        };
        std::fs::create_dir_all(&ws.dir).unwrap();
        std::fs::create_dir_all(&ws.scratch).unwrap();
        ws
    }

    fn report(status: StatusMap) -> StageReport {
        StageReport::Tests(StageOutcome {
            branch: "stage_e".to_string(),
            exit_code: 0,
            parsed: Some(ParsedLog::Status(status)),
            parsed_path: PathBuf::from("parsed_test_patch.json"),
        })
    }

    #[test]
    fn test_prepare_stages_both_patches() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        let policy = FunctionalPolicy::new(Duration::from_secs(10));

        let Prepared::Run { assets, stages } = policy.prepare(&item(), &ws).unwrap() else {
            panic!("expected stages");
        };
        let targets: Vec<_> = assets.iter().map(|a| a.container_path.as_str()).collect();
        assert_eq!(targets, vec![TESTS_PATCH, CODE_PATCH]);
        assert!(assets[0].host_path.ends_with("test_systemd-101-deadbeef.patch"));
        assert_eq!(
            std::fs::read_to_string(ws.dir.join("pr_code.patch")).unwrap(),
            "diff --git a/x b/x\n"
        );

        let Stage::Tests(plan) = &stages[0] else {
            panic!("expected a test stage");
        };
        assert_eq!(plan.branch, "stage_e");
        assert_eq!(plan.suffix, "test_patch");
    }

    #[test]
    fn test_score_writes_result_and_lists() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        let policy = FunctionalPolicy::new(Duration::from_secs(10));
        let status: StatusMap = [
            ("a".to_string(), TestStatus::Passed),
            ("c".to_string(), TestStatus::Passed),
        ]
        .into_iter()
        .collect();

        let outcome = policy.score(&item(), &ws, &[report(status)]).unwrap();
        assert_eq!(outcome.score, 1.0);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ws.dir.join(RESULT_FILE)).unwrap())
                .unwrap();
        assert_eq!(written["repo"], "systemd");
        assert_eq!(written["pr_number"], "101");
        assert_eq!(written["run_state"], true);
        assert_eq!(written["PASS_TO_PASS_result"], true);
        assert_eq!(written["FAIL_TO_PASS_result"], true);
        assert!(written.get("error").is_none());

        let f2p: Vec<String> = serde_json::from_str(
            &std::fs::read_to_string(ws.dir.join("FAIL_TO_PASS_list.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(f2p, vec!["c"]);
    }

    #[test]
    fn test_missing_parse_is_not_run() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        let policy = FunctionalPolicy::new(Duration::from_secs(10));

        let outcome = policy.score(&item(), &ws, &[]).unwrap();
        assert!(!outcome.run_state);
        assert_eq!(outcome.score, 0.0);
    }

    #[test]
    fn test_record_failure() {
        let root = tempfile::tempdir().unwrap();
        let ws = workspace(root.path());
        let policy = FunctionalPolicy::new(Duration::from_secs(10));

        let outcome = policy
            .record_failure(&item(), &ws, "Image not available: systemd")
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("Image not available: systemd"));

        let record: ResultRecord =
            serde_json::from_str(&std::fs::read_to_string(ws.dir.join(RESULT_FILE)).unwrap())
                .unwrap();
        assert!(!record.run_state);
        assert_eq!(record.score(), 0.0);
    }
}
