//! Configuration-deployment track (`configuration_deployment`)

use super::functional::{stage_patch, ResultRecord, CODE_PATCH};
use super::{Prepared, Stage, StageReport, Track, TrackOutcome, TrackPolicy, Workspace};
use crate::dataset::WorkItem;
use crate::error::EvalResult;
use crate::gate::{functional_gate, GateResult};
use crate::parsers::ParserTable;
use crate::runner::{CleanPolicy, StagePlan};
use std::time::Duration;

const DEPLOY_PATCH: &str = "/patches/cd_patch.patch";

/// Applies the deployment patch then the model patch and gates on the
/// deployment parser table. The result carries no PR number.
#[derive(Debug, Clone)]
pub struct DeploymentPolicy {
    timeout: Duration,
}

impl DeploymentPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn record(item: &WorkItem, gate: &GateResult) -> ResultRecord {
        ResultRecord {
            pr_number: None,
            ..ResultRecord::new(item, gate)
        }
    }
}

impl TrackPolicy for DeploymentPolicy {
    fn track(&self) -> Track {
        Track::Deployment
    }

    fn container_name(&self, item: &WorkItem) -> String {
        format!("swecompass-{}-{}", item.repo_key, item.instance_id)
    }

    fn prepare(&self, item: &WorkItem, ws: &Workspace) -> EvalResult<Prepared> {
        let assets = vec![
            stage_patch(
                ws,
                "cd",
                "cd_patch.patch",
                item.test_patch.as_deref().unwrap_or_default(),
                DEPLOY_PATCH,
            )?,
            stage_patch(ws, "code", "pr_code.patch", &item.model_patch, CODE_PATCH)?,
        ];
        let plan = StagePlan {
            branch: "stage_e".to_string(),
            suffix: "test_patch".to_string(),
            patches: vec![DEPLOY_PATCH.to_string(), CODE_PATCH.to_string()],
            parser: ParserTable::Deployment,
            clean: CleanPolicy::Never,
            timeout: self.timeout,
        };
        Ok(Prepared::Run {
            assets,
            stages: vec![Stage::Tests(plan)],
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

        let record = Self::record(item, &gate);
        record.write(&ws.dir)?;
        Ok(record.outcome(self.track()))
    }

    fn record_failure(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reason: &str,
    ) -> EvalResult<TrackOutcome> {
        let mut record = Self::record(item, &GateResult::not_run());
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
    use crate::track::RESULT_FILE;
    use std::path::PathBuf;

    fn item() -> WorkItem {
        WorkItem {
            instance_id: "loki-cd-3".to_string(),
            repo_key: "loki".to_string(),
            pull_number: "3".to_string(),
            base_commit: "f00".to_string(),
            model_patch: "model".to_string(),
            test_patch: Some("deploy".to_string()),
            fail_to_pass: vec!["TestDeploy".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_container_name() {
        let policy = DeploymentPolicy::new(Duration::from_secs(6000));
        assert_eq!(policy.container_name(&item()), "swecompass-loki-loki-cd-3");
    }

    #[test]
    fn test_prepare_and_score() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace {
            dir: root.path().join("work"),
            scratch: root.path().join("tmp"),
            uid: "loki-3-11111111".to_string(),
        };
        std::fs::create_dir_all(&ws.dir).unwrap();
        std::fs::create_dir_all(&ws.scratch).unwrap();
        let policy = DeploymentPolicy::new(Duration::from_secs(6000));

        let Prepared::Run { assets, stages } = policy.prepare(&item(), &ws).unwrap() else {
            panic!("expected stages");
        };
        assert_eq!(assets[0].container_path, DEPLOY_PATCH);
        assert_eq!(
            std::fs::read_to_string(ws.dir.join("cd_patch.patch")).unwrap(),
            "deploy"
        );
        let Stage::Tests(plan) = &stages[0] else {
            panic!("expected a test stage");
        };
        assert_eq!(plan.parser, ParserTable::Deployment);
        assert_eq!(plan.clean, CleanPolicy::Never);
        assert_eq!(plan.timeout, Duration::from_secs(6000));

        let status: StatusMap = [("TestDeploy".to_string(), TestStatus::Passed)]
            .into_iter()
            .collect();
        let report = StageReport::Tests(StageOutcome {
            branch: "stage_e".to_string(),
            exit_code: 0,
            parsed: Some(ParsedLog::Status(status)),
            parsed_path: PathBuf::new(),
        });
        let outcome = policy.score(&item(), &ws, &[report]).unwrap();
        assert_eq!(outcome.score, 1.0);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ws.dir.join(RESULT_FILE)).unwrap())
                .unwrap();
        assert!(written.get("pr_number").is_none());
        assert_eq!(written["base_commit"], "f00");
    }
}
