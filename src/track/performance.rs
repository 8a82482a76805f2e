//! Performance regression track (`performance_optimization`)
//!
//! `stage_d` runs the tests alone (T1), `stage_e` runs them with the model
//! patch applied (T2); the timing maps are compared by [`PerformanceGate`].

use super::functional::{
    stage_pr_patches, timestamped_name, write_test_lists, ResultRecord, CODE_PATCH, TESTS_PATCH,
};
use super::{Prepared, Stage, StageReport, Track, TrackOutcome, TrackPolicy, Workspace};
use crate::dataset::WorkItem;
use crate::error::EvalResult;
use crate::gate::{GateResult, PerformanceGate};
use crate::parsers::{ParserTable, TimingMap};
use crate::runner::{CleanPolicy, StagePlan};
use crate::util::utc_timestamp;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PerformancePolicy {
    timeout: Duration,
    gate: PerformanceGate,
}

impl PerformancePolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            gate: PerformanceGate::default(),
        }
    }

    pub fn with_gate(mut self, gate: PerformanceGate) -> Self {
        self.gate = gate;
        self
    }

    fn plan(&self, branch: &str, suffix: &str, patches: &[&str]) -> StagePlan {
        StagePlan {
            branch: branch.to_string(),
            suffix: suffix.to_string(),
            patches: patches.iter().map(|p| p.to_string()).collect(),
            parser: ParserTable::Timing,
            clean: CleanPolicy::ByRepo,
            timeout: self.timeout,
        }
    }

    fn record(&self, item: &WorkItem, gate: &GateResult) -> ResultRecord {
        let mut record = ResultRecord::new(item, gate);
        record.created_at = Some(utc_timestamp());
        record
    }
}

fn timing(reports: &[StageReport], branch: &str) -> Option<TimingMap> {
    StageReport::tests(reports, branch)
        .and_then(|o| o.parsed)
        .and_then(|p| p.as_timing().cloned())
}

impl TrackPolicy for PerformancePolicy {
    fn track(&self) -> Track {
        Track::Performance
    }

    fn container_name(&self, item: &WorkItem) -> String {
        timestamped_name(item)
    }

    fn prepare(&self, item: &WorkItem, ws: &Workspace) -> EvalResult<Prepared> {
        Ok(Prepared::Run {
            assets: stage_pr_patches(item, ws)?,
            stages: vec![
                Stage::Tests(self.plan("stage_d", "test", &[TESTS_PATCH])),
                Stage::Tests(self.plan("stage_e", "test_patch", &[TESTS_PATCH, CODE_PATCH])),
            ],
        })
    }

    fn score(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reports: &[StageReport],
    ) -> EvalResult<TrackOutcome> {
        let before = timing(reports, "stage_d");
        let after = timing(reports, "stage_e");
        if let (Some(t1), Some(t2)) = (&before, &after) {
            debug!(
                "{} improved tests: {}",
                item.instance_id,
                self.gate.improved_tests(t1, t2).len()
            );
        }
        let gate = self.gate.evaluate(
            before.as_ref(),
            after.as_ref(),
            &item.pass_to_pass,
            &item.fail_to_pass,
        );

        write_test_lists(item, &ws.dir)?;
        let record = self.record(item, &gate);
        record.write(&ws.dir)?;
        Ok(record.outcome(self.track()))
    }

    fn record_failure(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reason: &str,
    ) -> EvalResult<TrackOutcome> {
        let mut record = self.record(item, &GateResult::not_run());
        record.error = Some(reason.to_string());
        record.write(&ws.dir)?;
        Ok(record.outcome(self.track()))
    }
}
