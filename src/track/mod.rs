//! Evaluation tracks
//!
//! A work item's `source` selects its track. Container tracks share one
//! execution skeleton ([`pipeline::Pipeline`]) and differ only in the
//! [`TrackPolicy`] that builds their stages and scores the result.
//! Code understanding needs no container and is routed to the judge.

pub mod coverage;
pub mod deployment;
pub mod functional;
pub mod performance;
pub mod pipeline;

use crate::config::RunConfig;
use crate::container::{Admission, ContainerRuntime, StagedAsset};
use crate::dataset::WorkItem;
use crate::error::{EvalError, EvalResult};
use crate::judge::{Judge, UnderstandingScorer};
use crate::runner::{StageOutcome, StagePlan};
use crate::util::safe_file_name;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

pub use coverage::CoveragePolicy;
pub use deployment::DeploymentPolicy;
pub use functional::{FunctionalPolicy, ResultRecord, RESULT_FILE};
pub use performance::PerformancePolicy;
pub use pipeline::Pipeline;

/// Evaluation mode selected by a work item's `source`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Functional,
    Performance,
    Deployment,
    Coverage,
    Understanding,
}

impl Track {
    pub const ALL: [Track; 5] = [
        Track::Functional,
        Track::Performance,
        Track::Deployment,
        Track::Coverage,
        Track::Understanding,
    ];

    /// `None` for sources no track handles
    pub fn from_source(source: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.source() == source)
    }

    /// Dataset `source` value, also the work subdirectory name
    pub fn source(&self) -> &'static str {
        match self {
            Track::Functional => "selected",
            Track::Performance => "performance_optimization",
            Track::Deployment => "configuration_deployment",
            Track::Coverage => "test_case_generation",
            Track::Understanding => "code_understanding",
        }
    }

    /// File name of the result artifact inside the instance directory
    pub fn artifact(&self, instance_id: &str) -> String {
        match self {
            Track::Coverage => crate::coverage::RESULT_FILE.to_string(),
            Track::Understanding => format!("{}.json", safe_file_name(instance_id)),
            _ => RESULT_FILE.to_string(),
        }
    }

    /// `<work_dir>/<source>/<instance_id>`
    pub fn instance_dir(&self, work_dir: &Path, instance_id: &str) -> PathBuf {
        work_dir.join(self.source()).join(instance_id)
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.source())
    }
}

/// Directories owned by one claimed work item
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Instance directory holding logs and result artifacts
    pub dir: PathBuf,
    /// Scratch directory removed when the claim is released
    pub scratch: PathBuf,
    /// `<repo_key>-<pull_number>-<8 hex>`, unique per attempt
    pub uid: String,
}

impl Workspace {
    /// Path of a scratch file tagged with the attempt uid
    pub fn scratch_file(&self, stem: &str, ext: &str) -> PathBuf {
        self.scratch.join(format!("{}_{}.{}", stem, self.uid, ext))
    }
}

/// One unit of in-container work
#[derive(Debug, Clone)]
pub enum Stage {
    /// Setup + test command + parse, via the stage runner
    Tests(StagePlan),
    /// A standalone script whose outputs are copied back to the host
    Script {
        name: String,
        script: String,
        log: PathBuf,
        timeout: Duration,
        collect: Vec<(String, PathBuf)>,
    },
}

#[derive(Debug, Clone)]
pub enum StageReport {
    Tests(StageOutcome),
    Script { name: String, exit_code: i64 },
}

impl StageReport {
    /// Outcome of the test stage on `branch`
    pub fn tests(reports: &[StageReport], branch: &str) -> Option<StageOutcome> {
        reports.iter().find_map(|r| match r {
            StageReport::Tests(outcome) if outcome.branch == branch => Some(outcome.clone()),
            _ => None,
        })
    }
}

/// What a policy wants done before scoring
#[derive(Debug)]
pub enum Prepared {
    Run {
        assets: Vec<StagedAsset>,
        stages: Vec<Stage>,
    },
    /// Nothing to execute; the reason is recorded as the item's failure
    Skip(String),
}

/// Final state of one evaluated item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackOutcome {
    pub track: Track,
    pub score: f64,
    pub run_state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrackOutcome {
    pub fn scored(track: Track, score: f64, run_state: bool) -> Self {
        Self {
            track,
            score,
            run_state,
            error: None,
        }
    }

    pub fn failed(track: Track, error: impl Into<String>) -> Self {
        Self {
            track,
            score: 0.0,
            run_state: false,
            error: Some(error.into()),
        }
    }
}

/// Per-track behaviour plugged into the shared pipeline
pub trait TrackPolicy: Send + Sync {
    fn track(&self) -> Track;

    fn container_name(&self, item: &WorkItem) -> String;

    /// Write patches and scripts, and describe the stages to run.
    fn prepare(&self, item: &WorkItem, ws: &Workspace) -> EvalResult<Prepared>;

    /// Score the stage reports and write the result artifact.
    fn score(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reports: &[StageReport],
    ) -> EvalResult<TrackOutcome>;

    /// Write the result artifact for an item that could not be run.
    fn record_failure(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reason: &str,
    ) -> EvalResult<TrackOutcome>;
}

/// Routes each work item to its track
pub struct EvaluatorDispatcher {
    pipeline: Pipeline,
    functional: FunctionalPolicy,
    performance: PerformancePolicy,
    deployment: DeploymentPolicy,
    coverage: CoveragePolicy,
    scorer: Option<UnderstandingScorer<dyn Judge>>,
}

impl EvaluatorDispatcher {
    pub fn new(
        config: &RunConfig,
        runtime: Arc<dyn ContainerRuntime>,
        admission: Admission,
        judge: Option<Arc<dyn Judge>>,
    ) -> Self {
        let stage_timeout = Duration::from_secs(config.stage_timeout_secs);
        Self {
            pipeline: Pipeline::new(config, runtime, admission),
            functional: FunctionalPolicy::new(stage_timeout),
            performance: PerformancePolicy::new(stage_timeout),
            deployment: DeploymentPolicy::new(Duration::from_secs(
                config.deployment_timeout_secs,
            )),
            coverage: CoveragePolicy::new(stage_timeout),
            scorer: judge.map(UnderstandingScorer::new),
        }
    }

    /// Policy for a container track; `None` for code understanding
    pub fn policy(&self, track: Track) -> Option<&dyn TrackPolicy> {
        match track {
            Track::Functional => Some(&self.functional),
            Track::Performance => Some(&self.performance),
            Track::Deployment => Some(&self.deployment),
            Track::Coverage => Some(&self.coverage),
            Track::Understanding => None,
        }
    }

    #[instrument(skip_all, fields(instance = %item.instance_id, track = %track))]
    pub async fn evaluate(
        &self,
        track: Track,
        item: &WorkItem,
        ws: &Workspace,
    ) -> EvalResult<TrackOutcome> {
        let outcome = match self.policy(track) {
            Some(policy) => self.pipeline.run(policy, item, ws).await?,
            None => {
                let scorer = self.scorer.as_ref().ok_or_else(|| {
                    EvalError::Config("code understanding requires a judge model".to_string())
                })?;
                let (score, _) = scorer.evaluate_to(item, &ws.dir).await?;
                TrackOutcome::scored(track, score, true)
            }
        };
        info!(
            "Evaluated {} ({}): score={} run_state={}",
            item.instance_id, track, outcome.score, outcome.run_state
        );
        Ok(outcome)
    }
}
