//! Shared execution skeleton for container tracks
//!
//! prepare -> acquire container -> stage assets -> run stages -> finalize
//! -> score. The container is finalized on every path once acquired.

use super::{Prepared, Stage, StageReport, TrackOutcome, TrackPolicy, Workspace};
use crate::config::{ContainerLimits, RunConfig};
use crate::container::{Admission, ContainerRuntime, ContainerSession, ContainerSpec, StagedAsset};
use crate::dataset::WorkItem;
use crate::error::EvalResult;
use crate::runner::{StageInput, StageRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, instrument, warn};

pub struct Pipeline {
    runtime: Arc<dyn ContainerRuntime>,
    admission: Admission,
    runner: StageRunner,
    limits: ContainerLimits,
    image_prefix: String,
    image_tar_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(config: &RunConfig, runtime: Arc<dyn ContainerRuntime>, admission: Admission) -> Self {
        Self {
            runtime,
            admission,
            runner: StageRunner::new(config.proxy.clone(), config.limits.workdir.clone()),
            limits: config.limits.clone(),
            image_prefix: config.image_prefix.clone(),
            image_tar_dir: config.image_tar_dir.clone(),
        }
    }

    /// Run one item through `policy`.
    ///
    /// Any error is recorded as the item's result with `run_state=false`;
    /// only a failure to write that record is returned to the caller.
    #[instrument(skip_all, fields(instance = %item.instance_id))]
    pub async fn run(
        &self,
        policy: &dyn TrackPolicy,
        item: &WorkItem,
        ws: &Workspace,
    ) -> EvalResult<TrackOutcome> {
        match self.attempt(policy, item, ws).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_infra() {
                    error!("Infrastructure failure on {}: {}", item.instance_id, e);
                } else {
                    error!("Evaluation of {} failed: {}", item.instance_id, e);
                }
                policy.record_failure(item, ws, &e.to_string())
            }
        }
    }

    async fn attempt(
        &self,
        policy: &dyn TrackPolicy,
        item: &WorkItem,
        ws: &Workspace,
    ) -> EvalResult<TrackOutcome> {
        let (assets, stages) = match policy.prepare(item, ws)? {
            Prepared::Run { assets, stages } => (assets, stages),
            Prepared::Skip(reason) => {
                warn!("Skipping execution of {}: {}", item.instance_id, reason);
                return policy.record_failure(item, ws, &reason);
            }
        };

        let reports = self.execute(policy, item, ws, &assets, &stages).await?;
        policy.score(item, ws, &reports)
    }

    async fn execute(
        &self,
        policy: &dyn TrackPolicy,
        item: &WorkItem,
        ws: &Workspace,
        assets: &[StagedAsset],
        stages: &[Stage],
    ) -> EvalResult<Vec<StageReport>> {
        let spec = ContainerSpec {
            name: policy.container_name(item),
            image: format!("{}:{}", self.image_prefix, item.repo_key),
            limits: self.limits.clone(),
        };
        let image_tar = self
            .image_tar_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.tar", item.repo_key)));

        let session = ContainerSession::acquire(
            self.runtime.clone(),
            &spec,
            image_tar.as_deref(),
            &self.admission,
        )
        .await?;
        let result = self.run_stages(&session, item, ws, assets, stages).await;
        session.finalize().await;
        result
    }

    async fn run_stages(
        &self,
        session: &ContainerSession,
        item: &WorkItem,
        ws: &Workspace,
        assets: &[StagedAsset],
        stages: &[Stage],
    ) -> EvalResult<Vec<StageReport>> {
        session.stage_assets(assets).await?;

        let input = StageInput {
            repo_key: &item.repo_key,
            base_commit: &item.base_commit,
            pre_test_cmd: &item.pre_test_cmd,
            test_cmd: &item.test_cmd,
        };
        let mut reports = Vec::with_capacity(stages.len());
        for stage in stages {
            match stage {
                Stage::Tests(plan) => {
                    let outcome = self.runner.run(session, input, plan, &ws.dir).await?;
                    reports.push(StageReport::Tests(outcome));
                }
                Stage::Script {
                    name,
                    script,
                    log,
                    timeout,
                    collect,
                } => {
                    let exit_code = session.run_stage(script, log, *timeout).await?;
                    for (container_path, host_dir) in collect {
                        if let Err(e) = session.collect(container_path, host_dir).await {
                            warn!("Nothing collected from {}: {}", container_path, e);
                        }
                    }
                    reports.push(StageReport::Script {
                        name: name.clone(),
                        exit_code,
                    });
                }
            }
        }
        Ok(reports)
    }
}
