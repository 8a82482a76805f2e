//! Stage runner: setup script, test script, log parsing
//!
//! Every stage writes three artifacts into the instance directory:
//! `log_<suffix>.log` (setup output), `run_<suffix>.log` (test output) and,
//! when a parser is registered for the repository, `parsed_<suffix>.json`.

pub mod script;

use crate::config::ProxyConfig;
use crate::container::ContainerSession;
use crate::error::EvalResult;
use crate::parsers::{ParsedLog, ParserTable};
use script::{needs_clean, test_script, SetupScript};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Exit code recorded when no parser is registered for the repository
pub const NO_PARSER_EXIT_CODE: i64 = 999;

/// One stage of a track
#[derive(Debug, Clone)]
pub struct StagePlan {
    /// Git branch created for the stage, e.g. `stage_e`
    pub branch: String,
    /// Artifact suffix, e.g. `test_patch`
    pub suffix: String,
    /// Container paths of patches applied after the reset
    pub patches: Vec<String>,
    pub parser: ParserTable,
    pub clean: CleanPolicy,
    pub timeout: Duration,
}

/// Whether setup wipes untracked files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanPolicy {
    /// Clean unless the repository is on the no-clean list
    ByRepo,
    Never,
}

impl StagePlan {
    pub fn log_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("log_{}.log", self.suffix))
    }

    pub fn run_log_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("run_{}.log", self.suffix))
    }

    pub fn parsed_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("parsed_{}.json", self.suffix))
    }
}

/// Commands and identity of the item a stage runs for
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub repo_key: &'a str,
    pub base_commit: &'a str,
    pub pre_test_cmd: &'a str,
    pub test_cmd: &'a str,
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub branch: String,
    pub exit_code: i64,
    /// Parsed test log; `None` when no parser exists
    pub parsed: Option<ParsedLog>,
    pub parsed_path: PathBuf,
}

/// Runs stage plans inside a container session
#[derive(Debug, Clone)]
pub struct StageRunner {
    proxy: ProxyConfig,
    workdir: String,
}

impl StageRunner {
    pub fn new(proxy: ProxyConfig, workdir: impl Into<String>) -> Self {
        Self {
            proxy,
            workdir: workdir.into(),
        }
    }

    pub async fn run(
        &self,
        session: &ContainerSession,
        input: StageInput<'_>,
        plan: &StagePlan,
        dir: &Path,
    ) -> EvalResult<StageOutcome> {
        let clean = match plan.clean {
            CleanPolicy::ByRepo => needs_clean(input.repo_key),
            CleanPolicy::Never => false,
        };
        let setup = SetupScript {
            proxy: &self.proxy,
            workdir: &self.workdir,
            base_commit: input.base_commit,
            branch: &plan.branch,
            clean,
            patches: &plan.patches,
            pre_test_cmd: input.pre_test_cmd,
        }
        .render();

        let setup_code = session
            .run_stage(&setup, &plan.log_path(dir), plan.timeout)
            .await?;
        if setup_code != 0 {
            warn!("{} setup exited with {}", plan.branch, setup_code);
        }

        let run_log = plan.run_log_path(dir);
        let exit_code = session
            .run_stage(
                &test_script(&self.proxy, input.test_cmd),
                &run_log,
                plan.timeout,
            )
            .await?;
        info!("{} exit code: {}", plan.branch, exit_code);

        let parsed_path = plan.parsed_path(dir);
        let raw = std::fs::read(&run_log)?;
        let log = String::from_utf8_lossy(&raw);

        let Some(parsed) = plan.parser.parse(input.repo_key, &log) else {
            warn!("Parser not found for {}", input.repo_key);
            return Ok(StageOutcome {
                branch: plan.branch.clone(),
                exit_code: NO_PARSER_EXIT_CODE,
                parsed: None,
                parsed_path,
            });
        };

        std::fs::write(&parsed_path, serde_json::to_string_pretty(&parsed)?)?;
        Ok(StageOutcome {
            branch: plan.branch.clone(),
            exit_code,
            parsed: Some(parsed),
            parsed_path,
        })
    }
}
