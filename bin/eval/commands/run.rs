//! `patch-eval run`

use super::{DatasetArgs, OutputArgs};
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use patch_eval::config::ProxyConfig;
use patch_eval::container::{Admission, ProcLoadProbe};
use patch_eval::{
    Aggregator, DispatchEngine, DockerRuntime, EvaluatorDispatcher, HttpJudge, Judge, RunConfig,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Number of items evaluated concurrently
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Judge model (required for code understanding)
    #[arg(long)]
    pub model_name: Option<String>,

    /// Judge API key (default: OPENAI_API_KEY, then API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Judge API base URL (default: OPENAI_BASE_URL, then BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Proxy for both http and https inside containers
    #[arg(long)]
    pub proxy: Option<String>,

    /// Directory holding `<repo_key>.tar` image archives
    #[arg(long)]
    pub image_tar_dir: Option<PathBuf>,

    /// Skip evaluation and only aggregate existing results
    #[arg(long)]
    pub summary_only: bool,
}

/// Scenarios `ALL` or containing code understanding need a judge model.
pub fn requires_model(scenarios: &str) -> bool {
    let scenarios = scenarios.trim().to_uppercase();
    scenarios == "ALL" || scenarios.contains("CODE_UNDERSTANDING")
}

impl RunArgs {
    fn config(&self) -> Result<RunConfig> {
        let mut config = self.output.config()?;
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if self.model_name.is_some() {
            config.model_name = self.model_name.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = key.clone();
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if self.image_tar_dir.is_some() {
            config.image_tar_dir = self.image_tar_dir.clone();
        }
        if self.proxy.is_some() || config.proxy.is_empty() {
            config.proxy = ProxyConfig::resolve(self.proxy.as_deref());
        }
        config.resolve_credentials();
        Ok(config)
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.config()?;
    if requires_model(&args.dataset.programming_scenarios) && config.model_name.is_none() {
        bail!(
            "scenarios 'ALL' or 'code_understanding' require a model: pass --model-name <name>"
        );
    }

    let paths = config.prepare_dirs().context("Failed to create run directories")?;
    info!(
        "Run configured: run_id={} model={} workers={}",
        config.run_id,
        config.model_name.as_deref().unwrap_or("-"),
        config.max_workers
    );

    let items = args.dataset.load()?;
    if items.is_empty() {
        warn!("No data found after filtering. Exiting.");
        return Ok(());
    }
    config.save_snapshot()?;

    if !args.summary_only {
        let runtime = Arc::new(
            DockerRuntime::connect()
                .await
                .context("Failed to connect to Docker")?,
        );
        let admission = Admission::new(config.admission.clone(), Arc::new(ProcLoadProbe::default()));
        let judge: Option<Arc<dyn Judge>> = match config.model_name {
            Some(_) => Some(Arc::new(
                HttpJudge::new(config.judge_config()).context("Failed to build judge client")?,
            )),
            None => None,
        };

        let dispatcher = Arc::new(EvaluatorDispatcher::new(
            &config,
            runtime.clone(),
            admission,
            judge,
        ));
        let engine = DispatchEngine::new(
            dispatcher,
            &paths.work_dir,
            &paths.tmp_dir,
            config.max_workers,
        )
        .with_progress(std::io::stderr().is_terminal());

        let summary = tokio::select! {
            summary = engine.run(items.clone()) => summary,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; cleaning up containers");
                runtime.release_all().await;
                bail!("interrupted");
            }
        };

        println!(
            "\n  {} evaluated, {} skipped, {} unsupported, {} failed",
            summary.evaluated.to_string().green(),
            summary.skipped,
            summary.unsupported,
            summary.failed.len().to_string().red()
        );
        for (id, error) in &summary.failed {
            println!("    {} {}: {}", "✗".red(), id, error);
        }
    }

    let report = Aggregator::new(&paths.work_dir, &paths.result_dir).run(&items)?;
    println!("\n{}", report.to_table());
    println!(
        "\n  Results: {}\n",
        paths.result_dir.display().to_string().cyan()
    );
    Ok(())
}
