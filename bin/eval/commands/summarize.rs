//! `patch-eval summarize`

use super::{DatasetArgs, OutputArgs};
use anyhow::{bail, Result};
use clap::Args;
use patch_eval::Aggregator;

#[derive(Args, Debug)]
pub struct SummarizeArgs {
    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn run(args: SummarizeArgs) -> Result<()> {
    if args.output.run_id.is_none() && args.output.config.is_none() {
        bail!("--run-id (or a config file naming one) is required to summarize a run");
    }
    let config = args.output.config()?;
    let paths = config.paths();
    if !paths.work_dir.exists() {
        bail!("No work directory for run {}: {}", config.run_id, paths.work_dir.display());
    }

    let items = args.dataset.load()?;
    let report = Aggregator::new(&paths.work_dir, &paths.result_dir).run(&items)?;
    println!("{}", report.to_table());
    Ok(())
}
