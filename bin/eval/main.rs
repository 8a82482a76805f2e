//! Patch evaluation CLI
//!
//! Usage:
//!   patch-eval run --dataset-path data.jsonl --predictions-path preds.json --model-name m
//!   patch-eval summarize --dataset-path data.jsonl --predictions-path preds.json --run-id 20250101_120000
//!   patch-eval parse-log --repo-key svelte run_test_patch.log

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser, Debug)]
#[command(name = "patch-eval")]
#[command(about = "Evaluate model-generated patches in containers", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate predictions, then aggregate the results
    Run(commands::run::RunArgs),

    /// Re-aggregate the results of an existing run
    Summarize(commands::summarize::SummarizeArgs),

    /// Parse a test log with a repository's parser and print the status map
    ParseLog(commands::parse_log::ParseLogArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("patch_eval=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Summarize(args) => commands::summarize::run(args),
        Commands::ParseLog(args) => commands::parse_log::run(args),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
