//! `patch-eval parse-log`

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use patch_eval::parsers::ParserTable;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Table {
    Functional,
    Deployment,
    Timing,
}

impl From<Table> for ParserTable {
    fn from(table: Table) -> Self {
        match table {
            Table::Functional => ParserTable::Functional,
            Table::Deployment => ParserTable::Deployment,
            Table::Timing => ParserTable::Timing,
        }
    }
}

#[derive(Args, Debug)]
pub struct ParseLogArgs {
    /// Repository key selecting the parser
    #[arg(long)]
    pub repo_key: String,

    /// Parser table
    #[arg(long, value_enum, default_value = "functional")]
    pub table: Table,

    /// Log file to parse
    pub log: PathBuf,
}

pub fn run(args: ParseLogArgs) -> Result<()> {
    let raw = std::fs::read(&args.log)
        .with_context(|| format!("Failed to read {}", args.log.display()))?;
    let log = String::from_utf8_lossy(&raw);

    let table = ParserTable::from(args.table);
    let Some(parsed) = table.parse(&args.repo_key, &log) else {
        let mut keys = table.keys();
        keys.sort_unstable();
        anyhow::bail!(
            "No parser for '{}'. Known keys: {}",
            args.repo_key,
            keys.join(", ")
        );
    };
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}
