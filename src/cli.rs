//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "uep", about = "UEP Orchestrator - desktop assistant runtime", version)]
pub struct Cli {
    /// Path to a configuration file (otherwise the fallback chain applies)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the orchestrator loop
    Run,

    /// Print the persisted state-queue status
    Status,

    /// Clear the persisted state queue
    ClearQueue,

    /// Prune completed session records older than the configured cutoff
    CleanupRecords,
}
