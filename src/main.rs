//! uep binary entry point

use clap::Parser;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use uep::cli::{Cli, Command};
use uep::{Config, Core};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;

    match cli.command {
        Command::Run => {
            let core = Core::new(config)?;
            core.start();
            tracing::info!("uep running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            core.stop().await;
        }
        Command::Status => {
            let core = Core::new(config)?;
            let status = core.queue.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::ClearQueue => {
            let core = Core::new(config)?;
            core.queue.clear();
            println!("state queue cleared");
        }
        Command::CleanupRecords => {
            let keep_days = config.session.record_keep_days;
            let core = Core::new(config)?;
            let removed = core.sessions.records().cleanup_old_records(keep_days);
            println!("removed {removed} completed records older than {keep_days} days");
        }
    }

    Ok(())
}
