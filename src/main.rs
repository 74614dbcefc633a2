mod cli;
mod commands;
mod config;
mod controller;
mod errors;
mod health;
mod mailbox;
mod notifier;
mod outbox;
mod recovery;
mod restart;
mod review;
#[cfg(test)]
mod testing;
mod watchdog;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let code = commands::run(cli.command).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
