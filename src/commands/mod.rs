mod review;
mod watchdog;

use anyhow::Result;

use crate::cli::{Commands, ReviewCommand, WatchdogCommand};
use crate::config::{ReviewConfig, WatchdogConfig};

/// Runs a subcommand and returns the process exit code.
pub async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Watchdog { command } => {
            let config = WatchdogConfig::load()?;
            match command {
                WatchdogCommand::Run => watchdog::run(config).await?,
                WatchdogCommand::Status => watchdog::status(&config)?,
            }
            Ok(0)
        }
        Commands::Review { command } => {
            let config = ReviewConfig::load()?;
            match command {
                ReviewCommand::Check(args) => review::check(args, &config).await,
                ReviewCommand::Summary(args) => review::summary(args, &config).await,
                ReviewCommand::Cycle(args) => review::cycle(args, &config).await,
            }
        }
    }
}
