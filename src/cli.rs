use clap::{Args, Parser, Subcommand};

const BUILD_VERSION: &str = env!("ARENA_OPS_BUILD_VERSION");
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
USAGE:
  {usage}

COMMANDS:
{subcommands}

OPTIONS:
{options}
{after-help}
";
const HELP_AFTER: &str = "\
Quick Command Map
  Watchdog:
    watchdog run, watchdog status
  Review:
    review check, review summary, review cycle

Examples
  arena-ops watchdog run
  arena-ops watchdog status
  arena-ops review check --pr 110
  arena-ops review cycle --pr 110 --repo komleff/slime-arena
";

#[derive(Debug, Parser)]
#[command(
    name = "arena-ops",
    version = BUILD_VERSION,
    about = "Slime Arena operations: restart watchdog and review orchestration",
    help_template = HELP_TEMPLATE,
    after_help = HELP_AFTER
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Watchdog {
        #[command(subcommand)]
        command: WatchdogCommand,
    },
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum WatchdogCommand {
    /// Run the watchdog loop in the foreground until interrupted.
    Run,
    /// Show the mailbox contents.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum ReviewCommand {
    /// Print reviewer verdicts and exit non-zero without consensus.
    Check(PrArgs),
    /// Print the consensus summary as markdown.
    Summary(PrArgs),
    /// Run the review, fix and re-review loop.
    Cycle(PrArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PrArgs {
    #[arg(long)]
    pub pr: u64,
    /// Overrides REVIEW_REPO.
    #[arg(long)]
    pub repo: Option<String>,
}
