use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::WatchdogConfig;
use crate::mailbox::Mailbox;

pub(crate) async fn run(config: WatchdogConfig) -> Result<()> {
    crate::watchdog::run_foreground(config).await
}

/// Read-only view of the mailbox. Documents are printed verbatim so a
/// corrupted file is visible as-is.
pub(crate) fn status(config: &WatchdogConfig) -> Result<()> {
    let mailbox = Mailbox::new(config.shared_dir.clone());

    println!("Shared dir:  {}", mailbox.root().display());
    println!("Container:   {}", config.container_name);
    println!("Health URL:  {}", config.health_url);
    println!(
        "Telegram:    {}",
        if config.telegram.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("Requested:   {}", yes_no(mailbox.has_request()));
    println!("Processing:  {}", yes_no(mailbox.has_processing()));
    print_document("Last result", &mailbox.result_path())?;
    print_document("State", &mailbox.state_path())?;
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn print_document(label: &str, path: &Path) -> Result<()> {
    match fs::read_to_string(path) {
        Ok(content) => {
            println!("{label}:");
            for line in content.trim().lines() {
                println!("  {line}");
            }
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            println!("{label}: -");
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}
