//! Spool CLI entry point.
//!
//! Parses arguments, configures logging, runs the requested command and
//! renders failures as user-friendly errors.

use anyhow::Result;
use clap::Parser;
use spool_cli::cli;
use spool_cli::core::user_friendly_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Logging rules:
    // 1. RUST_LOG set - use it, verbose or not
    // 2. no RUST_LOG, --verbose - debug level
    // 3. neither - logging off
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    } else if cli.is_verbose() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("off")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(error) => {
            user_friendly_error(error).display();
            std::process::exit(1);
        }
    }
}
