//! Command-line interface for spool.
//!
//! Each command lives in its own module with its own argument struct
//! and execution logic. Global options (`--verbose`, `--quiet`,
//! `--no-progress`, `--cwd`) are available to all subcommands.

pub mod install;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI for spool.
#[derive(Parser)]
#[command(
    name = "spool",
    about = "Spool - a multi-registry package manager",
    version,
    long_about = "Spool installs dependencies declared in spool.toml (or acorn.json) \
                  into reproducible, lockfile-pinned module trees."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (equivalent to RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable spinners and progress animation.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Run as if started in this directory.
    #[arg(long, global = true, value_name = "DIR")]
    cwd: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Install dependencies from the root manifest.
    Install(install::InstallCommand),
}

impl Cli {
    /// Whether `--verbose` was passed.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        let cwd = match self.cwd {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        match self.command {
            Commands::Install(command) => {
                command.execute(cwd, self.quiet, self.no_progress).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_install_with_global_flags() {
        let cli = Cli::parse_from(["spool", "--quiet", "install", "--frozen-lockfile"]);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Install(_)));
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
