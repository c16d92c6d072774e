//! Integration test suite for spool.
//!
//! End-to-end install scenarios driving the library API against
//! temporary working directories, plus binary-level checks of the CLI
//! surface.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! Tests are organized by functionality area:
//! - **install**: fresh installs, bailouts, frozen lockfiles, the
//!   crash-recovery protocol
//! - **flat**: flat-mode collapsing with preset resolutions
//! - **mirror**: offline-mirror pruning
//! - **cli_surface**: positional-argument rejection at the binary
//!   boundary

use std::path::Path;
use std::sync::Arc;

use spool_cli::config::Config;
use spool_cli::constants::LOCKFILE_FILENAME;
use spool_cli::flags::{EffectiveFlags, RawFlags};
use spool_cli::installer::Install;
use spool_cli::lockfile::Lockfile;
use spool_cli::reporter::Reporter;

mod cli_surface;
mod flat;
mod install;
mod mirror;

/// Build an orchestrator for a prepared working directory.
pub fn make_install(config: Arc<Config>, raw: RawFlags) -> Install {
    let flags = EffectiveFlags::normalize(&raw, &config);
    let lockfile = Lockfile::load(&config.cwd.join(LOCKFILE_FILENAME)).unwrap();
    Install::new(config, Reporter::new(true, true), flags, lockfile)
}

/// The integrity witness path for the default layout.
pub fn witness_path(cwd: &Path) -> std::path::PathBuf {
    cwd.join("spool_modules").join(spool_cli::constants::INTEGRITY_FILENAME)
}
