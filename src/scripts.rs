//! Lifecycle script execution.
//!
//! Two kinds of scripts run during an install:
//!
//! - **Package scripts**: each installed package's `preinstall`,
//!   `install` and `postinstall` entries, run with the package's
//!   install directory as cwd, sequentially in level order.
//! - **Root lifecycle**: the root manifest's own phases, fired by the
//!   envelope around the pipeline (`preinstall` before, `install` and
//!   `postinstall` after, plus `prepublish` and `prepare` outside
//!   production mode).
//!
//! Commands run through the platform shell. A non-zero exit aborts the
//! remaining scripts of that phase and surfaces as
//! [`SpoolError::ScriptFailed`].

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::core::SpoolError;
use crate::linker::install_plan;
use crate::reporter::Reporter;
use crate::resolver::Resolver;

/// Install phases run for every package, in order.
pub const PACKAGE_PHASES: [&str; 3] = ["preinstall", "install", "postinstall"];

/// Run a shell command in `cwd`, mapping a non-zero exit to
/// [`SpoolError::ScriptFailed`].
pub async fn run_script(cwd: &Path, command: &str, name: &str, phase: &str) -> Result<()> {
    debug!("running {phase} script of {name}: {command}");

    #[cfg(windows)]
    let mut process = {
        let mut process = Command::new("cmd");
        process.arg("/C").arg(command);
        process
    };
    #[cfg(not(windows))]
    let mut process = {
        let mut process = Command::new("sh");
        process.arg("-c").arg(command);
        process
    };

    let output = process
        .current_dir(cwd)
        .output()
        .await
        .with_context(|| format!("Failed to spawn {phase} script of {name}"))?;

    if !output.status.success() {
        return Err(SpoolError::ScriptFailed {
            name: name.to_string(),
            phase: phase.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .into());
    }
    Ok(())
}

/// Runs package install scripts and the root lifecycle.
pub struct ScriptRunner {
    config: Arc<Config>,
}

impl ScriptRunner {
    /// Runner for one install.
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Run the install phases of every non-ignored package, in level
    /// order over `top_patterns`.
    pub async fn init(
        &self,
        resolver: &Resolver,
        top_patterns: &[String],
        reporter: &Reporter,
    ) -> Result<()> {
        let plan = install_plan(&self.config, resolver);
        for name in resolver.get_all_dependency_names_by_level_order(top_patterns) {
            for resolved in resolver.get_all_info_for_package_name(&name) {
                if resolver.is_ignored(resolved) {
                    continue;
                }
                let registry = resolver.reference(resolved.reference).registry;
                let key = (registry, resolved.name.clone(), resolved.version.clone());
                let Some(cwd) = plan.get(&key) else {
                    continue;
                };
                for phase in PACKAGE_PHASES {
                    if let Some(command) = resolved.manifest.scripts.get(phase) {
                        reporter.command(command);
                        run_script(cwd, command, &resolved.name, phase).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one phase of the root manifest's lifecycle, if declared.
    pub async fn run_root_lifecycle(&self, phase: &str, reporter: &Reporter) -> Result<()> {
        let scripts = self.config.root_lifecycle_scripts()?;
        if let Some(command) = scripts.get(phase) {
            reporter.command(command);
            run_script(&self.config.cwd, command, "root", phase).await?;
        }
        Ok(())
    }
}
