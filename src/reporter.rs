//! Console reporting and the interactive disambiguation seam.
//!
//! The [`Reporter`] owns everything the install prints: numbered step
//! headers with a spinner while a step runs, success/warning/info
//! lines, and echoed lifecycle commands. Output honors `--quiet` and
//! disables animation when stderr is not a terminal.
//!
//! Flat-mode version conflicts are resolved through the
//! [`Disambiguator`] capability. The reporter's implementation prompts
//! on stdin; [`PresetDisambiguator`] consumes a fixed table and is what
//! non-interactive callers and tests use.

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::SpoolError;

/// One selectable version during flat-mode disambiguation.
#[derive(Debug, Clone)]
pub struct VersionChoice {
    /// Human-readable label, e.g. `used by app, version 2.0.0`.
    pub label: String,
    /// The version this choice selects.
    pub value: String,
}

/// Capability to choose one version for a package name with several
/// resolved versions. The only user-input point in the core.
pub trait Disambiguator {
    /// Pick one of `options` for `name`, returning the chosen version.
    fn choose(&self, name: &str, options: &[VersionChoice]) -> Result<String>;
}

/// Disambiguator backed by a preset name -> version table; fails fast
/// for names not in the table.
pub struct PresetDisambiguator {
    /// Pinned choices, name -> version.
    pub choices: std::collections::BTreeMap<String, String>,
}

impl Disambiguator for PresetDisambiguator {
    fn choose(&self, name: &str, options: &[VersionChoice]) -> Result<String> {
        let Some(version) = self.choices.get(name) else {
            return Err(SpoolError::NonInteractive { name: name.to_string() }.into());
        };
        if !options.iter().any(|o| &o.value == version) {
            return Err(SpoolError::NonInteractive { name: name.to_string() }.into());
        }
        Ok(version.clone())
    }
}

/// Console reporter for one install invocation.
pub struct Reporter {
    /// Suppress everything except warnings.
    pub quiet: bool,
    /// Disable spinners even on a terminal.
    pub no_progress: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl Reporter {
    /// Create a reporter.
    pub fn new(quiet: bool, no_progress: bool) -> Self {
        Self { quiet, no_progress, spinner: Mutex::new(None) }
    }

    fn clear_spinner(&self) {
        if let Some(bar) = self.spinner.lock().expect("reporter poisoned").take() {
            bar.finish_and_clear();
        }
    }

    /// Announce a pipeline step and keep a spinner running until the
    /// next step (or [`Reporter::done`]).
    pub fn step(&self, current: usize, total: usize, message: &str) {
        self.clear_spinner();
        if self.quiet {
            return;
        }
        let header = format!("[{current}/{total}]").dimmed();
        if self.no_progress || !io::stderr().is_terminal() {
            println!("{header} {message}...");
            return;
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{prefix} {msg}... {spinner}")
                .expect("valid progress template"),
        );
        bar.set_prefix(header.to_string());
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        *self.spinner.lock().expect("reporter poisoned") = Some(bar);
    }

    /// Finish any running spinner.
    pub fn done(&self) {
        self.clear_spinner();
    }

    /// Print a success line.
    pub fn success(&self, message: &str) {
        self.clear_spinner();
        if !self.quiet {
            println!("{} {message}", "success".green().bold());
        }
    }

    /// Print a warning line. Warnings survive `--quiet`.
    pub fn warn(&self, message: &str) {
        self.clear_spinner();
        eprintln!("{} {message}", "warning".yellow().bold());
    }

    /// Print an informational line.
    pub fn info(&self, message: &str) {
        self.clear_spinner();
        if !self.quiet {
            println!("{} {message}", "info".cyan());
        }
    }

    /// Echo a shell command about to run.
    pub fn command(&self, command: &str) {
        self.clear_spinner();
        if !self.quiet {
            println!("{} {command}", "$".dimmed());
        }
    }
}

impl Disambiguator for Reporter {
    /// Prompt on stdin with a numbered option list. Fails with
    /// [`SpoolError::NonInteractive`] when stdin is not a terminal.
    fn choose(&self, name: &str, options: &[VersionChoice]) -> Result<String> {
        self.clear_spinner();
        if !io::stdin().is_terminal() {
            return Err(SpoolError::NonInteractive { name: name.to_string() }.into());
        }

        println!("Unable to find a suitable version for \"{name}\", please choose one:");
        for (i, option) in options.iter().enumerate() {
            println!("  {}) {}", i + 1, option.label);
        }

        let stdin = io::stdin();
        loop {
            print!("{} ", "Answer?".cyan());
            io::stdout().flush().ok();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Err(SpoolError::NonInteractive { name: name.to_string() }.into());
            }
            match line.trim().parse::<usize>() {
                Ok(i) if i >= 1 && i <= options.len() => {
                    return Ok(options[i - 1].value.clone());
                }
                _ => println!("Please enter a number between 1 and {}.", options.len()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn options() -> Vec<VersionChoice> {
        vec![
            VersionChoice { label: "used by app, version 1.0.0".into(), value: "1.0.0".into() },
            VersionChoice { label: "used by lib, version 2.0.0".into(), value: "2.0.0".into() },
        ]
    }

    #[test]
    fn preset_disambiguator_picks_from_table() {
        let mut choices = BTreeMap::new();
        choices.insert("b".to_string(), "2.0.0".to_string());
        let preset = PresetDisambiguator { choices };
        assert_eq!(preset.choose("b", &options()).unwrap(), "2.0.0");
    }

    #[test]
    fn preset_disambiguator_rejects_unknown_name() {
        let preset = PresetDisambiguator { choices: BTreeMap::new() };
        let err = preset.choose("b", &options()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpoolError>(),
            Some(SpoolError::NonInteractive { .. })
        ));
    }

    #[test]
    fn preset_disambiguator_rejects_version_outside_candidates() {
        let mut choices = BTreeMap::new();
        choices.insert("b".to_string(), "9.9.9".to_string());
        let preset = PresetDisambiguator { choices };
        assert!(preset.choose("b", &options()).is_err());
    }
}
