//! Opportunistic self-update check.
//!
//! Fired alongside the install pipeline; on completion the orchestrator
//! prints an upgrade hint if one was armed. The check never affects the
//! install outcome: every failure is swallowed after a debug log.
//!
//! The check is skipped when stdout is not a terminal, in CI, when the
//! `disable-self-update-check` option is truthy, when the last check
//! (persisted in the spool home) is younger than 24 hours, or when the
//! running version is a pre-release.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::constants::{
    SELF_UPDATE_URL, SPOOL_VERSION, UPDATE_CHECK_FILENAME, UPDATE_CHECK_INTERVAL_SECS,
};
use crate::reporter::Reporter;
use crate::utils::fs::atomic_write;

/// An available upgrade, armed by the check and consumed once at the
/// end of a successful pipeline.
#[derive(Debug, Clone)]
pub struct UpgradeHint {
    /// The newer version available.
    pub latest: String,
    /// Shell command that performs the upgrade, when the install
    /// method has one.
    pub command: Option<String>,
    /// Installer URL, for methods without a shell command (msi).
    pub url: Option<String>,
}

/// Persisted timestamp of the last completed check.
#[derive(Debug, Serialize, Deserialize)]
struct UpdateCheckState {
    checked_at: DateTime<Utc>,
}

/// Check for a newer release. Never fails; `None` means no hint.
pub async fn check_for_updates(config: Arc<Config>) -> Option<UpgradeHint> {
    match try_check(&config).await {
        Ok(hint) => hint,
        Err(error) => {
            debug!("self-update check failed: {error}");
            None
        }
    }
}

async fn try_check(config: &Config) -> Result<Option<UpgradeHint>> {
    if !std::io::stdout().is_terminal() {
        return Ok(None);
    }
    if std::env::var_os("CI").is_some() {
        return Ok(None);
    }
    if config.get_bool_option("disable-self-update-check") {
        return Ok(None);
    }
    if SPOOL_VERSION.contains('-') {
        return Ok(None);
    }

    let state_path = config.home_dir().join(UPDATE_CHECK_FILENAME);
    if state_path.exists() {
        let content = std::fs::read_to_string(&state_path)?;
        if let Ok(state) = serde_json::from_str::<UpdateCheckState>(&content) {
            let age = Utc::now() - state.checked_at;
            if age < Duration::seconds(UPDATE_CHECK_INTERVAL_SECS) {
                debug!("self-update checked {} seconds ago, skipping", age.num_seconds());
                return Ok(None);
            }
        }
    }

    let url = config
        .get_option("self-update-url")
        .and_then(|value| value.as_str())
        .unwrap_or(SELF_UPDATE_URL)
        .to_string();

    let started = Instant::now();
    let response = reqwest::get(&url).await.context("Version fetch failed")?;
    let status = response.status().as_u16();
    let body = response.text().await.context("Version fetch returned no body")?;
    config.request_manager.record(
        "GET",
        &url,
        status,
        started.elapsed().as_millis() as i64,
    );

    let state = UpdateCheckState { checked_at: Utc::now() };
    atomic_write(&state_path, &serde_json::to_vec_pretty(&state)?)?;

    let latest = Version::parse(body.trim()).context("Endpoint returned a non-semver version")?;
    let current = Version::parse(SPOOL_VERSION)?;
    if latest <= current {
        return Ok(None);
    }

    let method = config
        .get_option("install-method")
        .and_then(|value| value.as_str())
        .map(String::from)
        .or_else(|| std::env::var("SPOOL_INSTALL_METHOD").ok())
        .unwrap_or_else(|| "tar".to_string());
    let (command, hint_url) = upgrade_command(&method, &latest.to_string());
    Ok(Some(UpgradeHint { latest: latest.to_string(), command, url: hint_url }))
}

/// The upgrade command (or installer URL) for an install method.
pub fn upgrade_command(method: &str, latest: &str) -> (Option<String>, Option<String>) {
    let command = match method {
        "tar" => Some("curl -fsSL https://get.spool.dev | sh".to_string()),
        "homebrew" => Some("brew upgrade spool".to_string()),
        "deb" => Some("sudo apt-get update && sudo apt-get install spool".to_string()),
        "rpm" => Some("sudo yum install spool".to_string()),
        "npm" => Some("npm install -g spool".to_string()),
        "chocolatey" => Some("choco upgrade spool".to_string()),
        "apk" => Some("apk add -u spool".to_string()),
        _ => None,
    };
    if command.is_some() {
        return (command, None);
    }
    if method == "msi" {
        return (None, Some(format!("https://releases.spool.dev/spool-{latest}.msi")));
    }
    (None, None)
}

/// Print an armed upgrade hint.
pub fn output_update(hint: &UpgradeHint, reporter: &Reporter) {
    reporter.info(&format!(
        "A new version of spool is available: {} (current {SPOOL_VERSION})",
        hint.latest
    ));
    if let Some(command) = &hint.command {
        reporter.info(&format!("Upgrade with: {command}"));
    } else if let Some(url) = &hint.url {
        reporter.info(&format!("Download the installer from {url}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_command_per_method() {
        assert!(upgrade_command("homebrew", "1.0.0").0.unwrap().contains("brew"));
        assert!(upgrade_command("deb", "1.0.0").0.unwrap().contains("apt-get"));
        let (command, url) = upgrade_command("msi", "1.2.3");
        assert!(command.is_none());
        assert!(url.unwrap().ends_with("spool-1.2.3.msi"));
        assert_eq!(upgrade_command("unknown", "1.0.0"), (None, None));
    }
}
