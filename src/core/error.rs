//! Error handling for spool.
//!
//! The error system is built around two pieces:
//! 1. [`SpoolError`] - strongly-typed errors for every failure the
//!    orchestrator and its engines can surface
//! 2. [`ErrorContext`] - a display wrapper that adds a suggestion line
//!    for CLI users
//!
//! Engines propagate errors with `anyhow::Result` and `?`; typed
//! variants exist wherever a caller (or a test) needs to distinguish the
//! failure, e.g. the frozen-lockfile violation or the positional-args
//! rejection of `spool install`.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for spool operations.
#[derive(Error, Debug)]
pub enum SpoolError {
    /// `--frozen-lockfile` was set and the integrity check reported
    /// patterns missing from the lockfile.
    #[error(
        "Your lockfile needs to be updated, but spool was run with --frozen-lockfile.\nMissing: {patterns}"
    )]
    FrozenLockfile {
        /// Comma-separated patterns absent from the lockfile.
        patterns: String,
    },

    /// `spool install` was invoked with positional arguments.
    #[error("spool install takes no arguments. Did you mean `{suggestion}`?")]
    PositionalArgsNotAllowed {
        /// The equivalent `spool add` invocation.
        suggestion: String,
    },

    /// Root or package manifest failed to parse.
    #[error("Invalid manifest file syntax in {file}")]
    ManifestParseError {
        /// Path to the manifest file that failed to parse.
        file: String,
        /// Specific reason for the parsing failure.
        reason: String,
    },

    /// Lockfile failed to parse.
    #[error("Invalid lockfile syntax in {file}")]
    LockfileParseError {
        /// Path to the lockfile that failed to parse.
        file: String,
        /// Specific reason for the parsing failure.
        reason: String,
    },

    /// A dependency range uses a non-registry resolver spool cannot
    /// materialize (git/URL/link).
    #[error("Cannot resolve '{pattern}': {kind} ranges are not supported by this build")]
    ExoticRangeUnsupported {
        /// The offending pattern.
        pattern: String,
        /// The detected resolver kind (e.g. "git", "url", "link").
        kind: String,
    },

    /// No version in the index satisfies the requested range.
    #[error("Couldn't find any versions for \"{name}\" that matches \"{range}\"")]
    NoMatchingVersion {
        /// Package name.
        name: String,
        /// The requested range.
        range: String,
    },

    /// Package is absent from the index of its registry.
    #[error("Couldn't find package \"{name}\" in the {registry} registry")]
    PackageNotFound {
        /// Package name.
        name: String,
        /// Registry queried.
        registry: String,
    },

    /// A required package is incompatible with the current platform.
    #[error("The platform \"{platform}\" is incompatible with \"{name}@{version}\"")]
    IncompatiblePlatform {
        /// Package name.
        name: String,
        /// Resolved version.
        version: String,
        /// The os/cpu value that failed.
        platform: String,
    },

    /// A required package declares an engine range the running tool does
    /// not satisfy.
    #[error("\"{name}@{version}\" expects {engine} {range}, found {found}")]
    IncompatibleEngine {
        /// Package name.
        name: String,
        /// Resolved version.
        version: String,
        /// Engine name (e.g. "spool").
        engine: String,
        /// Declared range.
        range: String,
        /// The running version.
        found: String,
    },

    /// A lifecycle or package script exited non-zero.
    #[error("Script \"{phase}\" of \"{name}\" failed with exit code {code}")]
    ScriptFailed {
        /// Package (or project) name the script belongs to.
        name: String,
        /// Lifecycle phase (preinstall/install/postinstall/...).
        phase: String,
        /// Exit code, -1 when terminated by signal.
        code: i32,
        /// Captured stderr of the failing script.
        stderr: String,
    },

    /// An interactive answer was required but stdin is not a terminal.
    #[error("Cannot prompt for \"{name}\": stdin is not a terminal")]
    NonInteractive {
        /// The package name that needed disambiguation.
        name: String,
    },

    /// A pattern was expected to be resolved but is unknown to the
    /// resolver.
    #[error("Internal error: pattern \"{pattern}\" was never resolved")]
    UnresolvedPattern {
        /// The missing pattern.
        pattern: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Semver parsing error.
    #[error("Semver parsing error: {0}")]
    SemverError(#[from] semver::Error),

    /// Other error.
    #[error("{message}")]
    Other {
        /// Free-form message.
        message: String,
    },
}

/// Wrapper that pairs an error with an optional suggestion for display
/// at the CLI boundary.
pub struct ErrorContext {
    /// The underlying error.
    pub error: anyhow::Error,
    /// One-line hint on how to proceed.
    pub suggestion: Option<String>,
}

impl ErrorContext {
    /// Wrap an error with no suggestion.
    pub fn new(error: anyhow::Error) -> Self {
        Self { error, suggestion: None }
    }

    /// Attach a suggestion line.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Print the error (and its chain) to stderr with colors.
    pub fn display(&self) {
        eprintln!("{} {}", "error".red().bold(), self.error);
        for cause in self.error.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".dimmed(), cause);
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("{} {}", "hint:".yellow().bold(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nhint: {suggestion}")?;
        }
        Ok(())
    }
}

/// Convert any error into a user-friendly [`ErrorContext`] with a
/// suggestion keyed off the typed variant, for display at the binary
/// boundary.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let suggestion = match error.downcast_ref::<SpoolError>() {
        Some(SpoolError::FrozenLockfile { .. }) => {
            Some("Run `spool install` without --frozen-lockfile to update the lockfile.".to_string())
        }
        Some(SpoolError::ManifestParseError { file, .. }) => {
            Some(format!("Check {file} for syntax errors."))
        }
        Some(SpoolError::LockfileParseError { .. }) => Some(
            "Delete spool.lock and run `spool install` to regenerate it.".to_string(),
        ),
        Some(SpoolError::NonInteractive { name }) => Some(format!(
            "Add a \"resolutions\" entry for \"{name}\" to your root manifest, or run from a terminal."
        )),
        Some(SpoolError::PackageNotFound { .. } | SpoolError::NoMatchingVersion { .. }) => {
            Some("Check the package name and range in your root manifest.".to_string())
        }
        _ => None,
    };
    ErrorContext { error, suggestion }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_lockfile_message_names_patterns() {
        let err = SpoolError::FrozenLockfile { patterns: "a@^1.0.0, b@^2.0.0".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("--frozen-lockfile"));
        assert!(msg.contains("a@^1.0.0"));
    }

    #[test]
    fn positional_args_message_suggests_add() {
        let err = SpoolError::PositionalArgsNotAllowed {
            suggestion: "spool add foo --dev".to_string(),
        };
        assert!(err.to_string().contains("spool add foo --dev"));
    }

    #[test]
    fn user_friendly_error_attaches_suggestion() {
        let ctx = user_friendly_error(
            SpoolError::FrozenLockfile { patterns: "a".to_string() }.into(),
        );
        assert!(ctx.suggestion.unwrap().contains("--frozen-lockfile"));
    }
}
