//! Lockfile management for reproducible installations.
//!
//! The lockfile (`spool.lock`) is an ordered mapping from pattern to a
//! locked record pinning the exact resolved coordinates of every
//! package in the tree. The orchestrator consults it during request
//! collection and resolution, treats it as canonical under
//! `--frozen-lockfile`, and rewrites it at the end of a successful
//! install unless nothing changed.
//!
//! # Format
//!
//! TOML, one table per pattern:
//!
//! ```toml
//! # Auto-generated lockfile - DO NOT EDIT
//! ["left-pad@^1.0.0"]
//! version = "1.3.0"
//! resolved = "https://mirror.spool.dev/left-pad-1.3.0.tgz#9a0c9b"
//! registry = "spool"
//!
//! ["left-pad@^1.0.0".dependencies]
//! pad-core = "^2.0.0"
//! ```
//!
//! Saves preserve the newline style of the previous file and go through
//! an atomic temp-file rename.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::SpoolError;
use crate::pattern::{pattern_name, split_pattern};
use crate::registry::RegistryKind;
use crate::utils::fs::atomic_write;

/// Newline style of the on-disk lockfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Newline {
    /// Unix newlines.
    Lf,
    /// Windows newlines.
    CrLf,
}

/// One locked record: the exact coordinates a pattern resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedEntry {
    /// Exact resolved version.
    pub version: String,
    /// Mirror URL of the payload, with a `#<hash>` integrity suffix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    /// Registry the package came from.
    pub registry: RegistryKind,
    /// Runtime dependencies of the locked version.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Optional dependencies of the locked version.
    #[serde(
        default,
        rename = "optional-dependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,
}

/// The parsed lockfile plus its on-disk identity.
#[derive(Debug)]
pub struct Lockfile {
    /// Pattern -> locked record. Empty when no lockfile was loaded.
    pub cache: BTreeMap<String, LockedEntry>,
    /// Whether a lockfile file existed on disk when loaded.
    pub present: bool,
    newline: Newline,
}

impl Lockfile {
    /// An empty, absent lockfile.
    pub fn empty() -> Self {
        Self { cache: BTreeMap::new(), present: false, newline: Newline::Lf }
    }

    /// Load the lockfile at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - typically `<cwd>/spool.lock`
    ///
    /// # Returns
    ///
    /// The parsed lockfile with `present` set; a missing file yields
    /// [`Lockfile::empty`], an empty file a present-but-empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::LockfileParseError`] on malformed TOML,
    /// with a regeneration hint attached.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use spool_cli::lockfile::Lockfile;
    /// use std::path::Path;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let lockfile = Lockfile::load(Path::new("spool.lock"))?;
    /// println!("{} locked patterns", lockfile.cache.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read lockfile: {}", path.display()))?;
        let newline = if content.contains("\r\n") { Newline::CrLf } else { Newline::Lf };

        if content.trim().is_empty() {
            return Ok(Self { cache: BTreeMap::new(), present: true, newline });
        }

        let cache: BTreeMap<String, LockedEntry> = toml::from_str(&content)
            .map_err(|e| SpoolError::LockfileParseError {
                file: path.display().to_string(),
                reason: e.to_string(),
            })
            .with_context(|| {
                format!(
                    "Invalid lockfile: {}\n\n\
                     Delete it and run 'spool install' to regenerate it.",
                    path.display()
                )
            })?;

        Ok(Self { cache, present: true, newline })
    }

    /// Look up the locked record of a pattern.
    ///
    /// # Arguments
    ///
    /// * `pattern` - an exact lockfile key, or a bare name with
    ///   `ignore_version`
    /// * `ignore_version` - also match any entry whose name part
    ///   equals `pattern`; this is how request collection decides
    ///   whether a dependency is already pinned
    ///
    /// # Returns
    ///
    /// The locked record, or `None` when nothing matches.
    pub fn get_locked(&self, pattern: &str, ignore_version: bool) -> Option<&LockedEntry> {
        if let Some(entry) = self.cache.get(pattern) {
            return Some(entry);
        }
        if ignore_version {
            return self
                .cache
                .iter()
                .find(|(key, _)| pattern_name(key) == pattern)
                .map(|(_, entry)| entry);
        }
        None
    }

    /// The lockfile key whose name part equals `name`, if any.
    pub fn locked_key(&self, name: &str) -> Option<&str> {
        self.cache
            .keys()
            .find(|key| pattern_name(key) == name)
            .map(String::as_str)
    }

    /// Canonical spelling of a pattern against this lockfile: a bare
    /// name maps onto its existing lockfile key, everything else is
    /// returned unchanged.
    ///
    /// Root patterns are collected bare once the lockfile pins their
    /// name; canonicalizing them back onto the pinned key keeps the
    /// lockfile image and the integrity witness stable across runs.
    pub fn canonical_pattern<'a>(&'a self, pattern: &'a str) -> &'a str {
        match split_pattern(pattern) {
            (_, Some(_)) => pattern,
            (name, None) => self.locked_key(name).unwrap_or(pattern),
        }
    }

    /// Whether a candidate image is already represented by this
    /// lockfile.
    ///
    /// # Returns
    ///
    /// `true` when every candidate pattern has an entry and the
    /// entries agree on `resolved`; the skip-write optimization keys
    /// off this.
    pub fn matches_image(&self, image: &BTreeMap<String, LockedEntry>) -> bool {
        image.iter().all(|(pattern, candidate)| {
            self.cache
                .get(pattern)
                .is_some_and(|existing| existing.resolved == candidate.resolved)
        })
    }

    /// Serialize `image` to `path`, preserving the newline style of the
    /// previously loaded file.
    ///
    /// # Arguments
    ///
    /// * `path` - the lockfile location, typically `<cwd>/spool.lock`
    /// * `image` - the candidate image computed from the resolver
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the atomic write fails.
    pub fn save(&self, path: &Path, image: &BTreeMap<String, LockedEntry>) -> Result<()> {
        let mut content = String::from("# Auto-generated lockfile - DO NOT EDIT\n");
        content.push_str(&toml::to_string(image).context("Failed to serialize lockfile")?);
        if self.newline == Newline::CrLf {
            content = content.replace('\n', "\r\n");
        }
        atomic_write(path, content.as_bytes())
            .with_context(|| format!("Cannot write lockfile: {}", path.display()))
    }
}
