//! Install configuration.
//!
//! [`Config`] is the shared input of one install invocation: the
//! working directory, production mode, the persisted option table from
//! `<spool home>/config.toml`, the registry descriptors, root-manifest
//! I/O, the offline-mirror location and its pruning, and the request
//! log consumed by the HAR step.
//!
//! # Locations
//!
//! - Spool home: `$SPOOL_HOME` or `~/.spool`
//! - Option table: `<home>/config.toml` (see [`GlobalConfig`])
//! - Package index: `registry-path` option or `<home>/index`
//! - Package cache: `<home>/cache`
//!
//! The option table is read once at load time; lookups afterwards are
//! in-memory and infallible.

mod global;
mod requests;

pub use global::{value_is_truthy, GlobalConfig};
pub use requests::{RecordedRequest, RequestManager};

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::{CACHE_DIRNAME, INDEX_DIRNAME};
use crate::core::SpoolError;
use crate::lockfile::LockedEntry;
use crate::registry::{Manifest, RegistryKind, RootManifestFile};
use crate::utils::fs::{atomic_write, url_basename};

/// Shared configuration of one install invocation.
#[derive(Debug)]
pub struct Config {
    /// Working directory the install mutates.
    pub cwd: PathBuf,
    /// Production mode: dev dependencies are not installed.
    pub production: bool,
    /// Request log for the HAR step.
    pub request_manager: RequestManager,
    home: PathBuf,
    global: GlobalConfig,
}

impl Config {
    /// Load configuration for `cwd`.
    ///
    /// The spool home is `$SPOOL_HOME` when set, `~/.spool` otherwise.
    /// Production mode is the given flag or a truthy
    /// `SPOOL_PRODUCTION` environment variable.
    ///
    /// # Arguments
    ///
    /// * `cwd` - the working directory the install mutates
    /// * `production` - the `--production` flag value
    ///
    /// # Errors
    ///
    /// Returns an error when the home directory cannot be determined
    /// or the option table in `<home>/config.toml` fails to parse.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use spool_cli::config::Config;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = Config::load(std::env::current_dir()?, false)?;
    /// println!("installing into {}", config.cwd.display());
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(cwd: PathBuf, production: bool) -> Result<Self> {
        let home = match std::env::var_os("SPOOL_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".spool"),
        };
        let production = production
            || std::env::var("SPOOL_PRODUCTION").map(|v| v == "1" || v == "true").unwrap_or(false);
        Self::load_with_home(cwd, home, production)
    }

    /// Load configuration with an explicit spool home. Used directly by
    /// tests; [`Config::load`] resolves the home from the environment.
    ///
    /// # Arguments
    ///
    /// * `cwd` - the working directory the install mutates
    /// * `home` - the spool home holding `config.toml`, the index and
    ///   the cache
    /// * `production` - whether dev dependencies are skipped
    pub fn load_with_home(cwd: PathBuf, home: PathBuf, production: bool) -> Result<Self> {
        let global = GlobalConfig::load(&home.join("config.toml"))?;
        Ok(Self { cwd, production, request_manager: RequestManager::default(), home, global })
    }

    /// The spool home directory.
    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    /// Raw option lookup.
    pub fn get_option(&self, name: &str) -> Option<&toml::Value> {
        self.global.get(name)
    }

    /// Truthiness of an option; absent options are falsy.
    pub fn get_bool_option(&self, name: &str) -> bool {
        self.global.get(name).map(value_is_truthy).unwrap_or(false)
    }

    /// String value of an option, with `~` and environment variables
    /// expanded.
    pub fn get_path_option(&self, name: &str) -> Option<PathBuf> {
        let raw = self.global.get(name)?.as_str()?;
        let expanded = shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string());
        let path = PathBuf::from(expanded);
        Some(if path.is_absolute() { path } else { self.cwd.join(path) })
    }

    /// Root of the on-disk package index the resolver reads.
    pub fn index_root(&self) -> PathBuf {
        self.get_path_option("registry-path").unwrap_or_else(|| self.home.join(INDEX_DIRNAME))
    }

    /// Directory fetched package payloads are cached in.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join(CACHE_DIRNAME)
    }

    /// The install folder of a registry, honoring the `modules-folder`
    /// override.
    pub fn registry_folder(&self, registry: RegistryKind) -> PathBuf {
        match self.get_path_option("modules-folder") {
            Some(folder) => folder,
            None => self.cwd.join(registry.folder()),
        }
    }

    /// The offline mirror directory, when the `offline-mirror` option
    /// is set.
    pub fn get_offline_mirror_path(&self) -> Option<PathBuf> {
        self.get_path_option("offline-mirror")
    }

    /// Delete every file under the offline mirror whose basename is not
    /// referenced by a locked `resolved` field (after `#hash`
    /// stripping).
    ///
    /// # Arguments
    ///
    /// * `image` - the lockfile image about to be persisted; its
    ///   `resolved` URLs define the required tarball basenames
    ///
    /// # Returns
    ///
    /// The removed paths; empty when no mirror is configured.
    ///
    /// # Errors
    ///
    /// Returns an error when the mirror directory cannot be read or a
    /// stale file cannot be deleted.
    pub fn prune_offline_mirror(
        &self,
        image: &BTreeMap<String, LockedEntry>,
    ) -> Result<Vec<PathBuf>> {
        let Some(mirror) = self.get_offline_mirror_path() else {
            return Ok(Vec::new());
        };

        let required: BTreeSet<String> = image
            .values()
            .filter_map(|entry| entry.resolved.as_deref())
            .map(url_basename)
            .collect();

        let mut removed = Vec::new();
        for file in crate::utils::fs::files_in_dir(&mirror)? {
            let basename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !required.contains(&basename) {
                debug!("pruning stale mirror tarball {}", file.display());
                std::fs::remove_file(&file).with_context(|| {
                    format!("Failed to prune mirror file: {}", file.display())
                })?;
                removed.push(file);
            }
        }
        Ok(removed)
    }

    /// Read and parse a JSON file.
    pub fn read_json(&self, path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))
    }

    /// Read and parse a manifest in the encoding of its registry:
    /// TOML for `spool`, JSON for `acorn`.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::ManifestParseError`] on malformed content
    /// and a read error when the file is unreadable.
    pub fn read_manifest(&self, path: &Path, registry: RegistryKind) -> Result<Manifest> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read manifest: {}", path.display()))?;
        let parsed = match registry {
            RegistryKind::Spool => toml::from_str(&content).map_err(|e| e.to_string()),
            RegistryKind::Acorn => serde_json::from_str(&content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|reason| {
            SpoolError::ManifestParseError { file: path.display().to_string(), reason }.into()
        })
    }

    /// The root manifest of every registry, in enumeration order, with
    /// an `exists` marker for the absent ones.
    ///
    /// # Returns
    ///
    /// One [`RootManifestFile`] per registry; absent files carry a
    /// default manifest.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing root manifest fails to read
    /// or parse.
    pub fn get_root_manifests(&self) -> Result<Vec<RootManifestFile>> {
        let mut manifests = Vec::new();
        for registry in RegistryKind::ALL {
            let path = self.cwd.join(registry.manifest_filename());
            let exists = path.exists();
            let manifest =
                if exists { self.read_manifest(&path, registry)? } else { Manifest::default() };
            manifests.push(RootManifestFile { registry, path, exists, manifest });
        }
        Ok(manifests)
    }

    /// Write the existing root manifests back to disk in their
    /// registry's encoding. Used after the flattener records new
    /// resolutions.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the atomic write fails;
    /// files whose `exists` marker is unset are skipped, not created.
    pub fn save_root_manifests(&self, manifests: &[RootManifestFile]) -> Result<()> {
        for file in manifests.iter().filter(|f| f.exists) {
            let content = match file.registry {
                RegistryKind::Spool => toml::to_string_pretty(&file.manifest)?,
                RegistryKind::Acorn => {
                    let mut json = serde_json::to_string_pretty(&file.manifest)?;
                    json.push('\n');
                    json
                }
            };
            atomic_write(&file.path, content.as_bytes()).with_context(|| {
                format!("Failed to save root manifest: {}", file.path.display())
            })?;
        }
        Ok(())
    }

    /// Lifecycle scripts of the first root manifest found in `cwd`.
    pub fn root_lifecycle_scripts(&self) -> Result<BTreeMap<String, String>> {
        for registry in RegistryKind::ALL {
            let path = self.cwd.join(registry.manifest_filename());
            if path.exists() {
                return Ok(self.read_manifest(&path, registry)?.scripts);
            }
        }
        Ok(BTreeMap::new())
    }
}
