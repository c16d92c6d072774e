//! Integrity witness: the record that lets a repeated install bail out.
//!
//! After a successful install, a JSON witness summarizing the install
//! is written inside the modules folder: the top-level patterns, the
//! pattern -> resolved map of the lockfile image, the names of the set
//! install-shaping flags, and the modules folders that were populated.
//! The bailout logic compares the witness against the current request;
//! a match means the on-disk state is already what this invocation
//! would produce.
//!
//! The witness is **removed before linking begins and rewritten only on
//! success**, so a crash mid-install leaves the install visibly
//! incomplete and the next run does the full work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Config;
use crate::constants::INTEGRITY_FILENAME;
use crate::flags::EffectiveFlags;
use crate::lockfile::{LockedEntry, Lockfile};
use crate::pattern::pattern_name;
use crate::registry::RegistryKind;
use crate::utils::fs::{atomic_write, ensure_dir};

/// Outcome of an integrity check.
#[derive(Debug)]
pub struct IntegrityCheckResult {
    /// The witness matches the current request and lockfile.
    pub integrity_matches: bool,
    /// No witness file was found in any modules folder.
    pub integrity_file_missing: bool,
    /// Requested patterns with no lockfile record.
    pub missing_patterns: Vec<String>,
}

/// The persisted witness.
#[derive(Debug, Serialize, Deserialize)]
struct IntegrityWitness {
    version: u32,
    /// Sorted top-level patterns of the recorded install.
    top_level_patterns: Vec<String>,
    /// Pattern -> resolved (or version) of the recorded lockfile.
    lockfile: BTreeMap<String, String>,
    /// Names of the set install-shaping flags, fixed order.
    flags: Vec<String>,
    /// Registry folders populated by the recorded install, relative to
    /// the working directory where possible.
    modules_folders: Vec<String>,
    /// Top-level install locations, recorded only under `check-files`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    files: Vec<String>,
}

const WITNESS_VERSION: u32 = 1;

/// Checks, saves and removes the integrity witness.
#[derive(Debug)]
pub struct IntegrityChecker {
    cwd: PathBuf,
    /// Candidate folders in registry enumeration order.
    folders: Vec<(RegistryKind, PathBuf)>,
}

impl IntegrityChecker {
    /// Build a checker for the configured registry folders.
    pub fn new(config: &Config) -> Self {
        let folders = RegistryKind::ALL
            .into_iter()
            .map(|registry| (registry, config.registry_folder(registry)))
            .collect();
        Self { cwd: config.cwd.clone(), folders }
    }

    /// Path the witness would live at for the given used registries:
    /// the folder of the first used registry, or the first registry's
    /// folder when none is used yet.
    fn witness_path(&self, used_registries: &BTreeSet<RegistryKind>) -> PathBuf {
        self.folders
            .iter()
            .find(|(registry, _)| used_registries.contains(registry))
            .or_else(|| self.folders.first())
            .map(|(_, folder)| folder.join(INTEGRITY_FILENAME))
            .expect("at least one registry folder")
    }

    /// Any existing witness file, searched in registry enumeration
    /// order.
    fn find_witness_file(&self) -> Option<PathBuf> {
        self.folders
            .iter()
            .map(|(_, folder)| folder.join(INTEGRITY_FILENAME))
            .find(|path| path.exists())
    }

    fn folder_key(&self, folder: &Path) -> String {
        folder
            .strip_prefix(&self.cwd)
            .unwrap_or(folder)
            .to_string_lossy()
            .into_owned()
    }

    fn lockfile_summary(cache: &BTreeMap<String, LockedEntry>) -> BTreeMap<String, String> {
        cache
            .iter()
            .map(|(pattern, entry)| {
                let resolved = entry.resolved.clone().unwrap_or_else(|| entry.version.clone());
                (pattern.clone(), resolved)
            })
            .collect()
    }

    /// Compare the on-disk witness against the current request.
    ///
    /// # Arguments
    ///
    /// * `used_patterns` - the patterns live in this invocation
    /// * `lockfile` - the loaded lockfile; its cache is compared
    ///   against the recorded summary
    /// * `flags` - compared against the recorded install-shaping flags
    ///
    /// # Returns
    ///
    /// An [`IntegrityCheckResult`]; `missing_patterns` is filled in
    /// whether or not a witness file exists. An unreadable witness
    /// counts as a mismatch, not as missing.
    pub async fn check(
        &self,
        used_patterns: &[String],
        lockfile: &Lockfile,
        flags: &EffectiveFlags,
    ) -> Result<IntegrityCheckResult> {
        let missing_patterns: Vec<String> = used_patterns
            .iter()
            .filter(|pattern| lockfile.get_locked(pattern, true).is_none())
            .cloned()
            .collect();

        let Some(path) = self.find_witness_file() else {
            return Ok(IntegrityCheckResult {
                integrity_matches: false,
                integrity_file_missing: true,
                missing_patterns,
            });
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Cannot read integrity file: {}", path.display()))?;
        let Ok(witness) = serde_json::from_str::<IntegrityWitness>(&content) else {
            debug!("integrity file at {} is unreadable, ignoring it", path.display());
            return Ok(IntegrityCheckResult {
                integrity_matches: false,
                integrity_file_missing: false,
                missing_patterns,
            });
        };

        // Bare lockfile-pinned patterns compare under their pinned key,
        // so the witness stays stable once a lockfile exists.
        let mut expected_patterns: Vec<String> = used_patterns
            .iter()
            .map(|pattern| lockfile.canonical_pattern(pattern).to_string())
            .collect();
        expected_patterns.sort();
        expected_patterns.dedup();

        let mut matches = witness.version == WITNESS_VERSION
            && witness.top_level_patterns == expected_patterns
            && witness.flags == flags.integrity_relevant()
            && witness.lockfile == Self::lockfile_summary(&lockfile.cache);

        // Every recorded modules folder must still exist.
        if matches {
            for folder in &witness.modules_folders {
                if !self.cwd.join(folder).exists() {
                    matches = false;
                    break;
                }
            }
        }

        if matches && flags.check_files {
            for file in &witness.files {
                if !self.cwd.join(file).exists() {
                    debug!("integrity check failed: {file} is missing");
                    matches = false;
                    break;
                }
            }
        }

        Ok(IntegrityCheckResult {
            integrity_matches: matches,
            integrity_file_missing: false,
            missing_patterns,
        })
    }

    /// Write the witness for a finished install.
    ///
    /// # Errors
    ///
    /// Returns an error when the modules folder cannot be created or
    /// the atomic write fails.
    pub async fn save(
        &self,
        top_level_patterns: &[String],
        image: &BTreeMap<String, LockedEntry>,
        flags: &EffectiveFlags,
        used_registries: &BTreeSet<RegistryKind>,
    ) -> Result<()> {
        let mut patterns: Vec<String> = top_level_patterns.to_vec();
        patterns.sort();
        patterns.dedup();

        let modules_folders: Vec<String> = self
            .folders
            .iter()
            .filter(|(registry, _)| used_registries.contains(registry))
            .map(|(_, folder)| self.folder_key(folder))
            .collect();

        let files = if flags.check_files {
            let folder_of: BTreeMap<RegistryKind, &PathBuf> =
                self.folders.iter().map(|(registry, folder)| (*registry, folder)).collect();
            image
                .iter()
                .map(|(pattern, entry)| {
                    let folder = folder_of[&entry.registry];
                    self.folder_key(&folder.join(pattern_name(pattern)))
                })
                .collect()
        } else {
            Vec::new()
        };

        let witness = IntegrityWitness {
            version: WITNESS_VERSION,
            top_level_patterns: patterns,
            lockfile: Self::lockfile_summary(image),
            flags: flags.integrity_relevant(),
            modules_folders,
            files,
        };

        let path = self.witness_path(used_registries);
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let content =
            serde_json::to_vec_pretty(&witness).context("Failed to serialize integrity file")?;
        atomic_write(&path, &content)
            .with_context(|| format!("Cannot write integrity file: {}", path.display()))
    }

    /// Remove any witness file. Called right before linking mutates the
    /// installation tree.
    pub async fn remove_integrity_file(&self) -> Result<()> {
        for (_, folder) in &self.folders {
            let path = folder.join(INTEGRITY_FILENAME);
            if path.exists() {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Cannot remove integrity file: {}", path.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::RawFlags;
    use tempfile::TempDir;

    fn setup(temp: &TempDir) -> (Config, EffectiveFlags) {
        let home = temp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();
        let config = Config::load_with_home(temp.path().to_path_buf(), home, false).unwrap();
        let flags = EffectiveFlags::normalize(&RawFlags::default(), &config);
        (config, flags)
    }

    fn entry(version: &str, resolved: &str) -> LockedEntry {
        LockedEntry {
            version: version.to_string(),
            resolved: Some(resolved.to_string()),
            registry: RegistryKind::Spool,
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn missing_witness_reports_file_missing() {
        let temp = TempDir::new().unwrap();
        let (config, flags) = setup(&temp);
        let checker = IntegrityChecker::new(&config);

        let result =
            checker.check(&["a@^1.0.0".to_string()], &Lockfile::empty(), &flags).await.unwrap();
        assert!(!result.integrity_matches);
        assert!(result.integrity_file_missing);
        assert_eq!(result.missing_patterns, vec!["a@^1.0.0"]);
    }

    #[tokio::test]
    async fn save_then_check_matches() {
        let temp = TempDir::new().unwrap();
        let (config, flags) = setup(&temp);
        let checker = IntegrityChecker::new(&config);

        let patterns = vec!["a@^1.0.0".to_string()];
        let mut image = BTreeMap::new();
        image.insert("a@^1.0.0".to_string(), entry("1.2.0", "https://m/a-1.2.0.tgz#aa"));
        let used: BTreeSet<RegistryKind> = [RegistryKind::Spool].into_iter().collect();

        checker.save(&patterns, &image, &flags, &used).await.unwrap();

        // The lockfile the next run loads is exactly the saved image.
        let lock_path = temp.path().join("spool.lock");
        Lockfile::empty().save(&lock_path, &image).unwrap();
        let lockfile = Lockfile::load(&lock_path).unwrap();

        let result = checker.check(&patterns, &lockfile, &flags).await.unwrap();
        assert!(result.integrity_matches);
        assert!(!result.integrity_file_missing);
        assert!(result.missing_patterns.is_empty());
    }

    #[tokio::test]
    async fn changed_flags_break_the_match() {
        let temp = TempDir::new().unwrap();
        let (config, flags) = setup(&temp);
        let checker = IntegrityChecker::new(&config);

        let patterns = vec!["a@^1.0.0".to_string()];
        let mut image = BTreeMap::new();
        image.insert("a@^1.0.0".to_string(), entry("1.2.0", "https://m/a-1.2.0.tgz#aa"));
        let used: BTreeSet<RegistryKind> = [RegistryKind::Spool].into_iter().collect();
        checker.save(&patterns, &image, &flags, &used).await.unwrap();

        let lock_path = temp.path().join("spool.lock");
        Lockfile::empty().save(&lock_path, &image).unwrap();
        let lockfile = Lockfile::load(&lock_path).unwrap();

        let mut flat_flags = flags.clone();
        flat_flags.flat = true;
        let result = checker.check(&patterns, &lockfile, &flat_flags).await.unwrap();
        assert!(!result.integrity_matches);
    }

    #[tokio::test]
    async fn remove_deletes_witness() {
        let temp = TempDir::new().unwrap();
        let (config, flags) = setup(&temp);
        let checker = IntegrityChecker::new(&config);

        let used: BTreeSet<RegistryKind> = [RegistryKind::Spool].into_iter().collect();
        checker.save(&[], &BTreeMap::new(), &flags, &used).await.unwrap();
        assert!(temp.path().join("spool_modules").join(INTEGRITY_FILENAME).exists());

        checker.remove_integrity_file().await.unwrap();
        assert!(!temp.path().join("spool_modules").join(INTEGRITY_FILENAME).exists());
    }
}
