//! Package fetcher.
//!
//! Materializes every non-ignored resolved package into the package
//! cache (`<spool home>/cache/<registry>/<name>-<version>/`) by copying
//! its payload from the index store (or the `file:` target directory).
//! Fetches run concurrently, bounded by `max(10, 2 x cores)`; a package
//! already in the cache is skipped unless `--force`.
//!
//! After the payload lands, the package's own manifest is re-read from
//! the cache and merged back into the resolver, replacing the index
//! metadata with the authoritative copy.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::constants::{
    CACHE_CHECKSUM_FILENAME, FALLBACK_CORE_COUNT, FETCH_PARALLELISM_CORE_MULTIPLIER,
    MIN_FETCH_PARALLELISM,
};
use crate::registry::{Manifest, RegistryKind};
use crate::resolver::{ReferenceId, Resolver};
use crate::utils::fs::copy_dir_all;

/// Default fetch concurrency.
fn default_parallelism() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(FALLBACK_CORE_COUNT);
    std::cmp::max(MIN_FETCH_PARALLELISM, cores * FETCH_PARALLELISM_CORE_MULTIPLIER)
}

struct FetchJob {
    reference: ReferenceId,
    registry: RegistryKind,
    name: String,
    version: String,
    store_path: PathBuf,
    dest: PathBuf,
}

/// Copies resolved payloads into the cache.
pub struct Fetcher {
    config: Arc<Config>,
}

impl Fetcher {
    /// Fetcher for one install.
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Cache directory of one package version.
    pub fn cache_location(
        config: &Config,
        registry: RegistryKind,
        name: &str,
        version: &str,
    ) -> PathBuf {
        config.cache_dir().join(registry.as_str()).join(format!("{name}-{version}"))
    }

    /// Fetch every non-ignored resolved package, then merge the cached
    /// manifests back into the resolver.
    ///
    /// # Arguments
    ///
    /// * `resolver` - supplies the fetch plan and receives the
    ///   authoritative manifests
    /// * `force` - refresh packages that are already cached
    ///
    /// # Errors
    ///
    /// A failing fetch of an optional package marks it ignored instead
    /// of failing the install; any other failure aborts.
    pub async fn init(&self, resolver: &mut Resolver, force: bool) -> Result<()> {
        let jobs: Vec<FetchJob> = resolver
            .get_manifests()
            .into_iter()
            .filter(|resolved| !resolver.is_ignored(resolved))
            .map(|resolved| {
                let registry = resolver.reference(resolved.reference).registry;
                FetchJob {
                    reference: resolved.reference,
                    registry,
                    name: resolved.name.clone(),
                    version: resolved.version.clone(),
                    store_path: resolved.store_path.clone(),
                    dest: Self::cache_location(
                        &self.config,
                        registry,
                        &resolved.name,
                        &resolved.version,
                    ),
                }
            })
            .collect();

        let config = self.config.clone();
        let results: Vec<(ReferenceId, Result<Manifest>)> = stream::iter(jobs)
            .map(|job| {
                let config = config.clone();
                async move {
                    let reference = job.reference;
                    let outcome = fetch_one(&config, job, force).await;
                    (reference, outcome)
                }
            })
            .buffer_unordered(default_parallelism())
            .collect()
            .await;

        for (reference, outcome) in results {
            match outcome {
                Ok(manifest) => resolver.update_manifest(reference, manifest),
                Err(error) if resolver.reference(reference).optional => {
                    warn!(
                        "skipping optional package {}: {error}",
                        resolver.reference(reference).name
                    );
                    resolver.set_ignore(reference, true);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}

async fn fetch_one(config: &Config, job: FetchJob, force: bool) -> Result<Manifest> {
    if !job.store_path.exists() {
        anyhow::bail!(
            "Payload of {}@{} is missing from the index: {}",
            job.name,
            job.version,
            job.store_path.display()
        );
    }

    if force || !job.dest.exists() {
        if job.dest.exists() {
            std::fs::remove_dir_all(&job.dest).with_context(|| {
                format!("Failed to clear cached package: {}", job.dest.display())
            })?;
        }
        debug!("fetching {}@{} into the cache", job.name, job.version);
        copy_dir_all(&job.store_path, &job.dest, false)?;
        let checksum = checksum_dir(&job.dest)?;
        std::fs::write(job.dest.join(CACHE_CHECKSUM_FILENAME), checksum)
            .with_context(|| format!("Failed to record checksum for {}", job.name))?;
    }

    // The cached copy's manifest is authoritative from here on.
    let manifest_path = job.dest.join(job.registry.manifest_filename());
    if manifest_path.exists() {
        config.read_manifest(&manifest_path, job.registry)
    } else {
        Ok(Manifest {
            name: Some(job.name.clone()),
            version: Some(job.version.clone()),
            ..Default::default()
        })
    }
}

/// SHA-256 over the relative paths and contents of every file in a
/// directory, in sorted order.
fn checksum_dir(dir: &std::path::Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    entries.sort();
    for path in entries {
        let relative = path.strip_prefix(dir).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(std::fs::read(&path)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::Lockfile;
    use crate::resolver::DependencyRequest;
    use crate::test_utils::{test_config, IndexBuilder};
    use tempfile::TempDir;

    fn request(pattern: &str) -> DependencyRequest {
        DependencyRequest {
            pattern: pattern.to_string(),
            registry: RegistryKind::Spool,
            hint: None,
            optional: false,
            parent: None,
        }
    }

    #[tokio::test]
    async fn fetches_into_cache_and_merges_manifest() {
        let temp = TempDir::new().unwrap();
        let config = Arc::new(test_config(&temp));
        IndexBuilder::new(&config).package("a", "1.0.0", &[], None).write();

        let mut resolver = Resolver::new(config.clone(), Arc::new(Lockfile::empty()));
        resolver.init(vec![request("a@^1.0.0")], false).await.unwrap();

        Fetcher::new(config.clone()).init(&mut resolver, false).await.unwrap();

        let cached = Fetcher::cache_location(&config, RegistryKind::Spool, "a", "1.0.0");
        assert!(cached.join("lib.txt").exists());
        assert!(cached.join(CACHE_CHECKSUM_FILENAME).exists());
        let resolved = resolver.get_resolved_pattern("a@^1.0.0").unwrap();
        assert_eq!(resolved.manifest.version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn ignored_packages_are_not_fetched() {
        let temp = TempDir::new().unwrap();
        let config = Arc::new(test_config(&temp));
        IndexBuilder::new(&config).package("a", "1.0.0", &[], None).write();

        let mut resolver = Resolver::new(config.clone(), Arc::new(Lockfile::empty()));
        resolver.init(vec![request("a@^1.0.0")], false).await.unwrap();
        let reference = resolver.get_resolved_pattern("a@^1.0.0").unwrap().reference;
        resolver.set_ignore(reference, true);

        Fetcher::new(config.clone()).init(&mut resolver, false).await.unwrap();
        assert!(!Fetcher::cache_location(&config, RegistryKind::Spool, "a", "1.0.0").exists());
    }

    #[test]
    fn checksum_is_stable() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("x.txt"), "x").unwrap();
        let first = checksum_dir(temp.path()).unwrap();
        let second = checksum_dir(temp.path()).unwrap();
        assert_eq!(first, second);
    }
}
