//! Linker: materializes the on-disk installation tree.
//!
//! Every non-ignored resolved package is copied from the cache into its
//! registry's folder. One version per name is hoisted to the top
//! (`<folder>/<name>`); any other surviving versions land under
//! `<folder>/.versions/<name>-<version>`. With `--link-duplicates`,
//! files are hard-linked from the cache where the filesystem allows it.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::constants::VERSIONS_DIRNAME;
use crate::fetcher::Fetcher;
use crate::registry::RegistryKind;
use crate::resolver::Resolver;
use crate::utils::fs::{copy_dir_all, ensure_dir};

/// Install destination of every non-ignored package, keyed by
/// `(registry, name, version)`.
///
/// The highest version of each name is the hoisted representative;
/// shared with the script runner so scripts run where their package
/// actually lives.
pub fn install_plan(
    config: &Config,
    resolver: &Resolver,
) -> BTreeMap<(RegistryKind, String, String), PathBuf> {
    // Group surviving versions by (registry, name).
    let mut by_name: BTreeMap<(RegistryKind, String), Vec<String>> = BTreeMap::new();
    for resolved in resolver.get_manifests() {
        if resolver.is_ignored(resolved) {
            continue;
        }
        let registry = resolver.reference(resolved.reference).registry;
        let versions = by_name.entry((registry, resolved.name.clone())).or_default();
        if !versions.contains(&resolved.version) {
            versions.push(resolved.version.clone());
        }
    }

    let mut plan = BTreeMap::new();
    for ((registry, name), mut versions) in by_name {
        versions.sort_by(|a, b| {
            let left = semver::Version::parse(a).ok();
            let right = semver::Version::parse(b).ok();
            left.cmp(&right)
        });
        let hoisted = versions.last().cloned().expect("non-empty version group");
        let folder = config.registry_folder(registry);
        for version in versions {
            let dest = if version == hoisted {
                folder.join(&name)
            } else {
                folder.join(VERSIONS_DIRNAME).join(format!("{name}-{version}"))
            };
            plan.insert((registry, name.clone(), version), dest);
        }
    }
    plan
}

/// Copies cached packages into the modules folders.
pub struct Linker {
    config: Arc<Config>,
}

impl Linker {
    /// Linker for one install.
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Materialize the tree. `top_patterns` is the flattened top-level
    /// pattern list the pipeline resolved; it pins the set of names
    /// that must exist even when nothing depends on them.
    pub async fn init(
        &self,
        resolver: &Resolver,
        top_patterns: &[String],
        link_duplicates: bool,
    ) -> Result<()> {
        for pattern in top_patterns {
            // Every top-level pattern must be materializable.
            resolver.get_strict_resolved_pattern(pattern)?;
        }

        let plan = install_plan(&self.config, resolver);
        for ((registry, name, version), dest) in &plan {
            let cached = Fetcher::cache_location(&self.config, *registry, name, version);
            debug!("linking {name}@{version} into {}", dest.display());
            if dest.exists() {
                std::fs::remove_dir_all(dest)?;
            }
            if let Some(parent) = dest.parent() {
                ensure_dir(parent)?;
            }
            copy_dir_all(&cached, dest, link_duplicates)?;
        }
        Ok(())
    }
}
