//! Shared helpers for unit and integration tests.
//!
//! Available to integration tests through the `test-utils` feature.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::config::Config;
use crate::registry::{Manifest, RegistryKind};
use crate::utils::fs::ensure_dir;

/// A [`Config`] rooted in a temp dir, with its spool home at
/// `<temp>/home` so nothing touches the real user directories.
pub fn test_config(temp: &TempDir) -> Config {
    let home = temp.path().join("home");
    ensure_dir(&home).unwrap();
    Config::load_with_home(temp.path().to_path_buf(), home, false).unwrap()
}

/// Like [`test_config`], with extra lines appended to the option table
/// before loading.
pub fn test_config_with_options(temp: &TempDir, options: &str) -> Config {
    let home = temp.path().join("home");
    ensure_dir(&home).unwrap();
    std::fs::write(home.join("config.toml"), options).unwrap();
    Config::load_with_home(temp.path().to_path_buf(), home, false).unwrap()
}

/// Builds an on-disk package index under the config's index root.
///
/// Each published package gets a listing entry and a payload directory
/// containing its own manifest file plus a `lib.txt` body.
pub struct IndexBuilder {
    root: PathBuf,
    packages: Vec<(RegistryKind, Manifest)>,
}

impl IndexBuilder {
    /// Builder writing into `config.index_root()`.
    pub fn new(config: &Config) -> Self {
        Self { root: config.index_root(), packages: Vec::new() }
    }

    /// Publish a package in the `spool` registry with plain runtime
    /// dependencies.
    #[must_use]
    pub fn package(
        self,
        name: &str,
        version: &str,
        deps: &[(&str, &str)],
        resolved: Option<&str>,
    ) -> Self {
        let manifest = Manifest {
            name: Some(name.to_string()),
            version: Some(version.to_string()),
            dependencies: deps
                .iter()
                .map(|(n, r)| (n.to_string(), r.to_string()))
                .collect(),
            resolved: resolved.map(String::from),
            ..Default::default()
        };
        self.package_manifest(RegistryKind::Spool, manifest)
    }

    /// Publish a fully specified manifest; `name` and `version` must be
    /// set.
    #[must_use]
    pub fn package_manifest(mut self, registry: RegistryKind, manifest: Manifest) -> Self {
        assert!(manifest.name.is_some() && manifest.version.is_some());
        self.packages.push((registry, manifest));
        self
    }

    /// Write the index to disk. Panics on I/O failure, as test helpers
    /// do.
    pub fn write(self) {
        use std::collections::BTreeMap;

        let mut listings: BTreeMap<(RegistryKind, String), BTreeMap<String, &Manifest>> =
            BTreeMap::new();
        for (registry, manifest) in &self.packages {
            let name = manifest.name.clone().unwrap();
            let version = manifest.version.clone().unwrap();
            listings.entry((*registry, name)).or_default().insert(version, manifest);
        }

        for ((registry, name), versions) in listings {
            let registry_dir = self.root.join(registry.as_str());
            ensure_dir(&registry_dir).unwrap();

            let listing = serde_json::json!({
                "name": &name,
                "versions": &versions,
            });
            std::fs::write(
                registry_dir.join(format!("{name}.json")),
                serde_json::to_vec_pretty(&listing).unwrap(),
            )
            .unwrap();

            for (version, manifest) in &versions {
                let payload = registry_dir.join(&name).join(version);
                ensure_dir(&payload).unwrap();
                let encoded = match registry {
                    RegistryKind::Spool => toml::to_string_pretty(manifest).unwrap(),
                    RegistryKind::Acorn => serde_json::to_string_pretty(manifest).unwrap(),
                };
                std::fs::write(payload.join(registry.manifest_filename()), encoded).unwrap();
                std::fs::write(payload.join("lib.txt"), format!("{name} {version}\n")).unwrap();
            }
        }
    }
}
