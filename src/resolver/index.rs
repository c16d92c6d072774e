//! On-disk package index.
//!
//! The resolver reads package metadata from a local index rooted at the
//! `registry-path` option (default `<spool home>/index`):
//!
//! ```text
//! <root>/<registry>/<name>.json          version listing + manifests
//! <root>/<registry>/<name>/<version>/    package payload (files)
//! ```
//!
//! The listing file:
//!
//! ```json
//! {
//!   "name": "left-pad",
//!   "versions": {
//!     "1.3.0": {
//!       "version": "1.3.0",
//!       "dependencies": {"pad-core": "^2.0.0"},
//!       "resolved": "https://mirror.spool.dev/left-pad-1.3.0.tgz#9a0c9b"
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use semver::Version;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::SpoolError;
use crate::registry::{Manifest, RegistryKind};

#[derive(Debug, Deserialize)]
struct IndexListing {
    #[serde(default)]
    #[allow(dead_code)]
    name: Option<String>,
    #[serde(default)]
    versions: BTreeMap<String, Manifest>,
}

/// Read access to the package index.
#[derive(Debug)]
pub struct PackageIndex {
    root: PathBuf,
}

impl PackageIndex {
    /// Index rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn listing_path(&self, registry: RegistryKind, name: &str) -> PathBuf {
        self.root.join(registry.as_str()).join(format!("{name}.json"))
    }

    /// All published versions of a package, ascending.
    ///
    /// Each returned manifest has its `name`/`version` fields filled
    /// in from the listing when the entry omitted them.
    pub fn versions(
        &self,
        registry: RegistryKind,
        name: &str,
    ) -> Result<Vec<(Version, Manifest)>> {
        let path = self.listing_path(registry, name);
        if !path.exists() {
            return Err(SpoolError::PackageNotFound {
                name: name.to_string(),
                registry: registry.to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read index entry: {}", path.display()))?;
        let listing: IndexListing = serde_json::from_str(&content)
            .with_context(|| format!("Invalid index entry: {}", path.display()))?;

        let mut versions = Vec::with_capacity(listing.versions.len());
        for (raw, mut manifest) in listing.versions {
            let version = Version::parse(&raw).with_context(|| {
                format!("Invalid version \"{raw}\" in index entry: {}", path.display())
            })?;
            manifest.name.get_or_insert_with(|| name.to_string());
            manifest.version.get_or_insert_with(|| raw.clone());
            versions.push((version, manifest));
        }
        versions.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(versions)
    }

    /// Directory holding the payload of one published version.
    pub fn payload_dir(&self, registry: RegistryKind, name: &str, version: &str) -> PathBuf {
        self.root.join(registry.as_str()).join(name).join(version)
    }

    /// The index root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_versions_sorted() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("spool");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("a.json"),
            r#"{"name":"a","versions":{"1.10.0":{},"1.2.0":{},"0.9.0":{}}}"#,
        )
        .unwrap();

        let index = PackageIndex::new(temp.path().to_path_buf());
        let versions = index.versions(RegistryKind::Spool, "a").unwrap();
        let raw: Vec<String> = versions.iter().map(|(v, _)| v.to_string()).collect();
        assert_eq!(raw, vec!["0.9.0", "1.2.0", "1.10.0"]);
        assert_eq!(versions[0].1.name.as_deref(), Some("a"));
        assert_eq!(versions[0].1.version.as_deref(), Some("0.9.0"));
    }

    #[test]
    fn unknown_package_is_typed() {
        let temp = TempDir::new().unwrap();
        let index = PackageIndex::new(temp.path().to_path_buf());
        let err = index.versions(RegistryKind::Spool, "ghost").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpoolError>(),
            Some(SpoolError::PackageNotFound { .. })
        ));
    }
}
