//! Registry descriptors and manifest data model.
//!
//! Spool recognizes a fixed set of registries. Each registry defines its
//! own root manifest filename in the working directory and its own
//! install folder. Registries are enumerated in a fixed order; request
//! collection consults the first registry whose root manifest exists and
//! stops there (first-found-wins).
//!
//! The [`Manifest`] struct is the shared shape of both root manifests
//! and package manifests: the `spool` registry encodes it as TOML
//! (`spool.toml`), the `acorn` registry as JSON (`acorn.json`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A recognized package registry.
///
/// The variant order is the enumeration order used by request
/// collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// The native registry; root manifest `spool.toml`, folder
    /// `spool_modules`.
    Spool,
    /// The legacy registry; root manifest `acorn.json`, folder
    /// `acorn_modules`.
    Acorn,
}

impl RegistryKind {
    /// All registries, in enumeration order.
    pub const ALL: [RegistryKind; 2] = [RegistryKind::Spool, RegistryKind::Acorn];

    /// The root manifest filename this registry looks for in the
    /// working directory.
    pub const fn manifest_filename(self) -> &'static str {
        match self {
            Self::Spool => "spool.toml",
            Self::Acorn => "acorn.json",
        }
    }

    /// The folder packages of this registry are installed into.
    pub const fn folder(self) -> &'static str {
        match self {
            Self::Spool => "spool_modules",
            Self::Acorn => "acorn_modules",
        }
    }

    /// Lowercase registry name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spool => "spool",
            Self::Acorn => "acorn",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which root-manifest section a top-level pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyOrigin {
    /// `[dependencies]` - always installed.
    Dependencies,
    /// `[dev-dependencies]` - skipped in production mode.
    DevDependencies,
    /// `[optional-dependencies]` - skipped under `--ignore-optional`.
    OptionalDependencies,
}

impl DependencyOrigin {
    /// The manifest section name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::DevDependencies => "dev-dependencies",
            Self::OptionalDependencies => "optional-dependencies",
        }
    }
}

/// A parsed manifest, root or package.
///
/// Both registries share this shape; unknown fields are dropped on read
/// and empty sections are omitted on write. The JSON (`acorn`) encoding
/// additionally accepts the camelCase section names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Package name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Package version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// When true on a root manifest, forces the effective `flat` flag.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub flat: bool,

    /// Supported operating systems; entries may be negated with a
    /// leading `!`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,

    /// Supported CPU architectures; entries may be negated with a
    /// leading `!`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cpu: Vec<String>,

    /// Mirror URL of the package payload, recorded by the index and
    /// carried into the lockfile's `resolved` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,

    /// Runtime dependencies, name -> range.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    /// Development dependencies, name -> range.
    #[serde(
        rename = "dev-dependencies",
        alias = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,

    /// Optional dependencies, name -> range. A failure to resolve,
    /// fetch or link one of these never fails the install.
    #[serde(
        rename = "optional-dependencies",
        alias = "optionalDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,

    /// Pinned versions keyed by package name, used by flat mode.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resolutions: BTreeMap<String, String>,

    /// Lifecycle scripts, phase -> shell command.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,

    /// Engine requirements, engine name -> semver range.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
}

impl Manifest {
    /// The dependency map for a given origin.
    pub fn dependencies_for(&self, origin: DependencyOrigin) -> &BTreeMap<String, String> {
        match origin {
            DependencyOrigin::Dependencies => &self.dependencies,
            DependencyOrigin::DevDependencies => &self.dev_dependencies,
            DependencyOrigin::OptionalDependencies => &self.optional_dependencies,
        }
    }
}

/// A root manifest together with its on-disk identity, as returned by
/// [`crate::config::Config::get_root_manifests`]. Kept so resolutions
/// recorded by the flattener can be written back to the right file.
#[derive(Debug, Clone)]
pub struct RootManifestFile {
    /// The registry this manifest belongs to.
    pub registry: RegistryKind,
    /// Absolute path of the manifest file.
    pub path: PathBuf,
    /// Whether the file existed when read.
    pub exists: bool,
    /// The parsed manifest (default when the file is absent).
    pub manifest: Manifest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_enumeration_order_is_spool_first() {
        assert_eq!(RegistryKind::ALL[0], RegistryKind::Spool);
        assert_eq!(RegistryKind::ALL[0].manifest_filename(), "spool.toml");
        assert_eq!(RegistryKind::ALL[1].manifest_filename(), "acorn.json");
    }

    #[test]
    fn manifest_parses_kebab_case_toml() {
        let manifest: Manifest = toml::from_str(
            r#"
            name = "app"
            version = "1.0.0"
            flat = true

            [dependencies]
            a = "^1.0.0"

            [dev-dependencies]
            b = "~2.0.0"

            [resolutions]
            c = "3.0.0"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.dependencies.get("a").unwrap(), "^1.0.0");
        assert_eq!(manifest.dev_dependencies.get("b").unwrap(), "~2.0.0");
        assert_eq!(manifest.resolutions.get("c").unwrap(), "3.0.0");
        assert!(manifest.flat);
    }

    #[test]
    fn manifest_parses_camel_case_json() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "name": "app",
                "devDependencies": {"b": "^2.0.0"},
                "optionalDependencies": {"c": "^3.0.0"}
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.dev_dependencies.get("b").unwrap(), "^2.0.0");
        assert_eq!(manifest.optional_dependencies.get("c").unwrap(), "^3.0.0");
        assert!(!manifest.flat);
    }

    #[test]
    fn manifest_serialization_omits_empty_sections() {
        let toml = toml::to_string(&Manifest {
            name: Some("app".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(!toml.contains("dependencies"));
        assert!(!toml.contains("flat"));
    }
}
