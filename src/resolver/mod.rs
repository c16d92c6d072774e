//! Dependency resolution.
//!
//! The resolver turns dependency requests into a table of resolved
//! manifests keyed by pattern. Resolution is lockfile-first: a pattern
//! with a locked record resolves to the locked version, otherwise the
//! highest index version satisfying the range wins. Transitive runtime
//! and optional dependencies are resolved breadth-first; dev
//! dependencies of non-root packages never resolve.
//!
//! # Reference records
//!
//! Every resolved package owns a [`PackageReference`] addressed by a
//! stable [`ReferenceId`]; resolved manifests carry the id rather than
//! a pointer. The reference accumulates every request and pattern that
//! landed on the package, which is what ignore marking and flat-mode
//! disambiguation read.

mod index;

pub use index::PackageIndex;

use anyhow::Result;
use semver::{Version, VersionReq};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::SpoolError;
use crate::lockfile::{LockedEntry, Lockfile};
use crate::pattern::{make_pattern, split_pattern};
use crate::registry::{Manifest, RegistryKind};

/// Stable index of a [`PackageReference`] in the resolver.
pub type ReferenceId = usize;

/// Where a dependency request points and who asked for it.
#[derive(Debug, Clone)]
pub struct DependencyRequest {
    /// The textual descriptor, `name` or `name@range`.
    pub pattern: String,
    /// Registry the request targets.
    pub registry: RegistryKind,
    /// Origin hint from the root manifest, if any.
    pub hint: Option<RequestHint>,
    /// Whether a failure to materialize this request is tolerated.
    pub optional: bool,
    /// Pattern of the requesting package; `None` for root requests.
    pub parent: Option<String>,
}

/// Root-manifest origin hint carried on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestHint {
    /// Came from `dev-dependencies`.
    Dev,
    /// Came from `optional-dependencies`.
    Optional,
}

/// Shared bookkeeping of one resolved package.
#[derive(Debug)]
pub struct PackageReference {
    /// Package name.
    pub name: String,
    /// Registry the package resolved in.
    pub registry: RegistryKind,
    /// Every request that landed on this package.
    pub requests: Vec<DependencyRequest>,
    /// Every pattern that resolved to this package.
    pub patterns: Vec<String>,
    /// Marked by the ignore marker and the compatibility check; ignored
    /// packages are neither fetched, linked nor scripted.
    pub ignore: bool,
    /// Whether every requester tolerates this package failing.
    pub optional: bool,
}

/// One resolved package version.
#[derive(Debug)]
pub struct ResolvedManifest {
    /// Package name.
    pub name: String,
    /// Exact resolved version.
    pub version: String,
    /// Reference record index.
    pub reference: ReferenceId,
    /// The package manifest as known so far (index metadata until the
    /// fetcher merges the authoritative copy).
    pub manifest: Manifest,
    /// Directory the payload is copied from.
    pub store_path: PathBuf,
}

/// Classify an exotic (non-registry) range. `None` means a plain
/// registry range.
pub fn exotic_kind(range: &str) -> Option<&'static str> {
    if range.starts_with("file:") {
        Some("file")
    } else if range.starts_with("link:") {
        Some("link")
    } else if range.starts_with("git+") || range.starts_with("git://") {
        Some("git")
    } else if range.contains("://") {
        Some("url")
    } else {
        None
    }
}

/// Whether a range uses a non-registry resolver.
pub fn is_exotic_range(range: &str) -> bool {
    exotic_kind(range).is_some()
}

/// Whether a pattern's range (if any) uses a non-registry resolver.
pub fn is_exotic_pattern(pattern: &str) -> bool {
    split_pattern(pattern).1.is_some_and(is_exotic_range)
}

/// The dependency resolver; one instance per install.
pub struct Resolver {
    config: Arc<Config>,
    lockfile: Arc<Lockfile>,
    index: PackageIndex,
    flat: bool,
    /// Pattern -> slot in `manifests`.
    patterns: BTreeMap<String, usize>,
    manifests: Vec<ResolvedManifest>,
    references: Vec<PackageReference>,
    /// Package name -> patterns that touch it.
    pub patterns_by_package: BTreeMap<String, Vec<String>>,
    /// Registries that contributed at least one resolved package.
    pub used_registries: BTreeSet<RegistryKind>,
    /// (registry, name, version) -> slot, for request coalescing.
    slot_by_key: BTreeMap<(RegistryKind, String, String), usize>,
}

impl Resolver {
    /// Create a resolver reading the configured package index.
    ///
    /// # Arguments
    ///
    /// * `config` - supplies the index root and the working directory
    ///   `file:` ranges resolve against
    /// * `lockfile` - consulted first for every pattern; an empty
    ///   lockfile means every range resolves fresh
    pub fn new(config: Arc<Config>, lockfile: Arc<Lockfile>) -> Self {
        let index = PackageIndex::new(config.index_root());
        Self {
            config,
            lockfile,
            index,
            flat: false,
            patterns: BTreeMap::new(),
            manifests: Vec::new(),
            references: Vec::new(),
            patterns_by_package: BTreeMap::new(),
            used_registries: BTreeSet::new(),
            slot_by_key: BTreeMap::new(),
        }
    }

    /// Resolve the given requests and, breadth-first, everything they
    /// transitively depend on.
    ///
    /// # Arguments
    ///
    /// * `requests` - the root requests emitted by request collection
    /// * `flat` - whether this install runs in flat mode
    ///
    /// # Errors
    ///
    /// Fails on an unknown package, an unsatisfiable range or an
    /// unsupported exotic range, unless every requester of the failing
    /// pattern is optional, in which case the pattern is skipped with a
    /// warning.
    pub async fn init(&mut self, requests: Vec<DependencyRequest>, flat: bool) -> Result<()> {
        self.flat = flat;
        debug!("resolving {} root requests (flat: {})", requests.len(), self.flat);
        let mut queue: VecDeque<DependencyRequest> = requests.into();

        while let Some(request) = queue.pop_front() {
            if let Some(&slot) = self.patterns.get(&request.pattern) {
                // Another requester for an already-resolved pattern.
                let reference = self.manifests[slot].reference;
                self.references[reference].optional &= request.optional;
                self.references[reference].requests.push(request);
                continue;
            }
            match self.resolve_one(&request) {
                Ok((slot, created)) => {
                    if created {
                        self.enqueue_children(slot, &mut queue);
                    }
                }
                Err(error) if request.optional => {
                    warn!("skipping optional dependency {}: {error}", request.pattern);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Resolve a single request into a slot, creating or reusing the
    /// manifest and its reference record. The second return value is
    /// true when the slot is new and its dependencies still need
    /// resolving.
    fn resolve_one(&mut self, request: &DependencyRequest) -> Result<(usize, bool)> {
        let (name, range) = split_pattern(&request.pattern);
        let (version, manifest, store_path) = match range {
            Some(range) if is_exotic_range(range) => self.resolve_exotic(request, name, range)?,
            _ => self.resolve_registry(request, name, range)?,
        };

        let key = (request.registry, name.to_string(), version.clone());
        let mut created = false;
        let slot = if let Some(&slot) = self.slot_by_key.get(&key) {
            // Same package version reached through a different pattern.
            let reference = self.manifests[slot].reference;
            self.references[reference].optional &= request.optional;
            self.references[reference].requests.push(request.clone());
            self.references[reference].patterns.push(request.pattern.clone());
            slot
        } else {
            let reference = self.references.len();
            self.references.push(PackageReference {
                name: name.to_string(),
                registry: request.registry,
                requests: vec![request.clone()],
                patterns: vec![request.pattern.clone()],
                ignore: false,
                optional: request.optional,
            });
            let slot = self.manifests.len();
            self.manifests.push(ResolvedManifest {
                name: name.to_string(),
                version: version.clone(),
                reference,
                manifest,
                store_path,
            });
            self.slot_by_key.insert(key, slot);
            created = true;
            slot
        };

        debug!("resolved {} to {}@{}", request.pattern, name, version);
        self.patterns.insert(request.pattern.clone(), slot);
        let by_package = self.patterns_by_package.entry(name.to_string()).or_default();
        if !by_package.contains(&request.pattern) {
            by_package.push(request.pattern.clone());
        }
        self.used_registries.insert(request.registry);
        Ok((slot, created))
    }

    fn resolve_exotic(
        &self,
        request: &DependencyRequest,
        name: &str,
        range: &str,
    ) -> Result<(String, Manifest, PathBuf)> {
        let kind = exotic_kind(range).unwrap_or("unknown");
        if kind != "file" {
            return Err(SpoolError::ExoticRangeUnsupported {
                pattern: request.pattern.clone(),
                kind: kind.to_string(),
            }
            .into());
        }

        let target = self.config.cwd.join(range.trim_start_matches("file:"));
        let manifest_path = target.join(request.registry.manifest_filename());
        let manifest = if manifest_path.exists() {
            self.config.read_manifest(&manifest_path, request.registry)?
        } else {
            Manifest { name: Some(name.to_string()), ..Default::default() }
        };
        let version = manifest.version.clone().unwrap_or_else(|| "0.0.0".to_string());
        Ok((version, manifest, target))
    }

    fn resolve_registry(
        &self,
        request: &DependencyRequest,
        name: &str,
        range: Option<&str>,
    ) -> Result<(String, Manifest, PathBuf)> {
        let versions = self.index.versions(request.registry, name)?;

        // Lockfile-first: an exact locked version wins when the index
        // still carries it.
        if let Some(locked) = self.lockfile.get_locked(&request.pattern, range.is_none()) {
            if let Some((version, manifest)) =
                versions.iter().find(|(v, _)| v.to_string() == locked.version)
            {
                let store =
                    self.index.payload_dir(request.registry, name, &version.to_string());
                return Ok((version.to_string(), manifest.clone(), store));
            }
            debug!(
                "locked version {} of {} is gone from the index, re-resolving",
                locked.version, name
            );
        }

        let req = match range {
            Some(range) => VersionReq::parse(range).map_err(|_| {
                SpoolError::NoMatchingVersion {
                    name: name.to_string(),
                    range: range.to_string(),
                }
            })?,
            None => VersionReq::STAR,
        };

        let best: Option<&(Version, Manifest)> =
            versions.iter().rev().find(|(v, _)| req.matches(v));
        let Some((version, manifest)) = best else {
            return Err(SpoolError::NoMatchingVersion {
                name: name.to_string(),
                range: range.unwrap_or("*").to_string(),
            }
            .into());
        };
        let store = self.index.payload_dir(request.registry, name, &version.to_string());
        Ok((version.to_string(), manifest.clone(), store))
    }

    /// Queue the runtime and optional dependencies of a freshly
    /// resolved package.
    fn enqueue_children(&self, slot: usize, queue: &mut VecDeque<DependencyRequest>) {
        let resolved = &self.manifests[slot];
        let reference = &self.references[resolved.reference];
        // Children stay in the registry of their parent.
        let registry = reference.registry;
        let parent = reference
            .patterns
            .first()
            .cloned()
            .unwrap_or_else(|| resolved.name.clone());
        let parent_optional = reference.optional;

        for (child, range) in &resolved.manifest.dependencies {
            queue.push_back(DependencyRequest {
                pattern: make_pattern(child, range),
                registry,
                hint: None,
                optional: parent_optional,
                parent: Some(parent.clone()),
            });
        }
        for (child, range) in &resolved.manifest.optional_dependencies {
            queue.push_back(DependencyRequest {
                pattern: make_pattern(child, range),
                registry,
                hint: Some(RequestHint::Optional),
                optional: true,
                parent: Some(parent.clone()),
            });
        }
    }

    /// The resolved manifest a pattern points at, if any.
    pub fn get_resolved_pattern(&self, pattern: &str) -> Option<&ResolvedManifest> {
        self.patterns.get(pattern).map(|&slot| &self.manifests[slot])
    }

    /// The resolved manifest a pattern points at; unknown patterns are
    /// an internal error.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::UnresolvedPattern`] when the pattern never
    /// went through [`Resolver::init`].
    pub fn get_strict_resolved_pattern(&self, pattern: &str) -> Result<&ResolvedManifest> {
        self.get_resolved_pattern(pattern).ok_or_else(|| {
            SpoolError::UnresolvedPattern { pattern: pattern.to_string() }.into()
        })
    }

    /// All distinct resolved versions of a package name.
    pub fn get_all_info_for_package_name(&self, name: &str) -> Vec<&ResolvedManifest> {
        let mut slots = Vec::new();
        for pattern in self.patterns_by_package.get(name).map(|v| v.as_slice()).unwrap_or(&[]) {
            if let Some(&slot) = self.patterns.get(pattern) {
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
        }
        slots.into_iter().map(|slot| &self.manifests[slot]).collect()
    }

    /// Package names reachable from the seed patterns, breadth-first:
    /// the seeds' names first, then everything they depend on, level by
    /// level.
    ///
    /// # Arguments
    ///
    /// * `seed_patterns` - usually the top-level patterns of the
    ///   install
    ///
    /// # Returns
    ///
    /// Each reachable name exactly once, in level order. The flattener
    /// and the script runner both walk this order.
    pub fn get_all_dependency_names_by_level_order(
        &self,
        seed_patterns: &[String],
    ) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = seed_patterns
            .iter()
            .map(|pattern| split_pattern(pattern).0.to_string())
            .collect();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            for info in self.get_all_info_for_package_name(&name) {
                for child in info
                    .manifest
                    .dependencies
                    .keys()
                    .chain(info.manifest.optional_dependencies.keys())
                {
                    if !seen.contains(child) {
                        queue.push_back(child.clone());
                    }
                }
            }
            out.push(name);
        }
        out
    }

    /// Repoint every pattern of `name` at the resolved manifest with
    /// `version`.
    ///
    /// # Arguments
    ///
    /// * `name` - the package name being collapsed
    /// * `version` - the surviving version; must already be resolved
    ///   for `name`
    ///
    /// # Returns
    ///
    /// The representative pattern of the surviving manifest.
    ///
    /// # Errors
    ///
    /// Fails when no resolved manifest of `name` carries `version`.
    pub fn collapse_all_versions_of_package(
        &mut self,
        name: &str,
        version: &str,
    ) -> Result<String> {
        let patterns: Vec<String> =
            self.patterns_by_package.get(name).cloned().unwrap_or_default();
        let target = patterns
            .iter()
            .filter_map(|pattern| self.patterns.get(pattern).copied())
            .find(|&slot| self.manifests[slot].version == version)
            .ok_or_else(|| SpoolError::Other {
                message: format!("No resolved version {version} of \"{name}\" to collapse to"),
            })?;
        let representative = patterns
            .iter()
            .find(|pattern| self.patterns.get(*pattern) == Some(&target))
            .cloned()
            .expect("target slot has a pattern");
        for pattern in &patterns {
            self.patterns.insert(pattern.clone(), target);
        }
        Ok(representative)
    }

    /// Every resolved manifest still reachable through a pattern, in
    /// slot order.
    pub fn get_manifests(&self) -> Vec<&ResolvedManifest> {
        let slots: BTreeSet<usize> = self.patterns.values().copied().collect();
        slots.into_iter().map(|slot| &self.manifests[slot]).collect()
    }

    /// Replace the stored manifest of every slot owned by `reference`
    /// with the authoritative copy, keeping index-only fields the new
    /// copy omits.
    ///
    /// # Arguments
    ///
    /// * `reference` - the reference whose manifests are replaced
    /// * `new_manifest` - the manifest re-read from the fetched
    ///   payload; missing `name`, `version` and `resolved` fields keep
    ///   their previous values
    pub fn update_manifest(&mut self, reference: ReferenceId, new_manifest: Manifest) {
        for resolved in &mut self.manifests {
            if resolved.reference == reference {
                let mut merged = new_manifest.clone();
                if merged.name.is_none() {
                    merged.name = Some(resolved.name.clone());
                }
                if merged.version.is_none() {
                    merged.version = Some(resolved.version.clone());
                }
                if merged.resolved.is_none() {
                    merged.resolved = resolved.manifest.resolved.clone();
                }
                resolved.manifest = merged;
            }
        }
    }

    /// The reference record of a resolved package.
    pub fn reference(&self, id: ReferenceId) -> &PackageReference {
        &self.references[id]
    }

    /// Set the ignore mark on a reference.
    pub fn set_ignore(&mut self, id: ReferenceId, ignore: bool) {
        self.references[id].ignore = ignore;
    }

    /// Whether a resolved manifest's reference is ignored.
    pub fn is_ignored(&self, resolved: &ResolvedManifest) -> bool {
        self.references[resolved.reference].ignore
    }

    /// The lockfile image of the current pattern table.
    ///
    /// # Returns
    ///
    /// One [`LockedEntry`] per pattern, including collapsed and ignored
    /// ones. Bare patterns are emitted under their existing lockfile
    /// key so a repeated install produces a byte-identical image.
    pub fn lockfile_image(&self) -> BTreeMap<String, LockedEntry> {
        self.patterns
            .iter()
            .map(|(pattern, &slot)| {
                let pattern = self.lockfile.canonical_pattern(pattern);
                let resolved = &self.manifests[slot];
                let entry = LockedEntry {
                    version: resolved.version.clone(),
                    resolved: resolved.manifest.resolved.clone(),
                    registry: self.references[resolved.reference].registry,
                    dependencies: resolved.manifest.dependencies.clone(),
                    optional_dependencies: resolved.manifest.optional_dependencies.clone(),
                };
                (pattern.to_string(), entry)
            })
            .collect()
    }
}
