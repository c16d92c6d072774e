//! The install orchestrator.
//!
//! [`Install`] sequences one install invocation end to end: collect
//! dependency requests from the root manifest, resolve them, decide
//! whether the on-disk state already satisfies the request (bailout),
//! fetch and compatibility-check the resolved set, link it into the
//! modules folders, run lifecycle scripts, and persist the lockfile and
//! integrity witness.
//!
//! # Pipeline
//!
//! Steps run strictly in order; each reports `(current, total)`
//! progress:
//!
//! 1. **Resolve** - resolver init, flat-mode flattening, then the
//!    bailout check. A bailout exits the pipeline successfully.
//! 2. **Fetch + compatibility** - ignore marking, cache population,
//!    platform/engine checks.
//! 3. **Link** - the integrity witness is removed *before* the tree is
//!    mutated, then the linker materializes it.
//! 4. **Scripts** - package install scripts, unless `--ignore-scripts`.
//! 5. **HAR** (with `--har`) - write the request-log archive.
//! 6. **Clean** (when `.spoolclean` exists) - purge matching files from
//!    installed packages.
//!
//! After the last step the lockfile and witness are saved, the update
//! nag result is printed, and the request log is cleared.
//!
//! # Crash safety
//!
//! The witness-removed-before-link / rewritten-on-success protocol is
//! the sole recovery mechanism: a crash mid-install leaves the witness
//! absent, forcing the next run to do the full work. No partial
//! rollback of the tree is attempted.

mod flatten;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::compatibility;
use crate::config::Config;
use crate::constants::{CLEAN_FILENAME, LOCKFILE_FILENAME, SHRINKWRAP_FILENAME};
use crate::core::SpoolError;
use crate::fetcher::Fetcher;
use crate::flags::EffectiveFlags;
use crate::integrity::IntegrityChecker;
use crate::linker::Linker;
use crate::lockfile::Lockfile;
use crate::pattern::{make_pattern, pattern_name};
use crate::registry::{DependencyOrigin, Manifest, RootManifestFile};
use crate::reporter::{Disambiguator, Reporter};
use crate::resolver::{self, DependencyRequest, RequestHint, Resolver};
use crate::scripts::ScriptRunner;
use crate::updater::{self, UpgradeHint};
use crate::utils::fs::ensure_dir;

/// Output of request collection.
#[derive(Debug, Default, Clone)]
pub struct RequestSet {
    /// Every request that participates in resolution.
    pub requests: Vec<DependencyRequest>,
    /// Every emitted pattern.
    pub patterns: Vec<String>,
    /// The subset live in this invocation.
    pub used_patterns: Vec<String>,
    /// `patterns` minus `used_patterns`.
    pub ignore_patterns: Vec<String>,
    /// The root manifest that contributed the requests.
    pub manifest: Manifest,
}

/// The named pipeline steps, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Resolve,
    FetchAndCompat,
    Link,
    Scripts,
    Har,
    Clean,
}

impl Step {
    const fn label(self) -> &'static str {
        match self {
            Self::Resolve => "Resolving packages",
            Self::FetchAndCompat => "Fetching packages",
            Self::Link => "Linking dependencies",
            Self::Scripts => "Building fresh packages",
            Self::Har => "Saving HAR file",
            Self::Clean => "Cleaning modules",
        }
    }
}

/// One install invocation. Owns every engine for its duration.
pub struct Install {
    config: Arc<Config>,
    reporter: Reporter,
    /// Effective flags; `flat` may be forced on by the root manifest.
    pub flags: EffectiveFlags,
    lockfile: Arc<Lockfile>,
    resolver: Resolver,
    integrity: IntegrityChecker,
    fetcher: Fetcher,
    linker: Linker,
    scripts: ScriptRunner,
    /// Aggregated `resolutions` across root manifests, extended by the
    /// flattener.
    resolutions: BTreeMap<String, String>,
    resolutions_added: bool,
    root_manifests: Vec<RootManifestFile>,
    /// Pattern -> root-manifest section it came from.
    pub root_patterns_to_origin: BTreeMap<String, DependencyOrigin>,
    /// Flat-mode conflict chooser; the reporter's interactive prompt
    /// unless a scripted one was supplied.
    disambiguator: Option<Box<dyn Disambiguator + Send + Sync>>,
    upgrade_hint: Option<UpgradeHint>,
}

impl Install {
    /// Build an orchestrator; engines are created here and owned until
    /// the install finishes.
    ///
    /// # Arguments
    ///
    /// * `config` - shared configuration of the invocation
    /// * `reporter` - console output, also the fallback interactive
    ///   disambiguator for flat mode
    /// * `flags` - the normalized effective flags
    /// * `lockfile` - the lockfile loaded from the working directory
    ///   (or [`Lockfile::empty`] when lockfile use is disabled)
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let config = Arc::new(Config::load(cwd, false)?);
    /// let flags = EffectiveFlags::normalize(&raw, &config);
    /// let lockfile = Lockfile::load(&config.cwd.join(LOCKFILE_FILENAME))?;
    /// let mut install = Install::new(config, Reporter::new(false, false), flags, lockfile);
    /// let patterns = install.install().await?;
    /// ```
    pub fn new(
        config: Arc<Config>,
        reporter: Reporter,
        flags: EffectiveFlags,
        lockfile: Lockfile,
    ) -> Self {
        let lockfile = Arc::new(lockfile);
        let resolver = Resolver::new(config.clone(), lockfile.clone());
        let integrity = IntegrityChecker::new(&config);
        let fetcher = Fetcher::new(config.clone());
        let linker = Linker::new(config.clone());
        let scripts = ScriptRunner::new(config.clone());
        Self {
            config,
            reporter,
            flags,
            lockfile,
            resolver,
            integrity,
            fetcher,
            linker,
            scripts,
            resolutions: BTreeMap::new(),
            resolutions_added: false,
            root_manifests: Vec::new(),
            root_patterns_to_origin: BTreeMap::new(),
            disambiguator: None,
            upgrade_hint: None,
        }
    }

    /// Replace the interactive conflict prompt with a scripted
    /// [`Disambiguator`], e.g. a
    /// [`PresetDisambiguator`](crate::reporter::PresetDisambiguator)
    /// for non-interactive flat installs.
    ///
    /// # Arguments
    ///
    /// * `disambiguator` - the chooser the flattener consults for
    ///   package names with more than one resolved version
    #[must_use]
    pub fn with_disambiguator(
        mut self,
        disambiguator: Box<dyn Disambiguator + Send + Sync>,
    ) -> Self {
        self.disambiguator = Some(disambiguator);
        self
    }

    /// Walk the recognized registries' root manifests and emit
    /// dependency requests tagged by origin.
    ///
    /// The first registry whose manifest exists wins and the walk
    /// stops: in multi-registry working directories only one root
    /// manifest is consulted per invocation.
    ///
    /// # Arguments
    ///
    /// * `exclude_patterns` - patterns whose bare names are skipped
    ///   during collection; exotic (git/URL/file) patterns contribute
    ///   no name
    /// * `ignore_unused` - drop entries that are not live in this
    ///   invocation instead of recording them as ignore patterns
    ///
    /// # Returns
    ///
    /// A [`RequestSet`] whose `used_patterns` and `ignore_patterns`
    /// partition `patterns`.
    ///
    /// # Errors
    ///
    /// Returns an error when a root manifest exists but cannot be read
    /// or parsed; the collector does not transform reader errors.
    pub async fn fetch_requests_from_cwd(
        &mut self,
        exclude_patterns: &[String],
        ignore_unused: bool,
    ) -> Result<RequestSet> {
        let exclude_names: BTreeSet<String> = exclude_patterns
            .iter()
            .filter(|pattern| !resolver::is_exotic_pattern(pattern))
            .map(|pattern| pattern_name(pattern).to_string())
            .collect();

        let mut set = RequestSet::default();
        self.root_manifests = self.config.get_root_manifests()?;

        for file in &self.root_manifests {
            if !file.exists {
                continue;
            }
            let manifest = file.manifest.clone();

            for (name, version) in &manifest.resolutions {
                self.resolutions.insert(name.clone(), version.clone());
            }

            for origin in [
                DependencyOrigin::Dependencies,
                DependencyOrigin::DevDependencies,
                DependencyOrigin::OptionalDependencies,
            ] {
                for (name, range) in manifest.dependencies_for(origin) {
                    if exclude_names.contains(name) {
                        continue;
                    }
                    // Lockfile-pinned names stay bare; everything else
                    // carries its range.
                    let pattern = if self.lockfile.get_locked(name, true).is_some() {
                        name.clone()
                    } else {
                        make_pattern(name, range)
                    };
                    if set.patterns.contains(&pattern) {
                        continue;
                    }
                    let used = match origin {
                        DependencyOrigin::Dependencies => true,
                        DependencyOrigin::DevDependencies => !self.config.production,
                        DependencyOrigin::OptionalDependencies => !self.flags.ignore_optional,
                    };
                    if ignore_unused && !used {
                        continue;
                    }
                    let hint = match origin {
                        DependencyOrigin::Dependencies => None,
                        DependencyOrigin::DevDependencies => Some(RequestHint::Dev),
                        DependencyOrigin::OptionalDependencies => Some(RequestHint::Optional),
                    };
                    set.requests.push(DependencyRequest {
                        pattern: pattern.clone(),
                        registry: file.registry,
                        hint,
                        optional: origin == DependencyOrigin::OptionalDependencies,
                        parent: None,
                    });
                    set.patterns.push(pattern.clone());
                    if used {
                        set.used_patterns.push(pattern.clone());
                    } else {
                        set.ignore_patterns.push(pattern.clone());
                    }
                    self.root_patterns_to_origin.insert(pattern, origin);
                }
            }

            if manifest.flat {
                self.flags.flat = true;
            }
            set.manifest = manifest;
            break;
        }

        if self.config.cwd.join(SHRINKWRAP_FILENAME).exists() {
            self.reporter.warn(&format!(
                "{SHRINKWRAP_FILENAME} found. This will not be honored; only {LOCKFILE_FILENAME} is."
            ));
        }
        Ok(set)
    }

    /// Decide whether the current on-disk state already satisfies the
    /// request.
    ///
    /// # Returns
    ///
    /// `Ok(true)` short-circuits the rest of the pipeline: either the
    /// integrity witness matches ("up to date") or there is nothing to
    /// install and the empty state was persisted.
    ///
    /// # Errors
    ///
    /// Fails with [`SpoolError::FrozenLockfile`] when
    /// `--frozen-lockfile` is set and a requested pattern has no
    /// lockfile record, before anything is fetched, linked or run.
    pub async fn bailout(&self, used_patterns: &[String]) -> Result<bool> {
        if self.flags.skip_integrity_check || self.flags.force {
            return Ok(false);
        }
        if self.lockfile.cache.is_empty() {
            return Ok(false);
        }

        let check = self.integrity.check(used_patterns, &self.lockfile, &self.flags).await?;

        if self.flags.frozen_lockfile && !check.missing_patterns.is_empty() {
            return Err(SpoolError::FrozenLockfile {
                patterns: check.missing_patterns.join(", "),
            }
            .into());
        }

        if check.integrity_matches && self.lockfile.present {
            self.reporter.success("Already up-to-date.");
            return Ok(true);
        }

        if used_patterns.is_empty() && !check.integrity_file_missing {
            self.create_empty_manifest_folders()?;
            self.save_lockfile_and_integrity(&[]).await?;
            self.reporter.success("Nothing to install.");
            return Ok(true);
        }

        Ok(false)
    }

    fn create_empty_manifest_folders(&self) -> Result<()> {
        let mut created = false;
        for file in &self.root_manifests {
            if file.exists {
                ensure_dir(&self.config.registry_folder(file.registry))?;
                created = true;
            }
        }
        if !created {
            ensure_dir(&self.config.registry_folder(crate::registry::RegistryKind::ALL[0]))?;
        }
        Ok(())
    }

    /// Mark each ignore pattern's reference as ignored, but only when
    /// the root is its sole requester. Anything with a second requester
    /// stays live, since ignoring it would break that requester.
    ///
    /// # Arguments
    ///
    /// * `patterns` - the collector's ignore patterns (top-level
    ///   entries that are not live in this invocation)
    pub fn mark_ignored(&mut self, patterns: &[String]) {
        for pattern in patterns {
            let Some(resolved) = self.resolver.get_resolved_pattern(pattern) else {
                continue;
            };
            let reference = resolved.reference;
            if self.resolver.reference(reference).requests.len() == 1 {
                self.resolver.set_ignore(reference, true);
            }
        }
    }

    /// Run the pipeline.
    ///
    /// # Returns
    ///
    /// The flattened top-level patterns, whether the pipeline ran to
    /// completion or bailed out after resolution.
    ///
    /// # Errors
    ///
    /// Any engine failure aborts the pipeline at the step it occurred
    /// in and propagates verbatim. No partial cleanup is attempted;
    /// recovery relies on the integrity witness having been removed
    /// before linking.
    pub async fn init(&mut self) -> Result<Vec<String>> {
        let request_set = self.fetch_requests_from_cwd(&[], false).await?;

        let mut steps =
            vec![Step::Resolve, Step::FetchAndCompat, Step::Link, Step::Scripts];
        if self.flags.har {
            steps.push(Step::Har);
        }
        if self.config.cwd.join(CLEAN_FILENAME).exists() {
            steps.push(Step::Clean);
        }
        let total = steps.len();

        let top_level_patterns = request_set.patterns.clone();
        let mut flattened_top_level_patterns: Vec<String> = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            self.reporter.step(index + 1, total, step.label());
            match step {
                Step::Resolve => {
                    self.resolver
                        .init(request_set.requests.clone(), self.flags.flat)
                        .await?;
                    flattened_top_level_patterns =
                        self.flatten(top_level_patterns.clone(), true).await?;
                    // Bailing out only after flattening: even a skipped
                    // install must run disambiguation so recorded
                    // resolutions persist.
                    if self.bailout(&request_set.used_patterns).await? {
                        self.reporter.done();
                        return Ok(flattened_top_level_patterns);
                    }
                }
                Step::FetchAndCompat => {
                    self.mark_ignored(&request_set.ignore_patterns);
                    self.fetcher.init(&mut self.resolver, self.flags.force).await?;
                    compatibility::init(&mut self.resolver, &self.flags, &self.reporter)
                        .await?;
                }
                Step::Link => {
                    // Removed before the tree is mutated; rewritten only
                    // on success.
                    self.integrity.remove_integrity_file().await?;
                    self.linker
                        .init(
                            &self.resolver,
                            &flattened_top_level_patterns,
                            self.flags.link_duplicates,
                        )
                        .await?;
                }
                Step::Scripts => {
                    if self.flags.ignore_scripts {
                        self.reporter.warn("Lifecycle scripts were skipped (--ignore-scripts).");
                    } else {
                        self.scripts
                            .init(&self.resolver, &flattened_top_level_patterns, &self.reporter)
                            .await?;
                    }
                }
                Step::Har => self.save_har()?,
                Step::Clean => self.clean().await?,
            }
        }
        self.reporter.done();

        self.save_lockfile_and_integrity(&top_level_patterns).await?;
        self.config.request_manager.clear_cache();
        Ok(flattened_top_level_patterns)
    }

    /// The full install: the pipeline wrapped in the root lifecycle,
    /// with the self-update check running alongside.
    ///
    /// The lifecycle order is `preinstall`, the pipeline, `install`,
    /// `postinstall`, and outside production mode `prepublish` then
    /// `prepare`. A failing phase aborts the remaining phases.
    ///
    /// # Returns
    ///
    /// The flattened top-level patterns from the pipeline.
    ///
    /// # Errors
    ///
    /// Propagates pipeline and lifecycle-script failures. The
    /// self-update check never contributes an error.
    pub async fn install(&mut self) -> Result<Vec<String>> {
        let update_check = tokio::spawn(updater::check_for_updates(self.config.clone()));
        let run_lifecycle = !self.flags.ignore_scripts;

        if run_lifecycle {
            self.scripts.run_root_lifecycle("preinstall", &self.reporter).await?;
        }

        let patterns = self.init().await?;

        if run_lifecycle {
            self.scripts.run_root_lifecycle("install", &self.reporter).await?;
            self.scripts.run_root_lifecycle("postinstall", &self.reporter).await?;
            if !self.config.production {
                self.scripts.run_root_lifecycle("prepublish", &self.reporter).await?;
                self.scripts.run_root_lifecycle("prepare", &self.reporter).await?;
            }
        }

        self.upgrade_hint = update_check.await.unwrap_or(None);
        self.maybe_output_update();
        Ok(patterns)
    }

    /// Read-only variant: collection, resolution, flattening and ignore
    /// marking, and never a write to the working directory. Used by
    /// tools that need the resolved graph without installing.
    ///
    /// # Arguments
    ///
    /// * `fetch` - additionally run the fetcher and the compatibility
    ///   check; these touch only the package cache, not the working
    ///   directory
    ///
    /// # Returns
    ///
    /// The flattened top-level patterns of the resolved graph.
    pub async fn hydrate(&mut self, fetch: bool) -> Result<Vec<String>> {
        let request_set = self.fetch_requests_from_cwd(&[], true).await?;
        self.resolver.init(request_set.requests.clone(), self.flags.flat).await?;
        let flattened = self.flatten(request_set.patterns.clone(), false).await?;
        self.mark_ignored(&request_set.ignore_patterns);
        if fetch {
            self.fetcher.init(&mut self.resolver, self.flags.force).await?;
            compatibility::init(&mut self.resolver, &self.flags, &self.reporter).await?;
        }
        Ok(flattened)
    }

    /// Persist the lockfile (when it changed) and the integrity
    /// witness, pruning the offline mirror first when one is
    /// configured.
    ///
    /// A no-op when lockfile writes are disabled (`--no-lockfile` or
    /// `--pure-lockfile`). The witness is always written; the lockfile
    /// rewrite is skipped when every candidate entry agrees with the
    /// existing file on `resolved`, `patterns` is non-empty and
    /// `--force` is not set.
    ///
    /// # Errors
    ///
    /// Returns an error when the mirror prune, the witness write or
    /// the lockfile write fails.
    pub async fn save_lockfile_and_integrity(&self, patterns: &[String]) -> Result<()> {
        if !self.flags.lockfile || self.flags.pure_lockfile {
            return Ok(());
        }

        let image = self.resolver.lockfile_image();

        if self.config.get_offline_mirror_path().is_some() {
            self.config.prune_offline_mirror(&image)?;
        }

        let canonical_patterns: Vec<String> = patterns
            .iter()
            .map(|pattern| self.lockfile.canonical_pattern(pattern).to_string())
            .collect();
        self.integrity
            .save(&canonical_patterns, &image, &self.flags, &self.resolver.used_registries)
            .await?;

        let unchanged = !patterns.is_empty()
            && !self.flags.force
            && self.lockfile.matches_image(&image);
        if unchanged {
            debug!("lockfile is unchanged, skipping the rewrite");
            return Ok(());
        }

        self.lockfile.save(&self.config.cwd.join(LOCKFILE_FILENAME), &image)
    }

    fn save_har(&self) -> Result<()> {
        let date = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true).replace(':', "-");
        let filename = format!("spool-install_{date}.har");
        self.config.request_manager.save_har(&self.config.cwd.join(&filename))?;
        self.reporter.info(&format!("Saved HAR file: {filename}"));
        Ok(())
    }

    /// Purge files matching the `.spoolclean` patterns from every
    /// modules folder.
    async fn clean(&self) -> Result<()> {
        let content =
            tokio::fs::read_to_string(self.config.cwd.join(CLEAN_FILENAME)).await?;
        let patterns: Vec<glob::Pattern> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| glob::Pattern::new(line).ok())
            .collect();
        if patterns.is_empty() {
            return Ok(());
        }

        let mut removed = 0usize;
        for registry in crate::registry::RegistryKind::ALL {
            let folder = self.config.registry_folder(registry);
            if !folder.exists() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&folder)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
            {
                let relative = entry.path().strip_prefix(&folder).unwrap_or(entry.path());
                let matched = patterns.iter().any(|pattern| {
                    pattern.matches_path(relative)
                        || entry
                            .file_name()
                            .to_str()
                            .is_some_and(|name| pattern.matches(name))
                });
                if matched {
                    std::fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        self.reporter.info(&format!("Removed {removed} cleaned files"));
        Ok(())
    }

    fn maybe_output_update(&mut self) {
        if let Some(hint) = self.upgrade_hint.take() {
            updater::output_update(&hint, &self.reporter);
        }
    }
}
