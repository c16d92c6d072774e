//! Effective install flags.
//!
//! Raw invocation flags are folded together with the persisted
//! configuration into one immutable [`EffectiveFlags`] record; the rest
//! of the codebase reads flags only through it. Config options in the
//! forcing set (`ignore-scripts`, `ignore-platform`, `ignore-engines`,
//! `ignore-optional`, `force`) that are truthy force the corresponding
//! flag on; a flag never overrides config downward.

use crate::config::Config;

/// Raw flags as parsed from the command line, before config folding.
#[derive(Debug, Clone, Default)]
pub struct RawFlags {
    /// Save an HTTP archive of requests made during the install.
    pub har: bool,
    /// Skip os/cpu compatibility checks.
    pub ignore_platform: bool,
    /// Skip engine compatibility checks.
    pub ignore_engines: bool,
    /// Do not run lifecycle scripts.
    pub ignore_scripts: bool,
    /// Skip optional dependencies.
    pub ignore_optional: bool,
    /// Reinstall everything, ignoring caches and the up-to-date check.
    pub force: bool,
    /// Force a single version per package name across the tree.
    pub flat: bool,
    /// Hard-link duplicate files from the cache instead of copying.
    pub link_duplicates: bool,
    /// Verify recorded file locations during the integrity check.
    pub check_files: bool,
    /// Do not read or write the lockfile.
    pub no_lockfile: bool,
    /// Read the lockfile but never write it.
    pub pure_lockfile: bool,
    /// Fail if anything required is missing from the lockfile.
    pub frozen_lockfile: bool,
    /// Skip the bailout integrity check entirely.
    pub skip_integrity_check: bool,
    /// Save-shape: add as a peer dependency.
    pub save_peer: bool,
    /// Save-shape: add as a dev dependency.
    pub save_dev: bool,
    /// Save-shape: add as an optional dependency.
    pub save_optional: bool,
    /// Save-shape: pin the exact version.
    pub save_exact: bool,
    /// Save-shape: use a tilde range.
    pub save_tilde: bool,
}

/// The canonical effective-flags record consumed by the orchestrator.
#[derive(Debug, Clone)]
pub struct EffectiveFlags {
    /// Save an HTTP archive of requests made during the install.
    pub har: bool,
    /// Skip os/cpu compatibility checks.
    pub ignore_platform: bool,
    /// Skip engine compatibility checks.
    pub ignore_engines: bool,
    /// Do not run lifecycle scripts.
    pub ignore_scripts: bool,
    /// Skip optional dependencies.
    pub ignore_optional: bool,
    /// Reinstall everything, ignoring caches and the up-to-date check.
    pub force: bool,
    /// Force a single version per package name across the tree.
    pub flat: bool,
    /// Whether the lockfile is consulted and written at all.
    pub lockfile: bool,
    /// Read the lockfile but never write it.
    pub pure_lockfile: bool,
    /// Fail if anything required is missing from the lockfile.
    pub frozen_lockfile: bool,
    /// Skip the bailout integrity check entirely.
    pub skip_integrity_check: bool,
    /// Hard-link duplicate files from the cache instead of copying.
    pub link_duplicates: bool,
    /// Verify recorded file locations during the integrity check.
    pub check_files: bool,
    /// Save-shape: add as a peer dependency.
    pub save_peer: bool,
    /// Save-shape: add as a dev dependency.
    pub save_dev: bool,
    /// Save-shape: add as an optional dependency.
    pub save_optional: bool,
    /// Save-shape: pin the exact version.
    pub save_exact: bool,
    /// Save-shape: use a tilde range.
    pub save_tilde: bool,
}

impl EffectiveFlags {
    /// Fold raw flags with the persisted configuration.
    ///
    /// This has no I/O and no failure modes; config reads hit the
    /// already-loaded option table.
    pub fn normalize(raw: &RawFlags, config: &Config) -> Self {
        let mut flags = Self {
            har: raw.har,
            ignore_platform: raw.ignore_platform,
            ignore_engines: raw.ignore_engines,
            ignore_scripts: raw.ignore_scripts,
            ignore_optional: raw.ignore_optional,
            force: raw.force,
            flat: raw.flat,
            lockfile: !raw.no_lockfile,
            pure_lockfile: raw.pure_lockfile,
            frozen_lockfile: raw.frozen_lockfile,
            skip_integrity_check: raw.skip_integrity_check,
            link_duplicates: raw.link_duplicates,
            check_files: raw.check_files,
            save_peer: raw.save_peer,
            save_dev: raw.save_dev,
            save_optional: raw.save_optional,
            save_exact: raw.save_exact,
            save_tilde: raw.save_tilde,
        };

        // Truthy config options force the corresponding flag on.
        flags.ignore_scripts |= config.get_bool_option("ignore-scripts");
        flags.ignore_platform |= config.get_bool_option("ignore-platform");
        flags.ignore_engines |= config.get_bool_option("ignore-engines");
        flags.ignore_optional |= config.get_bool_option("ignore-optional");
        flags.force |= config.get_bool_option("force");

        flags
    }

    /// The names of set booleans that change install output, in a fixed
    /// order, recorded into (and compared against) the integrity
    /// witness.
    pub fn integrity_relevant(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, set) in [
            ("flat", self.flat),
            ("ignore-scripts", self.ignore_scripts),
            ("ignore-optional", self.ignore_optional),
            ("ignore-platform", self.ignore_platform),
            ("ignore-engines", self.ignore_engines),
            ("link-duplicates", self.link_duplicates),
            ("check-files", self.check_files),
        ] {
            if set {
                names.push(name.to_string());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn config_with_options(options: &str) -> (TempDir, Config) {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join("config.toml"), options).unwrap();
        let config =
            Config::load_with_home(temp.path().to_path_buf(), home, false).unwrap();
        (temp, config)
    }

    #[test]
    fn config_forces_flags_upward() {
        let (_temp, config) = config_with_options("ignore-scripts = true\nforce = true\n");
        let flags = EffectiveFlags::normalize(&RawFlags::default(), &config);
        assert!(flags.ignore_scripts);
        assert!(flags.force);
        assert!(!flags.ignore_optional);
    }

    #[test]
    fn flags_never_override_config_downward() {
        let (_temp, config) = config_with_options("ignore-optional = true\n");
        let raw = RawFlags { ignore_optional: false, ..Default::default() };
        let flags = EffectiveFlags::normalize(&raw, &config);
        assert!(flags.ignore_optional);
    }

    #[test]
    fn lockfile_defaults_on() {
        let (_temp, config) = config_with_options("");
        let flags = EffectiveFlags::normalize(&RawFlags::default(), &config);
        assert!(flags.lockfile);
        assert!(!flags.pure_lockfile);
    }

    #[test]
    fn integrity_relevant_lists_only_set_flags() {
        let (_temp, config) = config_with_options("");
        let raw = RawFlags { flat: true, check_files: true, ..Default::default() };
        let flags = EffectiveFlags::normalize(&raw, &config);
        assert_eq!(flags.integrity_relevant(), vec!["flat", "check-files"]);
    }
}
