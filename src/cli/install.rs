//! The `install` command.
//!
//! Installs every dependency declared by the root manifest, honoring
//! the lockfile and the integrity witness. Takes no positional
//! arguments: `spool install foo` fails with the equivalent
//! `spool add` invocation, synthesized from the save-shape flags.
//!
//! The old `-S`/`-D`/`-P`/`-O`/`-E`/`-T` save flags and `-g/--global`
//! still parse but are deprecated in favor of `--dev`, `--peer`,
//! `--optional`, `--exact` and `--tilde`.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::constants::LOCKFILE_FILENAME;
use crate::core::SpoolError;
use crate::flags::{EffectiveFlags, RawFlags};
use crate::installer::Install;
use crate::lockfile::Lockfile;
use crate::reporter::Reporter;

/// Install dependencies from the root manifest.
#[derive(Args, Debug, Default)]
pub struct InstallCommand {
    /// Rejected; present only so the error can suggest the equivalent
    /// `spool add` invocation.
    #[arg(hide = true)]
    packages: Vec<String>,

    /// Save an HTTP archive of all network requests made during the
    /// install.
    #[arg(long)]
    har: bool,

    /// Skip os/cpu compatibility checks.
    #[arg(long)]
    ignore_platform: bool,

    /// Skip engine compatibility checks.
    #[arg(long)]
    ignore_engines: bool,

    /// Do not run lifecycle scripts.
    #[arg(long)]
    ignore_scripts: bool,

    /// Skip optional dependencies.
    #[arg(long)]
    ignore_optional: bool,

    /// Reinstall everything, even when up to date.
    #[arg(long)]
    force: bool,

    /// Force a single version per package name across the tree.
    #[arg(long)]
    flat: bool,

    /// Hard-link duplicate files from the cache instead of copying.
    #[arg(long)]
    link_duplicates: bool,

    /// Re-verify recorded file locations during the up-to-date check.
    #[arg(long)]
    check_files: bool,

    /// Don't read or write a lockfile.
    #[arg(long = "no-lockfile")]
    no_lockfile: bool,

    /// Read the lockfile but never write it.
    #[arg(long)]
    pure_lockfile: bool,

    /// Fail if anything required is missing from the lockfile
    /// (CI/production installs).
    #[arg(long)]
    frozen_lockfile: bool,

    /// Skip the up-to-date integrity check entirely.
    #[arg(long)]
    skip_integrity_check: bool,

    /// Don't install dev dependencies.
    #[arg(long)]
    production: bool,

    /// Save-shape for the suggested `add`: peer dependency.
    #[arg(long)]
    peer: bool,

    /// Save-shape for the suggested `add`: dev dependency.
    #[arg(long)]
    dev: bool,

    /// Save-shape for the suggested `add`: optional dependency.
    #[arg(long)]
    optional: bool,

    /// Save-shape for the suggested `add`: exact version.
    #[arg(long)]
    exact: bool,

    /// Save-shape for the suggested `add`: tilde range.
    #[arg(long)]
    tilde: bool,

    /// Deprecated; suggests `spool global add`.
    #[arg(short = 'g', long = "global", hide = true)]
    global: bool,

    /// Deprecated; install saves automatically.
    #[arg(short = 'S', long = "save", hide = true)]
    save: bool,

    /// Deprecated alias of --dev.
    #[arg(short = 'D', long = "save-dev", hide = true)]
    save_dev: bool,

    /// Deprecated alias of --peer.
    #[arg(short = 'P', long = "save-peer", hide = true)]
    save_peer: bool,

    /// Deprecated alias of --optional.
    #[arg(short = 'O', long = "save-optional", hide = true)]
    save_optional: bool,

    /// Deprecated alias of --exact.
    #[arg(short = 'E', long = "save-exact", hide = true)]
    save_exact: bool,

    /// Deprecated alias of --tilde.
    #[arg(short = 'T', long = "save-tilde", hide = true)]
    save_tilde: bool,
}

impl InstallCommand {
    fn raw_flags(&self) -> RawFlags {
        RawFlags {
            har: self.har,
            ignore_platform: self.ignore_platform,
            ignore_engines: self.ignore_engines,
            ignore_scripts: self.ignore_scripts,
            ignore_optional: self.ignore_optional,
            force: self.force,
            flat: self.flat,
            link_duplicates: self.link_duplicates,
            check_files: self.check_files,
            no_lockfile: self.no_lockfile,
            pure_lockfile: self.pure_lockfile,
            frozen_lockfile: self.frozen_lockfile,
            skip_integrity_check: self.skip_integrity_check,
            save_peer: self.peer || self.save_peer,
            save_dev: self.dev || self.save_dev,
            save_optional: self.optional || self.save_optional,
            save_exact: self.exact || self.save_exact,
            save_tilde: self.tilde || self.save_tilde,
        }
    }

    /// The `spool add` invocation equivalent to the rejected
    /// positional form.
    fn add_suggestion(&self) -> String {
        let mut command = if self.global {
            "spool global add".to_string()
        } else {
            "spool add".to_string()
        };
        for package in &self.packages {
            command.push(' ');
            command.push_str(package);
        }
        for (flag, set) in [
            ("--dev", self.dev || self.save_dev),
            ("--peer", self.peer || self.save_peer),
            ("--optional", self.optional || self.save_optional),
            ("--exact", self.exact || self.save_exact),
            ("--tilde", self.tilde || self.save_tilde),
        ] {
            if set {
                command.push(' ');
                command.push_str(flag);
            }
        }
        command
    }

    fn warn_deprecated(&self, reporter: &Reporter) {
        for (name, replacement, set) in [
            ("--global", "use `spool global add`", self.global),
            ("--save", "install saves automatically", self.save),
            ("--save-dev", "use --dev", self.save_dev),
            ("--save-peer", "use --peer", self.save_peer),
            ("--save-optional", "use --optional", self.save_optional),
            ("--save-exact", "use --exact", self.save_exact),
            ("--save-tilde", "use --tilde", self.save_tilde),
        ] {
            if set {
                reporter.warn(&format!("{name} is deprecated; {replacement}."));
            }
        }
    }

    /// Run the install in `cwd`.
    pub async fn execute(self, cwd: PathBuf, quiet: bool, no_progress: bool) -> Result<()> {
        let reporter = Reporter::new(quiet, no_progress);
        self.warn_deprecated(&reporter);

        // No positionals: installing a named package is `add`'s job.
        if !self.packages.is_empty() {
            return Err(SpoolError::PositionalArgsNotAllowed {
                suggestion: self.add_suggestion(),
            }
            .into());
        }

        let config = Arc::new(Config::load(cwd, self.production)?);
        let flags = EffectiveFlags::normalize(&self.raw_flags(), &config);
        let lockfile = if flags.lockfile {
            Lockfile::load(&config.cwd.join(LOCKFILE_FILENAME))?
        } else {
            Lockfile::empty()
        };

        let mut install = Install::new(config, reporter, flags, lockfile);
        install.install().await?;
        Ok(())
    }
}
