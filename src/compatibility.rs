//! Platform and engine compatibility checks.
//!
//! Resolved manifests may declare supported operating systems and CPU
//! architectures (with `!`-negation) and engine version ranges. A
//! violation on an optional package marks it ignored; on a required
//! package it fails the install unless `--ignore-platform` (os/cpu) or
//! `--ignore-engines` is set.

use anyhow::Result;
use semver::{Version, VersionReq};
use tracing::debug;

use crate::constants::SPOOL_VERSION;
use crate::core::SpoolError;
use crate::flags::EffectiveFlags;
use crate::reporter::Reporter;
use crate::resolver::{ReferenceId, Resolver};

/// The running operating system, in manifest vocabulary.
pub fn current_os() -> &'static str {
    std::env::consts::OS
}

/// The running CPU architecture, in manifest vocabulary.
pub fn current_cpu() -> &'static str {
    std::env::consts::ARCH
}

/// Whether `current` passes an os/cpu list. Empty lists allow
/// everything; a `!current` entry denies; otherwise any positive entry
/// must match when positives exist.
pub fn platform_allowed(list: &[String], current: &str) -> bool {
    if list.is_empty() {
        return true;
    }
    if list.iter().any(|entry| entry.strip_prefix('!') == Some(current)) {
        return false;
    }
    let mut positives = list.iter().filter(|entry| !entry.starts_with('!')).peekable();
    positives.peek().is_none() || positives.any(|entry| entry == current)
}

enum Violation {
    Platform { platform: String },
    Engine { engine: String, range: String },
}

/// Check every non-ignored resolved package, honoring the ignore
/// flags. One pass, before linking.
pub async fn init(
    resolver: &mut Resolver,
    flags: &EffectiveFlags,
    reporter: &Reporter,
) -> Result<()> {
    let mut violations: Vec<(ReferenceId, String, String, Violation)> = Vec::new();

    for resolved in resolver.get_manifests() {
        if resolver.is_ignored(resolved) {
            continue;
        }
        let manifest = &resolved.manifest;

        if !flags.ignore_platform {
            if !platform_allowed(&manifest.os, current_os()) {
                violations.push((
                    resolved.reference,
                    resolved.name.clone(),
                    resolved.version.clone(),
                    Violation::Platform { platform: current_os().to_string() },
                ));
                continue;
            }
            if !platform_allowed(&manifest.cpu, current_cpu()) {
                violations.push((
                    resolved.reference,
                    resolved.name.clone(),
                    resolved.version.clone(),
                    Violation::Platform { platform: current_cpu().to_string() },
                ));
                continue;
            }
        }

        if !flags.ignore_engines {
            for (engine, range) in &manifest.engines {
                // Only the running tool's engine is enforceable here.
                if engine != "spool" {
                    debug!("not checking unknown engine \"{engine}\"");
                    continue;
                }
                let satisfied = match (VersionReq::parse(range), Version::parse(SPOOL_VERSION)) {
                    (Ok(req), Ok(version)) => req.matches(&version),
                    _ => {
                        debug!("unparseable engine range \"{range}\" on {}", resolved.name);
                        true
                    }
                };
                if !satisfied {
                    violations.push((
                        resolved.reference,
                        resolved.name.clone(),
                        resolved.version.clone(),
                        Violation::Engine { engine: engine.clone(), range: range.clone() },
                    ));
                }
            }
        }
    }

    for (reference, name, version, violation) in violations {
        if resolver.reference(reference).optional {
            reporter.warn(&format!(
                "{name}@{version} is incompatible with this system, skipping optional dependency"
            ));
            resolver.set_ignore(reference, true);
            continue;
        }
        return Err(match violation {
            Violation::Platform { platform } => {
                SpoolError::IncompatiblePlatform { name, version, platform }
            }
            Violation::Engine { engine, range } => SpoolError::IncompatibleEngine {
                name,
                version,
                engine,
                range,
                found: SPOOL_VERSION.to_string(),
            },
        }
        .into());
    }
    Ok(())
}
