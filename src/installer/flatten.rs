//! Flat-mode collapsing.
//!
//! Active only when the `flat` flag is set. Walks every package name in
//! level order and collapses all resolved versions of each name to one,
//! using a recorded resolution when it matches a candidate and asking
//! the disambiguator otherwise. Newly recorded resolutions are merged
//! back into the root manifest so the next install needs no prompt.

use anyhow::Result;
use std::collections::BTreeSet;

use crate::pattern::pattern_name;
use crate::reporter::{Disambiguator, VersionChoice};

use super::Install;

impl Install {
    /// Collapse the resolved graph to one version per name.
    ///
    /// Returns the input unchanged when flat mode is off; otherwise the
    /// representative pattern of every reachable name. With `persist`,
    /// resolutions recorded during this pass are written back to the
    /// root manifest; the read-only hydrate path passes `false`.
    pub(crate) async fn flatten(
        &mut self,
        patterns: Vec<String>,
        persist: bool,
    ) -> Result<Vec<String>> {
        if !self.flags.flat {
            return Ok(patterns);
        }

        // The supplied chooser wins; the reporter's interactive prompt
        // is the fallback.
        let chooser: &(dyn Disambiguator) = match &self.disambiguator {
            Some(disambiguator) => disambiguator.as_ref(),
            None => &self.reporter,
        };

        let mut flattened = Vec::new();
        for name in self.resolver.get_all_dependency_names_by_level_order(&patterns) {
            // Candidate versions, with the packages that requested them.
            let candidates: Vec<(String, Vec<String>)> = self
                .resolver
                .get_all_info_for_package_name(&name)
                .into_iter()
                .filter(|resolved| !self.resolver.is_ignored(resolved))
                .map(|resolved| {
                    let reference = self.resolver.reference(resolved.reference);
                    let parents: Vec<String> = reference
                        .requests
                        .iter()
                        .map(|request| match &request.parent {
                            Some(parent) => pattern_name(parent).to_string(),
                            None => "the project".to_string(),
                        })
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    (resolved.version.clone(), parents)
                })
                .collect();

            match candidates.len() {
                0 => continue,
                1 => {
                    // Single version; any pattern of the name stands for
                    // it.
                    if let Some(pattern) = self
                        .resolver
                        .patterns_by_package
                        .get(&name)
                        .and_then(|patterns| patterns.first())
                    {
                        flattened.push(pattern.clone());
                    }
                    continue;
                }
                _ => {}
            }

            let version = match self.resolutions.get(&name) {
                Some(pinned)
                    if candidates.iter().any(|(version, _)| version == pinned) =>
                {
                    pinned.clone()
                }
                _ => {
                    let options: Vec<VersionChoice> = candidates
                        .iter()
                        .map(|(version, parents)| VersionChoice {
                            label: format!(
                                "used by {}, version {version}",
                                parents.join(", ")
                            ),
                            value: version.clone(),
                        })
                        .collect();
                    let chosen = chooser.choose(&name, &options)?;
                    self.resolutions.insert(name.clone(), chosen.clone());
                    self.resolutions_added = true;
                    chosen
                }
            };

            flattened.push(self.resolver.collapse_all_versions_of_package(&name, &version)?);
        }

        if persist && self.resolutions_added {
            // Record the new pins in the consulted root manifest so the
            // next install is prompt-free.
            for file in &mut self.root_manifests {
                if file.exists {
                    for (name, version) in &self.resolutions {
                        file.manifest.resolutions.insert(name.clone(), version.clone());
                    }
                    break;
                }
            }
            self.config.save_root_manifests(&self.root_manifests)?;
            self.resolutions_added = false;
        }

        Ok(flattened)
    }
}
