//! Flat-mode collapsing with preset resolutions and scripted
//! disambiguation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;

use spool_cli::constants::LOCKFILE_FILENAME;
use spool_cli::flags::RawFlags;
use spool_cli::lockfile::Lockfile;
use spool_cli::reporter::PresetDisambiguator;
use spool_cli::test_utils::{test_config, IndexBuilder};

use crate::make_install;

fn write_flat_project(temp: &TempDir) {
    // Two roots pull in conflicting versions of `b`; the recorded
    // resolution decides without prompting.
    std::fs::write(
        temp.path().join("spool.toml"),
        "name = \"app\"\nflat = true\n\n\
         [dependencies]\nuses-old = \"^1.0.0\"\nuses-new = \"^1.0.0\"\n\n\
         [resolutions]\nb = \"2.0.0\"\n",
    )
    .unwrap();
}

fn build_index(config: &spool_cli::config::Config) {
    IndexBuilder::new(config)
        .package("uses-old", "1.0.0", &[("b", "^1.0.0")], None)
        .package("uses-new", "1.0.0", &[("b", "^2.0.0")], None)
        .package("b", "1.0.0", &[], None)
        .package("b", "2.0.0", &[], None)
        .write();
}

#[tokio::test]
async fn preset_resolution_collapses_without_prompt() {
    let temp = TempDir::new().unwrap();
    write_flat_project(&temp);

    let config = Arc::new(test_config(&temp));
    build_index(&config);

    // Quiet, non-interactive install: any prompt would fail it.
    let mut install = make_install(config.clone(), RawFlags::default());
    install.install().await.unwrap();

    // Both `b` patterns collapsed to 2.0.0.
    let lockfile = Lockfile::load(&temp.path().join(LOCKFILE_FILENAME)).unwrap();
    assert_eq!(lockfile.cache.get("b@^1.0.0").unwrap().version, "2.0.0");
    assert_eq!(lockfile.cache.get("b@^2.0.0").unwrap().version, "2.0.0");

    // Only the chosen version was linked, at the top.
    let modules = temp.path().join("spool_modules");
    assert_eq!(std::fs::read_to_string(modules.join("b/lib.txt")).unwrap(), "b 2.0.0\n");
    assert!(!modules.join(".versions").join("b-1.0.0").exists());
}

#[tokio::test]
async fn scripted_disambiguator_collapses_and_records_the_choice() {
    let temp = TempDir::new().unwrap();
    // The same conflict with nothing recorded: the supplied chooser
    // decides instead of a prompt.
    std::fs::write(
        temp.path().join("spool.toml"),
        "flat = true\n\n[dependencies]\nuses-old = \"^1.0.0\"\nuses-new = \"^1.0.0\"\n",
    )
    .unwrap();

    let config = Arc::new(test_config(&temp));
    build_index(&config);

    let mut choices = BTreeMap::new();
    choices.insert("b".to_string(), "2.0.0".to_string());
    let mut install = make_install(config.clone(), RawFlags::default())
        .with_disambiguator(Box::new(PresetDisambiguator { choices }));
    install.install().await.unwrap();

    // The choice collapsed the graph and was pinned into the root
    // manifest for the next run.
    let lockfile = Lockfile::load(&temp.path().join(LOCKFILE_FILENAME)).unwrap();
    assert_eq!(lockfile.cache.get("b@^1.0.0").unwrap().version, "2.0.0");
    assert_eq!(lockfile.cache.get("b@^2.0.0").unwrap().version, "2.0.0");

    let manifest = std::fs::read_to_string(temp.path().join("spool.toml")).unwrap();
    assert!(manifest.contains("[resolutions]"));
    assert!(manifest.contains("b = \"2.0.0\""));
}

#[tokio::test]
async fn missing_resolution_fails_fast_when_non_interactive() {
    let temp = TempDir::new().unwrap();
    // Same conflict, but no recorded resolution.
    std::fs::write(
        temp.path().join("spool.toml"),
        "flat = true\n\n[dependencies]\nuses-old = \"^1.0.0\"\nuses-new = \"^1.0.0\"\n",
    )
    .unwrap();

    let config = Arc::new(test_config(&temp));
    build_index(&config);

    let err = make_install(config, RawFlags::default()).install().await.unwrap_err();
    assert!(err.to_string().contains("stdin is not a terminal"));
}

#[tokio::test]
async fn flat_mode_repeats_deterministically() {
    let temp = TempDir::new().unwrap();
    write_flat_project(&temp);

    let config = Arc::new(test_config(&temp));
    build_index(&config);

    make_install(config.clone(), RawFlags::default()).install().await.unwrap();
    let first = std::fs::read_to_string(temp.path().join(LOCKFILE_FILENAME)).unwrap();

    // Bailout still runs the flattener, and the outcome is identical.
    make_install(config.clone(), RawFlags::default()).install().await.unwrap();
    let second = std::fs::read_to_string(temp.path().join(LOCKFILE_FILENAME)).unwrap();
    assert_eq!(first, second);
}
