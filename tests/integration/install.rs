//! Fresh installs, bailouts and the crash-recovery protocol.

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;

use spool_cli::constants::LOCKFILE_FILENAME;
use spool_cli::flags::RawFlags;
use spool_cli::lockfile::Lockfile;
use spool_cli::registry::{Manifest, RegistryKind};
use spool_cli::test_utils::{test_config, IndexBuilder};

use crate::{make_install, witness_path};

#[tokio::test]
async fn fresh_install_resolves_links_and_persists() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("spool.toml"),
        "name = \"app\"\n\n[dependencies]\na = \"^1.0.0\"\n",
    )
    .unwrap();

    let config = Arc::new(test_config(&temp));
    IndexBuilder::new(&config)
        .package("a", "1.0.0", &[("b", "^1.0.0")], Some("https://m/a-1.0.0.tgz#aa"))
        .package("b", "1.0.0", &[], Some("https://m/b-1.0.0.tgz#bb"))
        .write();

    let mut install = make_install(config.clone(), RawFlags::default());
    let patterns = install.install().await.unwrap();
    assert_eq!(patterns, vec!["a@^1.0.0"]);

    // Linked tree, lockfile and witness are all in place.
    let modules = temp.path().join("spool_modules");
    assert!(modules.join("a/lib.txt").exists());
    assert!(modules.join("b/lib.txt").exists());
    assert!(witness_path(temp.path()).exists());

    let lockfile = Lockfile::load(&temp.path().join(LOCKFILE_FILENAME)).unwrap();
    assert_eq!(lockfile.cache.get("a@^1.0.0").unwrap().version, "1.0.0");
    assert_eq!(lockfile.cache.get("b@^1.0.0").unwrap().version, "1.0.0");
    assert_eq!(
        lockfile.cache.get("b@^1.0.0").unwrap().resolved.as_deref(),
        Some("https://m/b-1.0.0.tgz#bb")
    );
}

#[tokio::test]
async fn second_install_bails_out_without_relinking() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("spool.toml"), "[dependencies]\na = \"^1.0.0\"\n").unwrap();

    let config = Arc::new(test_config(&temp));
    IndexBuilder::new(&config).package("a", "1.0.0", &[], None).write();

    make_install(config.clone(), RawFlags::default()).install().await.unwrap();

    // Damage the linked tree in a way the plain integrity check cannot
    // see; a bailed-out run must not repair it.
    let canary = temp.path().join("spool_modules/a/lib.txt");
    std::fs::remove_file(&canary).unwrap();

    let mut second = make_install(config.clone(), RawFlags::default());
    let patterns = second.install().await.unwrap();
    // With the lockfile pinning the name, the collected pattern is bare.
    assert_eq!(patterns, vec!["a"]);
    assert!(!canary.exists(), "bailout must not have relinked");
    assert!(witness_path(temp.path()).exists());
}

#[tokio::test]
async fn check_files_defeats_the_shallow_bailout() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("spool.toml"), "[dependencies]\na = \"^1.0.0\"\n").unwrap();

    let config = Arc::new(test_config(&temp));
    IndexBuilder::new(&config).package("a", "1.0.0", &[], None).write();

    let raw = RawFlags { check_files: true, ..Default::default() };
    make_install(config.clone(), raw.clone()).install().await.unwrap();

    // Removing the package directory invalidates the recorded files.
    std::fs::remove_dir_all(temp.path().join("spool_modules/a")).unwrap();

    make_install(config.clone(), raw).install().await.unwrap();
    assert!(temp.path().join("spool_modules/a/lib.txt").exists());
}

#[tokio::test]
async fn force_reinstalls_even_when_up_to_date() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("spool.toml"), "[dependencies]\na = \"^1.0.0\"\n").unwrap();

    let config = Arc::new(test_config(&temp));
    IndexBuilder::new(&config).package("a", "1.0.0", &[], None).write();

    make_install(config.clone(), RawFlags::default()).install().await.unwrap();
    let canary = temp.path().join("spool_modules/a/lib.txt");
    std::fs::remove_file(&canary).unwrap();

    let raw = RawFlags { force: true, ..Default::default() };
    make_install(config.clone(), raw).install().await.unwrap();
    assert!(canary.exists(), "--force must relink");
}

#[tokio::test]
async fn lockfile_rewrite_is_skipped_when_unchanged() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("spool.toml"), "[dependencies]\na = \"^1.0.0\"\n").unwrap();

    let config = Arc::new(test_config(&temp));
    IndexBuilder::new(&config)
        .package("a", "1.0.0", &[], Some("https://m/a-1.0.0.tgz#aa"))
        .write();

    make_install(config.clone(), RawFlags::default()).install().await.unwrap();

    // A comment survives only if the second run skips the rewrite.
    let lock_path = temp.path().join(LOCKFILE_FILENAME);
    let mut content = std::fs::read_to_string(&lock_path).unwrap();
    content.push_str("# sentinel\n");
    std::fs::write(&lock_path, &content).unwrap();

    // Skip the bailout so the persister actually runs.
    let raw = RawFlags { skip_integrity_check: true, ..Default::default() };
    make_install(config.clone(), raw).install().await.unwrap();

    let after = std::fs::read_to_string(&lock_path).unwrap();
    assert!(after.contains("# sentinel"), "unchanged lockfile must not be rewritten");
}

#[tokio::test]
async fn frozen_lockfile_violation_leaves_cwd_untouched() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("spool.toml"),
        "[dependencies]\na = \"^1.0.0\"\nb = \"^2.0.0\"\n",
    )
    .unwrap();

    let config = Arc::new(test_config(&temp));
    IndexBuilder::new(&config)
        .package("a", "1.0.0", &[], None)
        .package("b", "2.0.0", &[], None)
        .write();

    // Lockfile knows only `a`.
    let mut image = BTreeMap::new();
    image.insert(
        "a@^1.0.0".to_string(),
        spool_cli::lockfile::LockedEntry {
            version: "1.0.0".to_string(),
            resolved: None,
            registry: RegistryKind::Spool,
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
        },
    );
    Lockfile::empty().save(&temp.path().join(LOCKFILE_FILENAME), &image).unwrap();
    let lock_before = std::fs::read_to_string(temp.path().join(LOCKFILE_FILENAME)).unwrap();

    let raw = RawFlags { frozen_lockfile: true, ..Default::default() };
    let err = make_install(config.clone(), raw).install().await.unwrap_err();
    assert!(err.to_string().contains("--frozen-lockfile"));

    // Nothing in the working directory moved.
    assert!(!temp.path().join("spool_modules").exists());
    assert!(!witness_path(temp.path()).exists());
    let lock_after = std::fs::read_to_string(temp.path().join(LOCKFILE_FILENAME)).unwrap();
    assert_eq!(lock_before, lock_after);
}

#[tokio::test]
async fn failed_script_leaves_no_witness_and_no_lockfile() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("spool.toml"), "[dependencies]\nbad = \"^1.0.0\"\n").unwrap();

    let config = Arc::new(test_config(&temp));
    let mut scripts = BTreeMap::new();
    scripts.insert("install".to_string(), "exit 7".to_string());
    IndexBuilder::new(&config)
        .package_manifest(
            RegistryKind::Spool,
            Manifest {
                name: Some("bad".into()),
                version: Some("1.0.0".into()),
                scripts,
                ..Default::default()
            },
        )
        .write();

    let err = make_install(config.clone(), RawFlags::default()).install().await.unwrap_err();
    assert!(err.to_string().contains("exit code 7") || err.to_string().contains("failed"));

    // The linker ran, but the install is visibly incomplete: no
    // witness, no lockfile, so the next run starts over.
    assert!(!witness_path(temp.path()).exists());
    assert!(!temp.path().join(LOCKFILE_FILENAME).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn root_lifecycle_phases_fire_around_the_pipeline() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("spool.toml"),
        "name = \"app\"\n\n\
         [scripts]\n\
         preinstall = \"touch phase-preinstall\"\n\
         install = \"touch phase-install\"\n\
         postinstall = \"touch phase-postinstall\"\n\
         prepare = \"touch phase-prepare\"\n",
    )
    .unwrap();

    let config = Arc::new(test_config(&temp));
    make_install(config, RawFlags::default()).install().await.unwrap();

    for phase in ["preinstall", "install", "postinstall", "prepare"] {
        assert!(temp.path().join(format!("phase-{phase}")).exists(), "missing {phase}");
    }
}

#[tokio::test]
async fn clean_marker_purges_matching_files() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("spool.toml"), "[dependencies]\na = \"^1.0.0\"\n").unwrap();
    std::fs::write(temp.path().join(".spoolclean"), "# trim docs\n*.txt\n").unwrap();

    let config = Arc::new(test_config(&temp));
    IndexBuilder::new(&config).package("a", "1.0.0", &[], None).write();

    make_install(config, RawFlags::default()).install().await.unwrap();

    let package = temp.path().join("spool_modules/a");
    assert!(package.exists());
    assert!(!package.join("lib.txt").exists(), "clean step must purge *.txt");
}

#[tokio::test]
async fn har_flag_writes_request_archive() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("spool.toml"), "[dependencies]\n").unwrap();

    let config = Arc::new(test_config(&temp));
    let raw = RawFlags { har: true, skip_integrity_check: true, ..Default::default() };
    make_install(config, raw).install().await.unwrap();

    let har_files: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with("spool-install_") && name.ends_with(".har")
        })
        .collect();
    assert_eq!(har_files.len(), 1);

    let har: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(har_files[0].path()).unwrap()).unwrap();
    assert_eq!(har["log"]["version"], "1.2");
}

#[tokio::test]
async fn production_mode_skips_dev_dependencies() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("spool.toml"),
        "[dependencies]\na = \"^1.0.0\"\n\n[dev-dependencies]\nd = \"^1.0.0\"\n",
    )
    .unwrap();

    let home = temp.path().join("home");
    std::fs::create_dir_all(&home).unwrap();
    let config = Arc::new(
        spool_cli::config::Config::load_with_home(temp.path().to_path_buf(), home, true)
            .unwrap(),
    );
    IndexBuilder::new(&config)
        .package("a", "1.0.0", &[], None)
        .package("d", "1.0.0", &[], None)
        .write();

    make_install(config.clone(), RawFlags::default()).install().await.unwrap();

    assert!(temp.path().join("spool_modules/a").exists());
    assert!(!temp.path().join("spool_modules/d").exists());
}
