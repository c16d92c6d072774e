//! Offline-mirror pruning after a successful install.

use std::sync::Arc;

use tempfile::TempDir;

use spool_cli::flags::RawFlags;
use spool_cli::test_utils::{test_config_with_options, IndexBuilder};

use crate::make_install;

#[tokio::test]
async fn stale_mirror_tarballs_are_pruned() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("spool.toml"),
        "[dependencies]\nx = \"^1.0.0\"\ny = \"^2.0.0\"\n",
    )
    .unwrap();

    let mirror = temp.path().join("mirror");
    std::fs::create_dir_all(&mirror).unwrap();
    for name in ["x-1.tgz", "y-2.tgz", "z-old.tgz"] {
        std::fs::write(mirror.join(name), "tar").unwrap();
    }

    let config = Arc::new(test_config_with_options(&temp, "offline-mirror = \"./mirror\"\n"));
    IndexBuilder::new(&config)
        .package("x", "1.0.0", &[], Some("https://m/x-1.tgz#aa"))
        .package("y", "2.0.0", &[], Some("https://m/y-2.tgz#bb"))
        .write();

    make_install(config, RawFlags::default()).install().await.unwrap();

    assert!(mirror.join("x-1.tgz").exists());
    assert!(mirror.join("y-2.tgz").exists());
    assert!(!mirror.join("z-old.tgz").exists());
}
