//! Binary-level checks of the install command surface.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn install_rejects_positional_arguments() {
    let temp = TempDir::new().unwrap();
    Command::cargo_bin("spool")
        .unwrap()
        .args(["install", "foo", "--dev"])
        .current_dir(temp.path())
        .env("SPOOL_HOME", temp.path().join("home"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("spool add foo --dev"));
}

#[test]
fn deprecated_save_flags_still_parse() {
    let temp = TempDir::new().unwrap();
    Command::cargo_bin("spool")
        .unwrap()
        .args(["install", "foo", "-D"])
        .current_dir(temp.path())
        .env("SPOOL_HOME", temp.path().join("home"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("deprecated"))
        .stderr(predicate::str::contains("spool add foo --dev"));
}

#[test]
fn install_help_lists_lockfile_flags() {
    Command::cargo_bin("spool")
        .unwrap()
        .args(["install", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--frozen-lockfile"))
        .stdout(predicate::str::contains("--pure-lockfile"));
}
