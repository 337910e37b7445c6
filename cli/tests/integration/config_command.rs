//! `bulwark config` against a throwaway config file.

#![allow(clippy::expect_used)]

use predicates::prelude::*;
use tempfile::TempDir;

use crate::cli_tests::bulwark;

#[test]
fn test_config_show_lists_defaults() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cloud.region:"))
        .stdout(predicate::str::contains("us-east-1"))
        .stdout(predicate::str::contains("timeouts.gate_secs:"));
}

#[test]
fn test_config_set_persists_value() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["config", "set", "concurrency", "8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set concurrency = 8"));

    let output = bulwark(&home)
        .args(["config", "show", "--json"])
        .output()
        .expect("run");
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(v["config"]["concurrency"], 8);
    let content =
        std::fs::read_to_string(home.path().join("config.yaml")).expect("config written");
    assert!(content.contains("concurrency: 8"));
}

#[test]
fn test_config_set_unknown_key_lists_valid_keys() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["config", "set", "cloud.zone", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown setting: cloud.zone"))
        .stderr(predicate::str::contains("cloud.region"));
    assert!(!home.path().join("config.yaml").exists());
}

#[test]
fn test_config_set_invalid_value_json_error_code() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["config", "set", "timeouts.gate_secs", "0", "--json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""code": "INVALID_CONFIG""#));
}

#[test]
fn test_corrupt_config_is_reported() {
    let home = TempDir::new().expect("tempdir");
    std::fs::write(home.path().join("config.yaml"), "concurrency: [").expect("write");
    bulwark(&home)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot parse"));
}
