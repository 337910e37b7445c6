//! Argument parsing, help, version and the `compile` command.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

pub fn bulwark(home: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bulwark"));
    cmd.env("NO_COLOR", "1")
        .env("HOME", home.path())
        .env("BULWARK_CONFIG", home.path().join("config.yaml"))
        .env_remove("BULWARK_YES")
        .env_remove("CI");
    cmd
}

fn write(home: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = home.path().join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}

// --- Help and version ---

#[test]
fn test_cli_no_args_shows_help() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Lockout-safe hardening"));
}

#[test]
fn test_help_lists_every_command() {
    let home = TempDir::new().expect("tempdir");
    let output = bulwark(&home).arg("--help").output().expect("run");
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for cmd in ["deploy", "harden", "status", "compile", "config", "version"] {
        assert!(help.contains(cmd), "help is missing {cmd}");
    }
}

#[test]
fn test_version_command() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bulwark 0.1.0"));
}

#[test]
fn test_version_command_json() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["version", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""version": "0.1.0""#));
}

#[test]
fn test_unknown_command_fails() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home).arg("provision").assert().failure();
}

// --- compile ---

#[test]
fn test_compile_prints_ipv4_filter() {
    let home = TempDir::new().expect("tempdir");
    let profile = write(&home, "web.yaml", "kind: web\nmanagement_port: 6677\n");
    bulwark(&home)
        .arg("compile")
        .arg(&profile)
        .assert()
        .success()
        .stdout(predicate::str::contains(":INPUT DROP [0:0]"))
        .stdout(predicate::str::contains("--dport 6677 -m conntrack --ctstate NEW"))
        .stdout(predicate::str::contains("-A INPUT -p tcp --dport 443 -j ACCEPT"));
}

#[test]
fn test_compile_ipv6_keeps_only_ipv6_scopes() {
    let home = TempDir::new().expect("tempdir");
    let profile = write(
        &home,
        "overlay.yaml",
        "kind: overlay_node\nmanagement_port: 6677\noverlay_cidr: 10.8.0.0/16\nports:\n  - port: 9100\n    protocol: tcp\n",
    );
    bulwark(&home)
        .args(["compile", "--ipv6"])
        .arg(&profile)
        .assert()
        .success()
        .stdout(predicate::str::contains("ipv6-icmp"))
        .stdout(predicate::str::contains("10.8.0.0/16").not());
}

#[test]
fn test_compile_json_carries_fingerprint_and_both_documents() {
    let home = TempDir::new().expect("tempdir");
    let profile = write(&home, "bastion.yaml", "kind: bastion\nmanagement_port: 2222\n");
    let output = bulwark(&home)
        .args(["compile", "--json"])
        .arg(&profile)
        .output()
        .expect("run");
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(v["profile"], "bastion");
    assert_eq!(v["fingerprint"].as_str().expect("string").len(), 64);
    assert!(v["rendered"]["v4"].as_str().expect("v4").contains("2222"));
    assert!(v["rendered"]["v6"].as_str().expect("v6").contains("2222"));
}

#[test]
fn test_compile_is_deterministic() {
    let home = TempDir::new().expect("tempdir");
    let a = write(
        &home,
        "a.yaml",
        "kind: custom\nname: x\nmanagement_port: 6677\npublic_rules:\n  - {port: 443, protocol: tcp}\n  - {port: 80, protocol: tcp}\n",
    );
    let b = write(
        &home,
        "b.yaml",
        "kind: custom\nname: x\nmanagement_port: 6677\npublic_rules:\n  - {port: 80, protocol: tcp}\n  - {port: 443, protocol: tcp}\n  - {port: 80, protocol: tcp}\n",
    );
    let first = bulwark(&home).arg("compile").arg(&a).output().expect("run");
    let second = bulwark(&home).arg("compile").arg(&b).output().expect("run");
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn test_compile_rejects_invalid_profile_as_json_error() {
    let home = TempDir::new().expect("tempdir");
    let profile = write(
        &home,
        "bad.yaml",
        "kind: bastion\nmanagement_port: 6677\nrate_limit: {burst: 0, window_secs: 60}\n",
    );
    bulwark(&home)
        .args(["compile", "--json"])
        .arg(&profile)
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""error": true"#))
        .stdout(predicate::str::contains(r#""code": "INVALID_PROFILE""#));
}

#[test]
fn test_compile_missing_file_names_path() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["compile", "nowhere.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nowhere.yaml"));
}
