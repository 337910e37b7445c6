//! `deploy --dry-run`, `harden` and `status` paths that stop before any
//! provider or host is contacted.

#![allow(clippy::expect_used)]

use predicates::prelude::*;
use tempfile::TempDir;

use crate::cli_tests::bulwark;

const PLAN: &str = r"
name: edge
instances:
  - spec:
      name: edge-a
      blueprint: ubuntu_24_04
      bundle: nano_3_0
      availability_zone: eu-central-1a
    profile:
      kind: web
      management_port: 6677
    static_address: edge-a-ip
    bootstrap:
      user: ubuntu
      identity_file: ~/.ssh/bootstrap.pem
    credential:
      user: ops
      identity_file: ~/.ssh/ops
    services:
      - name: nginx
        install: ['apt-get install -y nginx']
        uninstall: ['apt-get remove -y nginx']
  - spec:
      name: edge-b
      blueprint: ubuntu_24_04
      bundle: nano_3_0
      availability_zone: eu-central-1b
    profile:
      kind: bastion
      management_port: 7788
    bootstrap:
      user: ubuntu
      identity_file: ~/.ssh/bootstrap.pem
    credential:
      user: ops
      identity_file: ~/.ssh/ops
";

fn plan(home: &TempDir, content: &str) -> std::path::PathBuf {
    let path = home.path().join("plan.yaml");
    std::fs::write(&path, content).expect("write plan");
    path
}

#[test]
fn test_dry_run_reports_planned_ledger() {
    let home = TempDir::new().expect("tempdir");
    let path = plan(&home, PLAN);
    let output = bulwark(&home)
        .args(["deploy", "--dry-run", "--json"])
        .arg(&path)
        .output()
        .expect("run");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(v["succeeded"], true);
    let result = &v["result"];
    assert_eq!(result["dry_run"], true);
    for phase in result["phase_results"].as_array().expect("phases") {
        assert_eq!(phase["status"], "planned");
    }

    let ledger = result["ledger"].as_array().expect("ledger");
    let kinds: Vec<(&str, &str)> = ledger
        .iter()
        .map(|e| {
            (
                e["resource_type"].as_str().expect("type"),
                e["instance"].as_str().expect("instance"),
            )
        })
        .collect();
    // Infrastructure for both hosts precedes any hardening effect.
    let first_hardening = kinds.iter().position(|(t, _)| *t == "host_filter").expect("hardening");
    assert!(kinds[..first_hardening].contains(&("instance", "edge-a")));
    assert!(kinds[..first_hardening].contains(&("instance", "edge-b")));
    assert!(kinds[..first_hardening].contains(&("static_address", "edge-a")));
    assert_eq!(kinds.last(), Some(&("service", "edge-a")));
}

#[test]
fn test_dry_run_human_output() {
    let home = TempDir::new().expect("tempdir");
    let path = plan(&home, PLAN);
    bulwark(&home)
        .args(["deploy", "--dry-run"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("(dry run)"))
        .stdout(predicate::str::contains("Planned effects:"))
        .stdout(predicate::str::contains("6677/tcp@0.0.0.0/0"));
}

#[test]
fn test_invalid_plan_is_rejected_before_anything_runs() {
    let home = TempDir::new().expect("tempdir");
    let path = plan(&home, &PLAN.replace("name: edge-b", "name: edge-a"));
    bulwark(&home)
        .args(["deploy", "--dry-run", "--json"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""code": "INVALID_PLAN""#))
        .stdout(predicate::str::contains("more than once"));
}

#[test]
fn test_plan_that_would_lock_out_the_operator_is_rejected() {
    let home = TempDir::new().expect("tempdir");
    let path = plan(&home, &PLAN.replacen("user: ops", "user: deploy", 1));
    bulwark(&home)
        .args(["deploy", "--dry-run"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("edge-a"));
}

#[test]
fn test_harden_unknown_instance() {
    let home = TempDir::new().expect("tempdir");
    let path = plan(&home, PLAN);
    bulwark(&home)
        .args(["harden", "--yes", "--instance", "edge-z"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("'edge-z' is not part of the plan"));
}

#[test]
fn test_status_without_run_record() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["status", "edge-a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no hardening run recorded for 'edge-a'"));
}

#[test]
fn test_status_rejects_path_like_names() {
    let home = TempDir::new().expect("tempdir");
    bulwark(&home)
        .args(["status", "../etc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid instance name"));
}
