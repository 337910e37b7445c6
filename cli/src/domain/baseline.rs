//! Kernel and network baseline applied before any firewall change.
//!
//! The baseline is a fixed set of sysctl values. Applying it is a diff:
//! only keys whose live value differs are written, and the persisted file
//! is rewritten only when its content differs.

use std::collections::BTreeMap;

use crate::domain::shell::{read_file_command, write_file_command};

/// Persisted baseline, loaded by `systemd-sysctl` on boot.
pub const BASELINE_PATH: &str = "/etc/sysctl.d/60-bulwark-baseline.conf";

pub const BASELINE: &[(&str, &str)] = &[
    ("fs.protected_hardlinks", "1"),
    ("fs.protected_symlinks", "1"),
    ("kernel.dmesg_restrict", "1"),
    ("kernel.kptr_restrict", "2"),
    ("net.ipv4.conf.all.accept_redirects", "0"),
    ("net.ipv4.conf.all.accept_source_route", "0"),
    ("net.ipv4.conf.all.log_martians", "1"),
    ("net.ipv4.conf.all.rp_filter", "1"),
    ("net.ipv4.conf.all.send_redirects", "0"),
    ("net.ipv4.conf.default.accept_redirects", "0"),
    ("net.ipv4.conf.default.rp_filter", "1"),
    ("net.ipv4.icmp_echo_ignore_broadcasts", "1"),
    ("net.ipv4.tcp_syncookies", "1"),
    ("net.ipv6.conf.all.accept_redirects", "0"),
    ("net.ipv6.conf.default.accept_redirects", "0"),
];

/// Work needed to bring a host to the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BaselinePlan {
    /// `(key, value)` pairs whose live value differs.
    pub changes: Vec<(String, String)>,
    /// Whether the persisted file must be (re)written.
    pub write_file: bool,
}

impl BaselinePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.write_file
    }

    /// Commands that apply this plan. Empty when nothing differs.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        let mut cmds: Vec<String> = self
            .changes
            .iter()
            .map(|(k, v)| format!("sysctl -w {k}={v}"))
            .collect();
        if self.write_file {
            cmds.push(write_file_command(BASELINE_PATH, &render_baseline()));
        }
        cmds
    }
}

/// Command that prints the live value of every baseline key.
///
/// `-e` ignores keys the running kernel does not have.
#[must_use]
pub fn read_live_command() -> String {
    let keys: Vec<&str> = BASELINE.iter().map(|(k, _)| *k).collect();
    format!("sysctl -e {}", keys.join(" "))
}

#[must_use]
pub fn read_persisted_command() -> String {
    read_file_command(BASELINE_PATH)
}

/// The persisted file content.
#[must_use]
pub fn render_baseline() -> String {
    let mut out = String::from("# Managed by bulwark. Do not edit.\n");
    for (k, v) in BASELINE {
        out.push_str(k);
        out.push_str(" = ");
        out.push_str(v);
        out.push('\n');
    }
    out
}

/// Parse `key = value` lines as printed by `sysctl`.
#[must_use]
pub fn parse_sysctl_output(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once('=')?;
            let key = k.trim();
            if key.is_empty() || key.starts_with('#') {
                return None;
            }
            let value = v.split_whitespace().collect::<Vec<_>>().join(" ");
            Some((key.to_string(), value))
        })
        .collect()
}

/// Diff live values and persisted content against the baseline.
///
/// Keys absent from `live` are skipped: the kernel does not expose them.
#[must_use]
pub fn plan(live: &BTreeMap<String, String>, persisted: &str) -> BaselinePlan {
    let changes = BASELINE
        .iter()
        .filter_map(|(k, want)| match live.get(*k) {
            Some(have) if have != want => Some(((*k).to_string(), (*want).to_string())),
            _ => None,
        })
        .collect();
    BaselinePlan {
        changes,
        write_file: persisted != render_baseline(),
    }
}
