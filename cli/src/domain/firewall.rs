//! Security profile compiler and host packet-filter rendering.
//!
//! [`compile`] is pure and deterministic: the same profile always yields the
//! same ordered rule list, regardless of the order rules were declared in.
//! Layers, in order:
//!
//! 1. loopback accept
//! 2. established/related accept
//! 3. rate-limited accept for the management port
//! 4. public accepts (sorted, de-duplicated)
//! 5. restricted accepts scoped to their source (sorted, de-duplicated)
//! 6. default policy: drop inbound, accept outbound

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::profile::{MAX_BURST, PortSpec, RateLimit, RestrictedRule, SecurityProfile};
use crate::domain::shell::write_file_command;

pub const RULES_DIR: &str = "/etc/iptables";
/// Where `iptables-persistent` loads IPv4 rules from on boot.
pub const RULES_V4_PATH: &str = "/etc/iptables/rules.v4";
/// Where `iptables-persistent` loads IPv6 rules from on boot.
pub const RULES_V6_PATH: &str = "/etc/iptables/rules.v6";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FilterRule {
    AcceptLoopback,
    AcceptEstablished,
    AcceptRateLimited {
        port: u16,
        burst: u8,
        window_secs: u32,
    },
    /// Management-layer accept used only while the channel moves. Counts
    /// hits at [`MAX_BURST`] in its own list, so the final rules start from
    /// an empty one.
    AcceptTransitional {
        port: u16,
        window_secs: u32,
    },
    AcceptPublic(PortSpec),
    AcceptRestricted(RestrictedRule),
    DenyInboundAllowOutbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// Compile a profile into its ordered rule list. Never fails.
#[must_use]
pub fn compile(profile: &SecurityProfile) -> Vec<FilterRule> {
    let mut rules = vec![FilterRule::AcceptLoopback, FilterRule::AcceptEstablished];

    if let Some(port) = profile.management_port {
        rules.push(rate_limited(port, profile.rate_limit));
    }

    let mut public = profile.public_rules.clone();
    public.sort();
    public.dedup();
    rules.extend(public.into_iter().map(FilterRule::AcceptPublic));

    let mut restricted = profile.restricted_rules.clone();
    restricted.sort();
    restricted.dedup();
    rules.extend(restricted.into_iter().map(FilterRule::AcceptRestricted));

    rules.push(FilterRule::DenyInboundAllowOutbound);
    rules
}

fn rate_limited(port: u16, limit: RateLimit) -> FilterRule {
    FilterRule::AcceptRateLimited {
        port,
        burst: limit.burst,
        window_secs: limit.window_secs,
    }
}

/// Rules in force while the management channel moves from `port`.
///
/// Every management accept becomes transitional and `port` gets one directly
/// after them, so the current channel stays open. The pipeline's own
/// sessions during the move never count against the profile's limit.
#[must_use]
pub fn with_transitional_port(rules: &[FilterRule], port: u16) -> Vec<FilterRule> {
    let mut out: Vec<FilterRule> = rules
        .iter()
        .map(|r| match r {
            FilterRule::AcceptRateLimited {
                port: managed,
                window_secs,
                ..
            } => FilterRule::AcceptTransitional {
                port: *managed,
                window_secs: *window_secs,
            },
            other => other.clone(),
        })
        .collect();
    let already = out
        .iter()
        .any(|r| matches!(r, FilterRule::AcceptTransitional { port: p, .. } if *p == port));
    if already {
        return out;
    }
    let window_secs = out
        .iter()
        .find_map(|r| match r {
            FilterRule::AcceptTransitional { window_secs, .. } => Some(*window_secs),
            _ => None,
        })
        .unwrap_or(RateLimit::default().window_secs);
    let insert_at = out
        .iter()
        .rposition(|r| {
            matches!(
                r,
                FilterRule::AcceptLoopback
                    | FilterRule::AcceptEstablished
                    | FilterRule::AcceptTransitional { .. }
            )
        })
        .map_or(0, |i| i + 1);
    out.insert(insert_at, FilterRule::AcceptTransitional { port, window_secs });
    out
}

/// Render rules as an `iptables-restore` / `ip6tables-restore` document.
#[must_use]
pub fn render(rules: &[FilterRule], family: IpFamily) -> String {
    let deny = rules.contains(&FilterRule::DenyInboundAllowOutbound);
    let inbound = if deny { "DROP" } else { "ACCEPT" };

    let mut out = String::from("# Generated by bulwark\n*filter\n");
    let _ = writeln!(out, ":INPUT {inbound} [0:0]");
    let _ = writeln!(out, ":FORWARD {inbound} [0:0]");
    out.push_str(":OUTPUT ACCEPT [0:0]\n");

    for rule in rules {
        match rule {
            FilterRule::AcceptLoopback => out.push_str("-A INPUT -i lo -j ACCEPT\n"),
            FilterRule::AcceptEstablished => {
                out.push_str("-A INPUT -m conntrack --ctstate ESTABLISHED,RELATED -j ACCEPT\n");
                if family == IpFamily::V6 {
                    out.push_str("-A INPUT -p ipv6-icmp -j ACCEPT\n");
                }
            }
            FilterRule::AcceptRateLimited {
                port,
                burst,
                window_secs,
            } => {
                render_rate_limited(&mut out, &format!("mgmt-{port}"), *port, *burst, *window_secs);
            }
            FilterRule::AcceptTransitional { port, window_secs } => {
                render_rate_limited(&mut out, &format!("transit-{port}"), *port, MAX_BURST, *window_secs);
            }
            FilterRule::AcceptPublic(spec) => {
                let _ = writeln!(
                    out,
                    "-A INPUT -p {} --dport {} -j ACCEPT",
                    spec.protocol, spec.port
                );
            }
            FilterRule::AcceptRestricted(rule) => {
                if rule.is_ipv6() == (family == IpFamily::V6) {
                    let _ = writeln!(
                        out,
                        "-A INPUT -p {} -s {} --dport {} -j ACCEPT",
                        rule.protocol, rule.source_scope, rule.port
                    );
                }
            }
            FilterRule::DenyInboundAllowOutbound => {}
        }
    }
    out.push_str("COMMIT\n");
    out
}

fn render_rate_limited(out: &mut String, list: &str, port: u16, burst: u8, window_secs: u32) {
    let matcher =
        format!("-A INPUT -p tcp --dport {port} -m conntrack --ctstate NEW -m recent --name {list}");
    let _ = writeln!(out, "{matcher} --set");
    let _ = writeln!(
        out,
        "{matcher} --update --seconds {window_secs} --hitcount {} -j DROP",
        u16::from(burst) + 1
    );
    let _ = writeln!(out, "-A INPUT -p tcp --dport {port} -j ACCEPT");
}

/// SHA-256 over both rendered documents, hex-encoded.
#[must_use]
pub fn fingerprint(rules: &[FilterRule]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(render(rules, IpFamily::V4).as_bytes());
    hasher.update(render(rules, IpFamily::V6).as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

// ── Host commands ────────────────────────────────────────────────────────────

/// Commands that persist `rules` and load them into the kernel.
#[must_use]
pub fn install_commands(rules: &[FilterRule]) -> Vec<String> {
    vec![
        "echo iptables-persistent iptables-persistent/autosave_v4 boolean false | debconf-set-selections".to_string(),
        "echo iptables-persistent iptables-persistent/autosave_v6 boolean false | debconf-set-selections".to_string(),
        "DEBIAN_FRONTEND=noninteractive apt-get install -y -q iptables-persistent".to_string(),
        format!("install -d -m 755 {RULES_DIR}"),
        write_file_command(RULES_V4_PATH, &render(rules, IpFamily::V4)),
        write_file_command(RULES_V6_PATH, &render(rules, IpFamily::V6)),
        format!("iptables-restore < {RULES_V4_PATH}"),
        format!("ip6tables-restore < {RULES_V6_PATH}"),
    ]
}

/// Commands that replace the persisted rules and reload them; the package
/// is already installed.
#[must_use]
pub fn reload_commands(rules: &[FilterRule]) -> Vec<String> {
    vec![
        write_file_command(RULES_V4_PATH, &render(rules, IpFamily::V4)),
        write_file_command(RULES_V6_PATH, &render(rules, IpFamily::V6)),
        format!("iptables-restore < {RULES_V4_PATH}"),
        format!("ip6tables-restore < {RULES_V6_PATH}"),
    ]
}

/// Commands that open the host filter again and forget the persisted rules.
#[must_use]
pub fn teardown_commands() -> Vec<String> {
    vec![
        "iptables -P INPUT ACCEPT".to_string(),
        "iptables -P FORWARD ACCEPT".to_string(),
        "iptables -F INPUT".to_string(),
        "ip6tables -P INPUT ACCEPT".to_string(),
        "ip6tables -P FORWARD ACCEPT".to_string(),
        "ip6tables -F INPUT".to_string(),
        format!("rm -f {RULES_V4_PATH} {RULES_V6_PATH}"),
    ]
}
