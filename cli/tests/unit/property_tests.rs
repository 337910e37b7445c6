//! Property-based tests for validation, compilation and generated commands.
//!
//! Uses `proptest` to verify invariants across many random inputs.

#![allow(clippy::expect_used)]

use proptest::prelude::*;

use bulwark_cli::domain::config::VALID_CONFIG_KEYS;
use bulwark_cli::domain::firewall::{self, FilterRule, IpFamily};
use bulwark_cli::domain::instance::{PortRule, validate_instance_name};
use bulwark_cli::domain::profile::{PortSpec, Protocol, RateLimit, SecurityProfile};
use bulwark_cli::domain::shell::shell_quote;
use bulwark_cli::domain::sshd::parse_effective_ports;
use bulwark_cli::domain::{validate_config_key, validate_config_value};

fn profile(port: u16, public: Vec<PortSpec>, burst: u8) -> SecurityProfile {
    SecurityProfile {
        name: "prop".into(),
        management_port: Some(port),
        public_rules: public,
        restricted_rules: vec![],
        rate_limit: RateLimit {
            burst,
            window_secs: 60,
        },
        guard: Default::default(),
        admin_user: "ops".into(),
    }
}

fn port_spec() -> impl Strategy<Value = PortSpec> {
    (1u16.., prop_oneof![Just(Protocol::Tcp), Just(Protocol::Udp)])
        .prop_map(|(port, protocol)| PortSpec { port, protocol })
}

// ============================================================================
// Configuration keys and values
// ============================================================================

proptest! {
    /// Keys outside the whitelist are rejected.
    #[test]
    fn prop_arbitrary_keys_rejected(key in "[a-z]{1,12}(\\.[a-z_]{1,12})?") {
        if !VALID_CONFIG_KEYS.contains(&key.as_str()) {
            prop_assert!(validate_config_key(&key).is_err(), "accepted invalid key: {key}");
        }
    }

    /// Concurrency accepts exactly 1..=64.
    #[test]
    fn prop_concurrency_range(n in 0u64..200) {
        let accepted = validate_config_value("concurrency", &n.to_string()).is_ok();
        prop_assert_eq!(accepted, (1..=64).contains(&n));
    }

    /// Well-formed regions are accepted.
    #[test]
    fn prop_regions_accepted(region in "[a-z]{2}-[a-z]{4,9}-[1-9]") {
        prop_assert!(validate_config_value("cloud.region", &region).is_ok(), "rejected {region}");
    }
}

#[test]
fn test_every_valid_key_accepted() {
    for key in VALID_CONFIG_KEYS {
        assert!(validate_config_key(key).is_ok(), "{key} rejected");
    }
}

// ============================================================================
// Profile compiler
// ============================================================================

proptest! {
    /// Declaration order and duplicates never change the compiled rules.
    #[test]
    fn prop_compile_ignores_declaration_order(
        port in 1u16..,
        (public, mut permuted) in prop::collection::vec(port_spec(), 0..8)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
    ) {
        let forward = firewall::compile(&profile(port, public.clone(), 6));
        permuted.extend(public);
        let shuffled = firewall::compile(&profile(port, permuted, 6));
        prop_assert_eq!(&forward, &shuffled);
        prop_assert_eq!(firewall::fingerprint(&forward), firewall::fingerprint(&shuffled));
    }

    /// Every compiled rule list starts with loopback and ends with the deny policy.
    #[test]
    fn prop_compile_layers(port in 1u16.., public in prop::collection::vec(port_spec(), 0..8)) {
        let rules = firewall::compile(&profile(port, public, 6));
        prop_assert_eq!(rules.first(), Some(&FilterRule::AcceptLoopback));
        prop_assert_eq!(rules.last(), Some(&FilterRule::DenyInboundAllowOutbound));
        let mgmt = rules
            .iter()
            .filter(|r| matches!(r, FilterRule::AcceptRateLimited { .. }))
            .count();
        prop_assert_eq!(mgmt, 1);
    }

    /// The management port is rate limited in both address families.
    #[test]
    fn prop_render_limits_management_port(port in 1u16.., burst in 1u8..=19) {
        let rules = firewall::compile(&profile(port, vec![], burst));
        let hitcount = format!("--hitcount {}", u16::from(burst) + 1);
        for family in [IpFamily::V4, IpFamily::V6] {
            let doc = firewall::render(&rules, family);
            let dport = format!("--dport {port} -m conntrack --ctstate NEW");
            prop_assert!(doc.contains(&dport));
            prop_assert!(doc.contains(&hitcount));
            prop_assert!(doc.ends_with("COMMIT\n"));
        }
    }

    /// Bursts outside what the kernel can count are rejected.
    #[test]
    fn prop_burst_bounds(burst in any::<u8>()) {
        let valid = profile(6677, vec![], burst).validate().is_ok();
        prop_assert_eq!(valid, (1..=19).contains(&burst));
    }

    #[test]
    fn prop_fingerprint_is_hex_sha256(port in 1u16..) {
        let fp = firewall::fingerprint(&firewall::compile(&profile(port, vec![], 6)));
        prop_assert_eq!(fp.len(), 64);
        prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

// ============================================================================
// Names, identifiers and remote commands
// ============================================================================

proptest! {
    #[test]
    fn prop_valid_instance_names_accepted(name in "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?") {
        prop_assert!(validate_instance_name(&name).is_ok(), "rejected {name}");
    }

    /// Names that could escape a directory or a shell are rejected.
    #[test]
    fn prop_unsafe_instance_names_rejected(
        prefix in "[a-z0-9]{0,5}",
        bad in prop_oneof![Just("/"), Just(".."), Just(" "), Just("'"), Just("$"), Just("A")],
        suffix in "[a-z0-9]{0,5}",
    ) {
        let name = format!("{prefix}{bad}{suffix}");
        prop_assert!(validate_instance_name(&name).is_err(), "accepted {name}");
    }

    /// ACL resource ids parse back into the rule they name.
    #[test]
    fn prop_port_rule_resource_id(port in 1u16.., udp in any::<bool>()) {
        let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };
        let rule = PortRule::public(port, protocol);
        prop_assert_eq!(PortRule::from_resource_id(&rule.resource_id()), Some(rule));
    }

    /// Outside the escape sequence, a quoted string carries no bare single quote.
    #[test]
    fn prop_shell_quote_encloses_input(s in ".{0,64}") {
        let quoted = shell_quote(&s);
        prop_assert!(quoted.starts_with('\'') && quoted.ends_with('\''));
        let inner = &quoted[1..quoted.len() - 1];
        prop_assert!(!inner.replace("'\\''", "").contains('\''));
        prop_assert_eq!(inner.replace("'\\''", "'"), s);
    }

    /// Effective ports come back sorted and unique whatever order sshd prints.
    #[test]
    fn prop_effective_ports_sorted(ports in prop::collection::vec(1u16.., 1..6)) {
        let output: String = ports.iter().map(|p| format!("port {p}\nuser ops\n")).collect();
        let parsed = parse_effective_ports(&output);
        let mut expected = ports.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(parsed, expected);
    }
}
