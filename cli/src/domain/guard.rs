//! Intrusion-prevention daemon (fail2ban) configuration.

use crate::domain::profile::SecurityProfile;
use crate::domain::shell::write_file_command;

pub const JAIL_PATH: &str = "/etc/fail2ban/jail.d/bulwark.local";
pub const ACTIVE_COMMAND: &str = "systemctl is-active fail2ban";

/// Jail configuration for `profile`; bans cover the management port and
/// every public port.
#[must_use]
pub fn render_jail(profile: &SecurityProfile) -> String {
    let ports: Vec<String> = profile
        .guarded_ports()
        .iter()
        .map(u16::to_string)
        .collect();
    format!(
        "# Managed by bulwark. Do not edit.\n\
         [DEFAULT]\n\
         bantime = {ban}\n\
         findtime = {find}\n\
         maxretry = {retry}\n\
         banaction = iptables-multiport\n\
         \n\
         [sshd]\n\
         enabled = true\n\
         port = {ports}\n\
         backend = systemd\n",
        ban = profile.guard.ban_seconds,
        find = profile.guard.find_seconds,
        retry = profile.guard.max_retry,
        ports = ports.join(","),
    )
}

#[must_use]
pub fn install_commands(profile: &SecurityProfile) -> Vec<String> {
    vec![
        "DEBIAN_FRONTEND=noninteractive apt-get install -y -q fail2ban".to_string(),
        write_file_command(JAIL_PATH, &render_jail(profile)),
        "systemctl enable fail2ban".to_string(),
        "systemctl restart fail2ban".to_string(),
    ]
}

#[must_use]
pub fn teardown_commands() -> Vec<String> {
    vec![
        "systemctl disable --now fail2ban".to_string(),
        format!("rm -f {JAIL_PATH}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::{GuardPolicy, PortSpec, RateLimit};

    #[test]
    fn test_jail_bans_management_and_public_ports() {
        let profile = SecurityProfile {
            name: "web".into(),
            management_port: Some(6677),
            public_rules: vec![PortSpec::tcp(443), PortSpec::tcp(80)],
            restricted_rules: vec![],
            rate_limit: RateLimit::default(),
            guard: GuardPolicy {
                ban_seconds: 86400,
                find_seconds: 300,
                max_retry: 3,
            },
            admin_user: "ops".into(),
        };
        let jail = render_jail(&profile);
        assert!(jail.contains("port = 80,443,6677\n"));
        assert!(jail.contains("bantime = 86400\n"));
        assert!(jail.contains("findtime = 300\n"));
        assert!(jail.contains("maxretry = 3\n"));
    }
}
