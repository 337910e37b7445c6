//! Remote-access daemon configuration for the management channel.
//!
//! The daemon is configured through a single drop-in so the distribution's
//! `sshd_config` stays untouched. During migration it listens on both the
//! current and target ports and admits both users; once the new channel is
//! verified it is narrowed to the target port and the admin user.

use crate::domain::shell::{shell_quote, write_file_command};

pub const DROP_IN_PATH: &str = "/etc/ssh/sshd_config.d/10-bulwark.conf";

pub const VALIDATE_COMMAND: &str = "sshd -t";
pub const RESTART_COMMAND: &str = "systemctl daemon-reload && systemctl restart ssh";
/// Prints the effective daemon configuration, one `keyword value` per line.
pub const QUERY_COMMAND: &str = "sshd -T";

/// What the daemon should listen on and who it admits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub ports: Vec<u16>,
    pub allow_users: Vec<String>,
}

impl DaemonConfig {
    /// Both channels open: used between restart and verification.
    #[must_use]
    pub fn transitional(current_port: u16, current_user: &str, target_port: u16, admin_user: &str) -> Self {
        let mut ports = vec![current_port, target_port];
        ports.sort_unstable();
        ports.dedup();
        let mut allow_users = vec![current_user.to_string(), admin_user.to_string()];
        allow_users.sort();
        allow_users.dedup();
        Self { ports, allow_users }
    }

    /// Only the target channel.
    #[must_use]
    pub fn target(target_port: u16, admin_user: &str) -> Self {
        Self {
            ports: vec![target_port],
            allow_users: vec![admin_user.to_string()],
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("# Managed by bulwark. Do not edit.\n");
        for port in &self.ports {
            out.push_str(&format!("Port {port}\n"));
        }
        out.push_str("PasswordAuthentication no\n");
        out.push_str("KbdInteractiveAuthentication no\n");
        out.push_str("PubkeyAuthentication yes\n");
        out.push_str("PermitRootLogin no\n");
        out.push_str("MaxAuthTries 3\n");
        out.push_str(&format!("AllowUsers {}\n", self.allow_users.join(" ")));
        out
    }

    /// Write the drop-in, validate it and restart the daemon.
    #[must_use]
    pub fn apply_commands(&self) -> Vec<String> {
        vec![
            write_file_command(DROP_IN_PATH, &self.render()),
            VALIDATE_COMMAND.to_string(),
            RESTART_COMMAND.to_string(),
        ]
    }
}

/// Commands that create `admin_user` with passwordless sudo, seeding its
/// authorized keys from `from_user` when it has none.
#[must_use]
pub fn ensure_admin_commands(admin_user: &str, from_user: &str) -> Vec<String> {
    if admin_user == from_user {
        return Vec::new();
    }
    let home = format!("/home/{admin_user}");
    let sudoers = format!("/etc/sudoers.d/90-bulwark-{admin_user}");
    vec![
        format!("id -u {admin_user} >/dev/null 2>&1 || useradd -m -s /bin/bash {admin_user}"),
        format!("install -d -m 700 -o {admin_user} -g {admin_user} {home}/.ssh"),
        format!(
            "test -s {home}/.ssh/authorized_keys || install -m 600 -o {admin_user} -g {admin_user} ~{from_user}/.ssh/authorized_keys {home}/.ssh/authorized_keys"
        ),
        write_file_command(&sudoers, &format!("{admin_user} ALL=(ALL) NOPASSWD:ALL\n")),
        format!("chmod 440 {sudoers}"),
        format!("visudo -cf {}", shell_quote(&sudoers)),
    ]
}

/// Listening ports from `sshd -T` output.
#[must_use]
pub fn parse_effective_ports(output: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("port "))
        .filter_map(|p| p.trim().parse().ok())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}
