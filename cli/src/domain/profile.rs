//! Security profiles: the declarative rule set a host is hardened against.
//!
//! Profiles are loaded once per run as a [`ProfileVariant`] and resolved into
//! an immutable [`SecurityProfile`]. Nothing here touches the network.

use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::ProfileError;

/// Login names accepted for the administrative user.
pub static ADMIN_USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("valid regex")
});

/// Highest burst the kernel `recent` match can express (it tracks 20 hits).
pub const MAX_BURST: u8 = 19;

// ── Rule value types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

/// A port open to everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortSpec {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
}

impl PortSpec {
    #[must_use]
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// A port open only to `source_scope` (a CIDR such as an overlay network).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RestrictedRule {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    pub source_scope: String,
}

impl RestrictedRule {
    /// Whether the scope is an IPv6 network. Unparseable scopes count as IPv4.
    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        parse_cidr(&self.source_scope).is_some_and(|(addr, _)| addr.is_ipv6())
    }
}

impl fmt::Display for RestrictedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} from {}", self.port, self.protocol, self.source_scope)
    }
}

/// New-connection rate limit on the management port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimit {
    /// New connections allowed per window.
    pub burst: u8,
    pub window_secs: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            burst: 6,
            window_secs: 60,
        }
    }
}

/// Intrusion-prevention thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardPolicy {
    pub ban_seconds: u32,
    pub find_seconds: u32,
    pub max_retry: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            ban_seconds: 3600,
            find_seconds: 600,
            max_retry: 5,
        }
    }
}

fn default_admin_user() -> String {
    "ops".to_string()
}

// ── SecurityProfile ──────────────────────────────────────────────────────────

/// Resolved, immutable security profile. Default policy is always deny.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub name: String,
    #[serde(default)]
    pub management_port: Option<u16>,
    #[serde(default)]
    pub public_rules: Vec<PortSpec>,
    #[serde(default)]
    pub restricted_rules: Vec<RestrictedRule>,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub guard: GuardPolicy,
    /// The only user admitted over the management channel once migrated.
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
}

impl SecurityProfile {
    /// Check the fields the compiler does not care about but the host does.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.management_port == Some(0) {
            return Err(ProfileError::ZeroPort("management"));
        }
        if self.public_rules.iter().any(|r| r.port == 0) {
            return Err(ProfileError::ZeroPort("public"));
        }
        if self.restricted_rules.iter().any(|r| r.port == 0) {
            return Err(ProfileError::ZeroPort("restricted"));
        }
        if self.rate_limit.burst == 0 || self.rate_limit.burst > MAX_BURST {
            return Err(ProfileError::Burst(self.rate_limit.burst));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ProfileError::ZeroWindow);
        }
        if let Some(bad) = self
            .restricted_rules
            .iter()
            .find(|r| parse_cidr(&r.source_scope).is_none())
        {
            return Err(ProfileError::InvalidScope(bad.source_scope.clone()));
        }
        if !ADMIN_USER_RE.is_match(&self.admin_user) {
            return Err(ProfileError::InvalidAdminUser(self.admin_user.clone()));
        }
        Ok(())
    }

    /// Validation plus the conditions hardening needs to stay lockout-safe.
    ///
    /// # Errors
    ///
    /// Fails when the profile has no management port, is invalid, or admits a
    /// different user than the one the target credential logs in as.
    pub fn validate_for_pipeline(&self, target_user: &str) -> Result<u16, ProfileError> {
        let port = self
            .management_port
            .ok_or_else(|| ProfileError::MissingManagementPort(self.name.clone()))?;
        self.validate()?;
        if target_user != self.admin_user {
            return Err(ProfileError::CredentialMismatch {
                expected: self.admin_user.clone(),
                actual: target_user.to_string(),
            });
        }
        Ok(port)
    }

    /// Ports the intrusion guard watches: management plus every public port.
    #[must_use]
    pub fn guarded_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .management_port
            .into_iter()
            .chain(self.public_rules.iter().map(|r| r.port))
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}

/// Parse `addr/prefix`, rejecting prefixes longer than the address family.
#[must_use]
pub fn parse_cidr(s: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = s.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

// ── Profile variants ─────────────────────────────────────────────────────────

/// Fields shared by the built-in profile kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseProfile {
    #[serde(default)]
    pub name: Option<String>,
    pub management_port: u16,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub guard: GuardPolicy,
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
}

/// Overlay members expose service ports to the overlay network only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayProfile {
    #[serde(flatten)]
    pub base: BaseProfile,
    pub overlay_cidr: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

/// Profile as written in plan and profile files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileVariant {
    /// Management access only.
    Bastion(BaseProfile),
    /// Management plus HTTP and HTTPS.
    Web(BaseProfile),
    OverlayNode(OverlayProfile),
    Custom(SecurityProfile),
}

impl ProfileVariant {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bastion(_) => "bastion",
            Self::Web(_) => "web",
            Self::OverlayNode(_) => "overlay_node",
            Self::Custom(_) => "custom",
        }
    }

    /// Resolve to the concrete profile.
    #[must_use]
    pub fn resolve(&self) -> SecurityProfile {
        let from_base = |base: &BaseProfile, public_rules, restricted_rules| SecurityProfile {
            name: base.name.clone().unwrap_or_else(|| self.kind().to_string()),
            management_port: Some(base.management_port),
            public_rules,
            restricted_rules,
            rate_limit: base.rate_limit,
            guard: base.guard,
            admin_user: base.admin_user.clone(),
        };
        match self {
            Self::Bastion(base) => from_base(base, Vec::new(), Vec::new()),
            Self::Web(base) => from_base(base, vec![PortSpec::tcp(80), PortSpec::tcp(443)], Vec::new()),
            Self::OverlayNode(overlay) => {
                let restricted = overlay
                    .ports
                    .iter()
                    .map(|p| RestrictedRule {
                        port: p.port,
                        protocol: p.protocol,
                        source_scope: overlay.overlay_cidr.clone(),
                    })
                    .collect();
                from_base(&overlay.base, Vec::new(), restricted)
            }
            Self::Custom(profile) => profile.clone(),
        }
    }
}
