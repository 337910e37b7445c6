//! Cloud instance domain types and pure validation functions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use bulwark_common::{AddressMode, LifecycleState};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::PlanError;
use crate::domain::profile::Protocol;

/// CIDR that makes an ACL rule reachable from the whole IPv4 internet.
pub const ANYWHERE_V4: &str = "0.0.0.0/0";

pub static INSTANCE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex")
});

/// Validates an instance name before it reaches the provider or a file path.
///
/// # Errors
///
/// Returns [`PlanError::InvalidInstanceName`] if the name doesn't match.
pub fn validate_instance_name(name: &str) -> Result<(), PlanError> {
    if INSTANCE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(PlanError::InvalidInstanceName(name.to_string()))
    }
}

/// Launch parameters for a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    /// Provider image, e.g. `ubuntu_24_04`.
    pub blueprint: String,
    /// Provider size, e.g. `small_3_0`.
    pub bundle: String,
    pub availability_zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// A tracked cloud instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-unique instance name.
    pub id: String,
    pub public_address: Option<String>,
    pub lifecycle_state: LifecycleState,
    pub address_mode: AddressMode,
}

/// What the provider reports about an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub name: String,
    pub state: LifecycleState,
    pub public_address: Option<String>,
}

/// What the provider reports about a persistent address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDescription {
    pub name: String,
    pub ip_address: Option<String>,
    pub attached_to: Option<String>,
}

// ── Network ACL rules ────────────────────────────────────────────────────────

/// An instance-level network ACL entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRule {
    pub from_port: u16,
    pub to_port: u16,
    pub protocol: Protocol,
    pub cidrs: Vec<String>,
}

impl PortRule {
    #[must_use]
    pub fn single(port: u16, protocol: Protocol, cidrs: Vec<String>) -> Self {
        Self {
            from_port: port,
            to_port: port,
            protocol,
            cidrs,
        }
    }

    /// A single port open to the whole internet.
    #[must_use]
    pub fn public(port: u16, protocol: Protocol) -> Self {
        Self::single(port, protocol, vec![ANYWHERE_V4.to_string()])
    }

    /// Whether this entry lets `port`/`protocol` in from anywhere.
    #[must_use]
    pub fn exposes(&self, port: u16, protocol: Protocol) -> bool {
        self.protocol == protocol
            && (self.from_port..=self.to_port).contains(&port)
            && self.cidrs.iter().any(|c| c == ANYWHERE_V4)
    }

    /// Stable identifier used in the resource ledger, e.g. `6677/tcp@0.0.0.0/0`.
    #[must_use]
    pub fn resource_id(&self) -> String {
        self.to_string()
    }

    /// Inverse of [`PortRule::resource_id`].
    #[must_use]
    pub fn from_resource_id(id: &str) -> Option<Self> {
        let (ports, rest) = id.split_once('/')?;
        let (protocol, cidrs) = rest.split_once('@')?;
        let (from_port, to_port) = match ports.split_once('-') {
            Some((from, to)) => (from.parse().ok()?, to.parse().ok()?),
            None => {
                let port = ports.parse().ok()?;
                (port, port)
            }
        };
        let protocol = match protocol {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => return None,
        };
        Some(Self {
            from_port,
            to_port,
            protocol,
            cidrs: cidrs.split(',').map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for PortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_port == self.to_port {
            write!(f, "{}", self.from_port)?;
        } else {
            write!(f, "{}-{}", self.from_port, self.to_port)?;
        }
        write!(f, "/{}@{}", self.protocol, self.cidrs.join(","))
    }
}
