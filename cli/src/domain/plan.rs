//! Deployment plan: what to provision, how to harden it and what to install.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::connection::CredentialRef;
use crate::domain::error::PlanError;
use crate::domain::instance::{InstanceSpec, validate_instance_name};
use crate::domain::profile::{ProfileVariant, SecurityProfile};

fn default_bootstrap_port() -> u16 {
    22
}

/// The provider's default management channel on a fresh instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConnection {
    pub user: String,
    #[serde(default = "default_bootstrap_port")]
    pub port: u16,
    pub identity_file: String,
}

impl BootstrapConnection {
    #[must_use]
    pub fn credential(&self) -> CredentialRef {
        CredentialRef {
            user: self.user.clone(),
            identity_file: self.identity_file.clone(),
        }
    }
}

/// A service installed after hardening; both batches must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub install: Vec<String>,
    #[serde(default)]
    pub uninstall: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePlan {
    pub spec: InstanceSpec,
    pub profile: ProfileVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_address: Option<String>,
    pub bootstrap: BootstrapConnection,
    /// Credential for the migrated management channel.
    pub credential: CredentialRef,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl InstancePlan {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub name: String,
    /// Overrides the configured worker-pool size for this plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    pub instances: Vec<InstancePlan>,
}

impl DeploymentPlan {
    /// Validate the plan and resolve every profile, in plan order.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; nothing has been contacted yet.
    pub fn resolve(&self) -> Result<Vec<SecurityProfile>, PlanError> {
        if self.instances.is_empty() {
            return Err(PlanError::Empty(self.name.clone()));
        }
        if self.concurrency == Some(0) {
            return Err(PlanError::ZeroConcurrency);
        }
        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        let mut profiles = Vec::with_capacity(self.instances.len());
        for inst in &self.instances {
            validate_instance_name(inst.name())?;
            if !names.insert(inst.name()) {
                return Err(PlanError::DuplicateInstance(inst.name().to_string()));
            }
            if let Some(addr) = &inst.static_address {
                validate_instance_name(addr)?;
                if !addresses.insert(addr.as_str()) {
                    return Err(PlanError::DuplicateAddress(addr.clone()));
                }
            }
            let profile = inst.profile.resolve();
            profile
                .validate_for_pipeline(&inst.credential.user)
                .map_err(|source| PlanError::Profile {
                    instance: inst.name().to_string(),
                    source,
                })?;
            profiles.push(profile);
        }
        Ok(profiles)
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&InstancePlan> {
        self.instances.iter().find(|i| i.name() == name)
    }
}
