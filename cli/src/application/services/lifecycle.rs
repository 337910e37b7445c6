//! Application service: instance lifecycle tracking.
//!
//! Wraps the cloud port with bounded retry, readiness polling and the
//! persistent-address binding table. The binding table is the only state
//! shared between concurrently hardened hosts; its lock is never held
//! across an `.await`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bulwark_common::{AddressMode, LifecycleState};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::application::ports::CloudCompute;
use crate::application::services::retry::{RetryPolicy, with_retry};
use crate::domain::instance::{Instance, InstanceSpec, PortRule};
use crate::domain::profile::Protocol;
use crate::domain::{CloudError, HardenError};

/// Default interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct InstanceLifecycleTracker<C> {
    cloud: C,
    retry: RetryPolicy,
    poll_interval: Duration,
    /// Persistent address name → instance it is bound to.
    bindings: Mutex<HashMap<String, String>>,
}

impl<C: CloudCompute> InstanceLifecycleTracker<C> {
    #[must_use]
    pub fn new(cloud: C, retry: RetryPolicy) -> Self {
        Self {
            cloud,
            retry,
            poll_interval: DEFAULT_POLL_INTERVAL,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Request a new instance. Throttling is retried; rejection is not.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if the provider refuses the request.
    #[instrument(skip(self, spec), fields(instance = %spec.name))]
    pub async fn provision(&self, spec: &InstanceSpec) -> Result<Instance, HardenError> {
        with_retry(self.retry, "create instance", CloudError::is_transient, move || {
            self.cloud.create_instance(spec)
        })
        .await?;
        info!("instance requested");
        Ok(Instance {
            id: spec.name.clone(),
            public_address: None,
            lifecycle_state: LifecycleState::Provisioning,
            address_mode: AddressMode::Ephemeral,
        })
    }

    /// Poll until the instance runs and has a public address.
    ///
    /// The provider may not know an instance right after it was requested;
    /// `NotFound` counts as still provisioning.
    ///
    /// # Errors
    ///
    /// `Timeout` past `timeout`, `TerminalState` if the instance stops or
    /// terminates, `Provider` for non-transient API failures.
    #[instrument(skip(self, instance), fields(instance = %instance.id))]
    pub async fn wait_until_running(
        &self,
        instance: &Instance,
        timeout: Duration,
    ) -> Result<Instance, HardenError> {
        let deadline = Instant::now() + timeout;
        loop {
            let described = with_retry(self.retry, "describe instance", CloudError::is_transient, move || {
                self.cloud.describe_instance(&instance.id)
            })
            .await;
            match described {
                Ok(desc) => match desc.state {
                    LifecycleState::Running if desc.public_address.is_some() => {
                        info!(address = ?desc.public_address, "instance running");
                        return Ok(Instance {
                            public_address: desc.public_address,
                            lifecycle_state: LifecycleState::Running,
                            ..instance.clone()
                        });
                    }
                    LifecycleState::Provisioning | LifecycleState::Running => {
                        debug!(state = %desc.state, "instance not ready yet");
                    }
                    state @ (LifecycleState::Stopping
                    | LifecycleState::Stopped
                    | LifecycleState::Terminated) => {
                        return Err(HardenError::TerminalState {
                            instance: instance.id.clone(),
                            state: state.to_string(),
                        });
                    }
                },
                Err(CloudError::NotFound(_)) => debug!("instance not visible yet"),
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HardenError::Timeout {
                    what: format!("instance {} to reach running", instance.id),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Allocate a persistent address; an existing allocation is reused.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if allocation fails.
    #[instrument(skip(self))]
    pub async fn allocate_persistent_address(&self, name: &str) -> Result<(), HardenError> {
        match self.cloud.describe_address(name).await {
            Ok(_) => {
                debug!("address already allocated");
                return Ok(());
            }
            Err(CloudError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        with_retry(self.retry, "allocate address", CloudError::is_transient, move || {
            self.cloud.allocate_address(name)
        })
        .await?;
        info!("address allocated");
        Ok(())
    }

    /// Bind `name` to `instance`. Rebinding to the same instance is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if attaching or describing fails.
    #[instrument(skip(self, instance), fields(instance = %instance.id))]
    pub async fn bind_address(&self, name: &str, instance: &Instance) -> Result<Instance, HardenError> {
        let current = with_retry(self.retry, "describe address", CloudError::is_transient, move || {
            self.cloud.describe_address(name)
        })
        .await?;

        if current.attached_to.as_deref() == Some(instance.id.as_str()) {
            debug!("address already bound to this instance");
        } else {
            with_retry(self.retry, "attach address", CloudError::is_transient, move || {
                self.cloud.attach_address(name, &instance.id)
            })
            .await?;
            info!("address attached");
        }
        self.lock_bindings()
            .insert(name.to_string(), instance.id.clone());

        let ip = match current.ip_address {
            Some(ip) => Some(ip),
            None => self.cloud.describe_address(name).await?.ip_address,
        };
        Ok(Instance {
            public_address: ip.or_else(|| instance.public_address.clone()),
            address_mode: AddressMode::Static,
            ..instance.clone()
        })
    }

    /// Detach and release `name`. Missing addresses count as released.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if the provider refuses.
    #[instrument(skip(self))]
    pub async fn release_address(&self, name: &str) -> Result<(), HardenError> {
        match self.cloud.detach_address(name).await {
            Ok(()) | Err(CloudError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.lock_bindings().remove(name);
        match self.cloud.release_address(name).await {
            Ok(()) | Err(CloudError::NotFound(_)) => {
                info!("address released");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Terminate an instance and release any address still bound to it.
    ///
    /// Address release is best-effort: failures are logged, never returned.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if termination itself fails.
    #[instrument(skip(self))]
    pub async fn terminate(&self, instance_id: &str) -> Result<(), HardenError> {
        let bound: Vec<String> = self
            .lock_bindings()
            .iter()
            .filter(|(_, owner)| owner.as_str() == instance_id)
            .map(|(name, _)| name.clone())
            .collect();

        for name in bound {
            if let Err(e) = self.release_address(&name).await {
                warn!(address = %name, error = %e, "could not release address during teardown");
            }
        }

        match self.cloud.terminate_instance(instance_id).await {
            Ok(()) | Err(CloudError::NotFound(_)) => {
                info!("instance terminated");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open `rule` in the instance's network ACL.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if the provider refuses.
    #[instrument(skip(self, rule), fields(rule = %rule))]
    pub async fn open_port(&self, instance_id: &str, rule: &PortRule) -> Result<(), HardenError> {
        with_retry(self.retry, "open port", CloudError::is_transient, move || {
            self.cloud.open_port(instance_id, rule)
        })
        .await?;
        Ok(())
    }

    /// Close `rule`; already-closed rules and missing instances are fine.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if the provider refuses.
    #[instrument(skip(self, rule), fields(rule = %rule))]
    pub async fn close_port(&self, instance_id: &str, rule: &PortRule) -> Result<(), HardenError> {
        match with_retry(self.retry, "close port", CloudError::is_transient, move || {
            self.cloud.close_port(instance_id, rule)
        })
        .await
        {
            Ok(()) | Err(CloudError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the ACL currently lets `port`/`protocol` in from anywhere.
    /// Read-only.
    ///
    /// # Errors
    ///
    /// Returns `HardenError::Provider` if the ACL cannot be read.
    pub async fn exposes_port(
        &self,
        instance_id: &str,
        port: u16,
        protocol: Protocol,
    ) -> Result<bool, HardenError> {
        let rules = with_retry(self.retry, "list ports", CloudError::is_transient, move || {
            self.cloud.list_ports(instance_id)
        })
        .await?;
        Ok(rules.iter().any(|r| r.exposes(port, protocol)))
    }

    fn lock_bindings(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned table is still consistent: every write is a single insert or remove.
        self.bindings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
