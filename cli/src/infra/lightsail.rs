//! Infrastructure implementation of the `CloudCompute` port over the
//! `aws lightsail` CLI.
//!
//! Every call is one `aws` invocation with `--output json`; responses are
//! parsed with serde. Provider error codes in stderr decide whether a
//! failure is retried by the caller.

use std::process::Output;

use bulwark_common::LifecycleState;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::application::ports::{CloudCompute, CommandRunner};
use crate::domain::config::CloudConfig;
use crate::domain::instance::{AddressDescription, InstanceDescription, InstanceSpec, PortRule};
use crate::domain::profile::Protocol;
use crate::domain::CloudError;

pub struct LightsailCloud<R> {
    runner: R,
    region: String,
    profile: Option<String>,
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GetInstanceResponse {
    instance: WireInstance,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstance {
    name: String,
    state: WireState,
    public_ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortStatesResponse {
    port_states: Vec<WirePortState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePortState {
    from_port: u16,
    to_port: u16,
    protocol: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    cidrs: Vec<String>,
    #[serde(default)]
    ipv6_cidrs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePortInfo<'a> {
    from_port: u16,
    to_port: u16,
    protocol: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cidrs: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ipv6_cidrs: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetStaticIpResponse {
    static_ip: WireStaticIp,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStaticIp {
    name: String,
    ip_address: Option<String>,
    attached_to: Option<String>,
    #[serde(default)]
    is_attached: bool,
}

// ── Mapping ──────────────────────────────────────────────────────────────────

fn lifecycle_state(name: &str) -> LifecycleState {
    match name {
        "running" => LifecycleState::Running,
        "stopping" | "shutting-down" => LifecycleState::Stopping,
        "stopped" => LifecycleState::Stopped,
        "terminated" => LifecycleState::Terminated,
        _ => LifecycleState::Provisioning,
    }
}

/// Classify a failed call from the provider's error code in stderr.
fn classify(stderr: &str) -> CloudError {
    let message = stderr.trim().to_string();
    if ["ThrottlingException", "TooManyRequests", "Rate exceeded"]
        .iter()
        .any(|code| stderr.contains(code))
    {
        CloudError::Throttled(message)
    } else if ["NotFoundException", "DoesNotExist"]
        .iter()
        .any(|code| stderr.contains(code))
    {
        CloudError::NotFound(message)
    } else {
        CloudError::Rejected(message)
    }
}

fn port_info(rule: &PortRule) -> Result<String, CloudError> {
    let (v6, v4): (Vec<&str>, Vec<&str>) = rule
        .cidrs
        .iter()
        .map(String::as_str)
        .partition(|c| c.contains(':'));
    serde_json::to_string(&WirePortInfo {
        from_port: rule.from_port,
        to_port: rule.to_port,
        protocol: rule.protocol.as_str(),
        cidrs: v4,
        ipv6_cidrs: v6,
    })
    .map_err(|e| CloudError::Transport(format!("cannot encode port info: {e}")))
}

fn port_rule(state: WirePortState) -> Option<PortRule> {
    if state.state.as_deref().is_some_and(|s| s != "open") {
        return None;
    }
    let protocol = match state.protocol.as_str() {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        _ => return None,
    };
    let mut cidrs = state.cidrs;
    cidrs.extend(state.ipv6_cidrs);
    Some(PortRule {
        from_port: state.from_port,
        to_port: state.to_port,
        protocol,
        cidrs,
    })
}

fn parse<T: for<'de> Deserialize<'de>>(output: &Output) -> Result<T, CloudError> {
    serde_json::from_slice(&output.stdout)
        .map_err(|e| CloudError::Transport(format!("unexpected provider response: {e}")))
}

// ── Adapter ──────────────────────────────────────────────────────────────────

impl<R: CommandRunner> LightsailCloud<R> {
    #[must_use]
    pub fn new(runner: R, config: &CloudConfig) -> Self {
        Self {
            runner,
            region: config.region.clone(),
            profile: config.profile.clone(),
        }
    }

    /// Run `aws lightsail <operation> <args>` and return its output on success.
    async fn call(&self, operation: &str, args: &[&str]) -> Result<Output, CloudError> {
        let mut full = vec!["lightsail", operation];
        full.extend_from_slice(args);
        full.extend_from_slice(&["--region", &self.region, "--output", "json"]);
        if let Some(profile) = &self.profile {
            full.extend_from_slice(&["--profile", profile]);
        }
        debug!(operation, "calling provider");
        let output = self
            .runner
            .run("aws", &full)
            .await
            .map_err(|e| CloudError::Transport(format!("{e:#}")))?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

impl<R: CommandRunner> CloudCompute for LightsailCloud<R> {
    #[instrument(skip(self, spec), fields(instance = %spec.name))]
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), CloudError> {
        let tags: Vec<String> = spec
            .tags
            .iter()
            .map(|(k, v)| format!("key={k},value={v}"))
            .collect();
        let mut args = vec![
            "--instance-names",
            spec.name.as_str(),
            "--availability-zone",
            spec.availability_zone.as_str(),
            "--blueprint-id",
            spec.blueprint.as_str(),
            "--bundle-id",
            spec.bundle.as_str(),
        ];
        if let Some(key_pair) = &spec.key_pair {
            args.extend_from_slice(&["--key-pair-name", key_pair]);
        }
        if let Some(user_data) = &spec.user_data {
            args.extend_from_slice(&["--user-data", user_data]);
        }
        if !tags.is_empty() {
            args.push("--tags");
            args.extend(tags.iter().map(String::as_str));
        }
        self.call("create-instances", &args).await.map(|_| ())
    }

    async fn describe_instance(&self, name: &str) -> Result<InstanceDescription, CloudError> {
        let output = self.call("get-instance", &["--instance-name", name]).await?;
        let response: GetInstanceResponse = parse(&output)?;
        Ok(InstanceDescription {
            name: response.instance.name,
            state: lifecycle_state(&response.instance.state.name),
            public_address: response.instance.public_ip_address,
        })
    }

    #[instrument(skip(self))]
    async fn terminate_instance(&self, name: &str) -> Result<(), CloudError> {
        self.call("delete-instance", &["--instance-name", name])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, rule), fields(rule = %rule))]
    async fn open_port(&self, instance: &str, rule: &PortRule) -> Result<(), CloudError> {
        let info = port_info(rule)?;
        self.call(
            "open-instance-public-ports",
            &["--instance-name", instance, "--port-info", &info],
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self, rule), fields(rule = %rule))]
    async fn close_port(&self, instance: &str, rule: &PortRule) -> Result<(), CloudError> {
        let info = port_info(rule)?;
        self.call(
            "close-instance-public-ports",
            &["--instance-name", instance, "--port-info", &info],
        )
        .await
        .map(|_| ())
    }

    async fn list_ports(&self, instance: &str) -> Result<Vec<PortRule>, CloudError> {
        let output = self
            .call("get-instance-port-states", &["--instance-name", instance])
            .await?;
        let response: PortStatesResponse = parse(&output)?;
        Ok(response.port_states.into_iter().filter_map(port_rule).collect())
    }

    #[instrument(skip(self))]
    async fn allocate_address(&self, name: &str) -> Result<(), CloudError> {
        self.call("allocate-static-ip", &["--static-ip-name", name])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn attach_address(&self, name: &str, instance: &str) -> Result<(), CloudError> {
        self.call(
            "attach-static-ip",
            &["--static-ip-name", name, "--instance-name", instance],
        )
        .await
        .map(|_| ())
    }

    async fn detach_address(&self, name: &str) -> Result<(), CloudError> {
        self.call("detach-static-ip", &["--static-ip-name", name])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    async fn release_address(&self, name: &str) -> Result<(), CloudError> {
        self.call("release-static-ip", &["--static-ip-name", name])
            .await
            .map(|_| ())
    }

    async fn describe_address(&self, name: &str) -> Result<AddressDescription, CloudError> {
        let output = self.call("get-static-ip", &["--static-ip-name", name]).await?;
        let response: GetStaticIpResponse = parse(&output)?;
        let ip = response.static_ip;
        Ok(AddressDescription {
            name: ip.name,
            ip_address: ip.ip_address,
            attached_to: if ip.is_attached { ip.attached_to } else { None },
        })
    }
}
