//! Shared fakes for service tests.
//!
//! `FakeCloud` models a provider with an ACL and persistent addresses;
//! `FakeHosts` models hosts that understand the commands the pipeline
//! sends: sysctl, file writes, the ssh daemon drop-in and fail2ban.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use bulwark_common::{LifecycleState, PipelineStatus};

use crate::application::ports::{
    CloudCompute, PipelineRunStore, ProbeResult, ProgressReporter, ReachabilityProbe,
    RemoteExecutor,
};
use crate::domain::baseline::BASELINE;
use crate::domain::connection::CredentialRef;
use crate::domain::instance::{AddressDescription, InstanceDescription, InstanceSpec, PortRule};
use crate::domain::{guard, sshd};
use crate::domain::{BatchOutcome, CloudError, CommandBatch, ConnectionContext, ExecError, PipelineRun};

pub const BOOTSTRAP_USER: &str = "ubuntu";
pub const ADMIN_USER: &str = "ops";

pub fn bootstrap_credential() -> CredentialRef {
    CredentialRef {
        user: BOOTSTRAP_USER.into(),
        identity_file: "/keys/bootstrap.pem".into(),
    }
}

pub fn admin_credential() -> CredentialRef {
    CredentialRef {
        user: ADMIN_USER.into(),
        identity_file: "/keys/ops".into(),
    }
}

// ── Cloud ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CloudState {
    pub instances: HashMap<String, (LifecycleState, String, u32)>,
    pub ports: HashMap<String, Vec<PortRule>>,
    pub addresses: HashMap<String, Option<String>>,
    pub calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeCloud {
    pub state: Mutex<CloudState>,
    /// Throttle this many create calls before accepting.
    pub throttle_creates: Mutex<u32>,
    pub reject_create: bool,
    /// Describe calls before a new instance reports `running`.
    pub ready_after: u32,
    /// State a new instance falls into instead of `running`.
    pub fail_state: Option<LifecycleState>,
    /// Accept `open_port` without it ever taking effect.
    pub acl_ignores_writes: bool,
    pub fail_release: bool,
    pub fail_terminate: bool,
}

impl FakeCloud {
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn log(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    /// Register an already-running instance.
    pub fn with_running(self, name: &str, address: &str) -> Self {
        self.state.lock().unwrap().instances.insert(
            name.to_string(),
            (LifecycleState::Running, address.to_string(), 0),
        );
        self
    }

    pub fn expose(&self, instance: &str, rule: PortRule) {
        self.state
            .lock()
            .unwrap()
            .ports
            .entry(instance.to_string())
            .or_default()
            .push(rule);
    }
}

impl CloudCompute for FakeCloud {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), CloudError> {
        self.log(format!("create {}", spec.name));
        {
            let mut throttles = self.throttle_creates.lock().unwrap();
            if *throttles > 0 {
                *throttles -= 1;
                return Err(CloudError::Throttled("Rate exceeded".into()));
            }
        }
        if self.reject_create {
            return Err(CloudError::Rejected("instance quota exceeded".into()));
        }
        let mut state = self.state.lock().unwrap();
        let n = state.instances.len() + 10;
        state.instances.insert(
            spec.name.clone(),
            (LifecycleState::Provisioning, format!("203.0.113.{n}"), 0),
        );
        Ok(())
    }

    async fn describe_instance(&self, name: &str) -> Result<InstanceDescription, CloudError> {
        let mut state = self.state.lock().unwrap();
        let (lifecycle, address, polls) = state
            .instances
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(name.to_string()))?;
        *polls += 1;
        if *lifecycle == LifecycleState::Provisioning && *polls > self.ready_after {
            *lifecycle = self.fail_state.unwrap_or(LifecycleState::Running);
        }
        let public_address =
            (*lifecycle == LifecycleState::Running).then(|| address.clone());
        Ok(InstanceDescription {
            name: name.to_string(),
            state: *lifecycle,
            public_address,
        })
    }

    async fn terminate_instance(&self, name: &str) -> Result<(), CloudError> {
        self.log(format!("terminate {name}"));
        if self.fail_terminate {
            return Err(CloudError::Transport("connection reset".into()));
        }
        let mut state = self.state.lock().unwrap();
        state
            .instances
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(name.to_string()))
    }

    async fn open_port(&self, instance: &str, rule: &PortRule) -> Result<(), CloudError> {
        self.log(format!("open {instance} {rule}"));
        if !self.acl_ignores_writes {
            self.expose(instance, rule.clone());
        }
        Ok(())
    }

    async fn close_port(&self, instance: &str, rule: &PortRule) -> Result<(), CloudError> {
        self.log(format!("close {instance} {rule}"));
        let mut state = self.state.lock().unwrap();
        if let Some(rules) = state.ports.get_mut(instance) {
            rules.retain(|r| r != rule);
        }
        Ok(())
    }

    async fn list_ports(&self, instance: &str) -> Result<Vec<PortRule>, CloudError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ports
            .get(instance)
            .cloned()
            .unwrap_or_default())
    }

    async fn allocate_address(&self, name: &str) -> Result<(), CloudError> {
        self.log(format!("allocate {name}"));
        self.state
            .lock()
            .unwrap()
            .addresses
            .insert(name.to_string(), None);
        Ok(())
    }

    async fn attach_address(&self, name: &str, instance: &str) -> Result<(), CloudError> {
        self.log(format!("attach {name} {instance}"));
        let mut state = self.state.lock().unwrap();
        let slot = state
            .addresses
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(name.to_string()))?;
        *slot = Some(instance.to_string());
        Ok(())
    }

    async fn detach_address(&self, name: &str) -> Result<(), CloudError> {
        self.log(format!("detach {name}"));
        let mut state = self.state.lock().unwrap();
        let slot = state
            .addresses
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(name.to_string()))?;
        *slot = None;
        Ok(())
    }

    async fn release_address(&self, name: &str) -> Result<(), CloudError> {
        self.log(format!("release {name}"));
        if self.fail_release {
            return Err(CloudError::Rejected("address is locked".into()));
        }
        self.state
            .lock()
            .unwrap()
            .addresses
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(name.to_string()))
    }

    async fn describe_address(&self, name: &str) -> Result<AddressDescription, CloudError> {
        let state = self.state.lock().unwrap();
        let attached_to = state
            .addresses
            .get(name)
            .ok_or_else(|| CloudError::NotFound(name.to_string()))?
            .clone();
        Ok(AddressDescription {
            name: name.to_string(),
            ip_address: Some("198.51.100.7".to_string()),
            attached_to,
        })
    }
}

// ── Hosts ────────────────────────────────────────────────────────────────────

pub struct HostState {
    pub sysctl: BTreeMap<String, String>,
    pub files: HashMap<String, String>,
    pub listening: Vec<u16>,
    /// `None` admits everyone, as a stock image does.
    pub allowed_users: Option<Vec<String>>,
    pub fail2ban_active: bool,
    pub commands: Vec<String>,
}

impl HostState {
    fn fresh() -> Self {
        let mut sysctl: BTreeMap<String, String> = BASELINE
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        sysctl.insert("kernel.kptr_restrict".into(), "1".into());
        sysctl.insert("net.ipv4.conf.all.accept_redirects".into(), "1".into());
        Self {
            sysctl,
            files: HashMap::new(),
            listening: vec![22],
            allowed_users: None,
            fail2ban_active: false,
            commands: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct FakeHosts {
    pub hosts: Mutex<HashMap<String, HostState>>,
    /// Commands containing any of these substrings exit 1.
    pub fail_on: Mutex<Vec<String>>,
    /// Ports that never become reachable even when the daemon listens.
    pub blocked_ports: HashSet<u16>,
    /// Fail this many batches with a dropped connection.
    pub flaky: Mutex<u32>,
}

impl FakeHosts {
    pub fn failing_on(self, pattern: &str) -> Self {
        self.fail_on.lock().unwrap().push(pattern.to_string());
        self
    }

    pub fn with<T>(&self, address: &str, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut hosts = self.hosts.lock().unwrap();
        f(hosts.entry(address.to_string()).or_insert_with(HostState::fresh))
    }

    pub fn commands(&self, address: &str) -> Vec<String> {
        self.with(address, |h| h.commands.clone())
    }

    pub fn count(&self, address: &str, prefix: &str) -> usize {
        self.commands(address)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn emulate(host: &mut HostState, cmd: &str) -> (i32, String) {
        if let Some(keys) = cmd.strip_prefix("sysctl -e ") {
            let out = keys
                .split_whitespace()
                .filter_map(|k| host.sysctl.get(k).map(|v| format!("{k} = {v}\n")))
                .collect();
            return (0, out);
        }
        if let Some(assign) = cmd.strip_prefix("sysctl -w ") {
            if let Some((k, v)) = assign.split_once('=') {
                host.sysctl.insert(k.to_string(), v.to_string());
            }
            return (0, String::new());
        }
        if let Some(rest) = cmd.strip_prefix("printf '%s' ") {
            if let Some((quoted, path)) = rest.rsplit_once(" > ") {
                host.files.insert(path.to_string(), unquote(quoted));
            }
            return (0, String::new());
        }
        if let Some(rest) = cmd.strip_prefix("cat ") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            return (0, host.files.get(path).cloned().unwrap_or_default());
        }
        if let Some(paths) = cmd.strip_prefix("rm -f ") {
            for path in paths.split_whitespace() {
                host.files.remove(path);
            }
            return (0, String::new());
        }
        match cmd {
            sshd::RESTART_COMMAND => {
                let conf = host.files.get(sshd::DROP_IN_PATH).cloned().unwrap_or_default();
                let ports: Vec<u16> = conf
                    .lines()
                    .filter_map(|l| l.strip_prefix("Port "))
                    .filter_map(|p| p.parse().ok())
                    .collect();
                if !ports.is_empty() {
                    host.listening = ports;
                }
                host.allowed_users = conf
                    .lines()
                    .find_map(|l| l.strip_prefix("AllowUsers "))
                    .map(|u| u.split_whitespace().map(str::to_string).collect());
                (0, String::new())
            }
            sshd::QUERY_COMMAND => (
                0,
                host.listening.iter().map(|p| format!("port {p}\n")).collect(),
            ),
            guard::ACTIVE_COMMAND => {
                if host.fail2ban_active {
                    (0, "active\n".to_string())
                } else {
                    (3, "inactive\n".to_string())
                }
            }
            "systemctl restart fail2ban" => {
                host.fail2ban_active = true;
                (0, String::new())
            }
            "systemctl disable --now fail2ban" => {
                host.fail2ban_active = false;
                (0, String::new())
            }
            _ => (0, String::new()),
        }
    }
}

/// Inverse of `shell_quote`.
pub fn unquote(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(quoted);
    inner.replace("'\\''", "'")
}

impl RemoteExecutor for FakeHosts {
    async fn run(
        &self,
        context: &ConnectionContext,
        batch: &CommandBatch,
    ) -> Result<BatchOutcome, ExecError> {
        let unreachable = |reason: &str| ExecError::Unreachable {
            address: context.address.clone(),
            port: context.port,
            reason: reason.to_string(),
        };
        {
            let mut flaky = self.flaky.lock().unwrap();
            if *flaky > 0 {
                *flaky -= 1;
                return Err(unreachable("connection reset by peer"));
            }
        }
        let fail_on = self.fail_on.lock().unwrap().clone();
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts
            .entry(context.address.clone())
            .or_insert_with(HostState::fresh);
        if !host.listening.contains(&context.port) || self.blocked_ports.contains(&context.port) {
            return Err(unreachable("connection timed out"));
        }
        if let Some(users) = &host.allowed_users {
            if !users.contains(&context.credential.user) {
                return Err(unreachable("Permission denied (publickey)"));
            }
        }

        let mut outcome = BatchOutcome::default();
        for (i, cmd) in batch.commands.iter().enumerate() {
            host.commands.push(cmd.clone());
            if fail_on.iter().any(|p| cmd.contains(p.as_str())) {
                outcome.exit_code = 1;
                outcome.failed_at = Some(i);
                outcome.stderr = format!("E: simulated failure of '{cmd}'");
                return Ok(outcome);
            }
            let (code, stdout) = Self::emulate(host, cmd);
            outcome.stdout.push_str(&stdout);
            if code != 0 {
                outcome.exit_code = code;
                outcome.failed_at = Some(i);
                return Ok(outcome);
            }
        }
        Ok(outcome)
    }
}

// ── Probe, store, reporter ───────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeProbe {
    pub results: Mutex<HashMap<u16, ProbeResult>>,
}

impl FakeProbe {
    pub fn with(port: u16, result: ProbeResult) -> Self {
        let probe = Self::default();
        probe.results.lock().unwrap().insert(port, result);
        probe
    }
}

impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, _address: &str, port: u16, _timeout: Duration) -> ProbeResult {
        self.results
            .lock()
            .unwrap()
            .get(&port)
            .copied()
            .unwrap_or(ProbeResult::Open)
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    pub runs: Mutex<HashMap<String, PipelineRun>>,
    /// Every save, as (instance, stage, status).
    pub history: Mutex<Vec<(String, bulwark_common::HardeningStage, PipelineStatus)>>,
}

impl PipelineRunStore for MemoryRunStore {
    async fn load_async(&self, instance: &str) -> anyhow::Result<Option<PipelineRun>> {
        Ok(self.runs.lock().unwrap().get(instance).cloned())
    }

    async fn save_async(&self, run: &PipelineRun) -> anyhow::Result<()> {
        self.history
            .lock()
            .unwrap()
            .push((run.instance.clone(), run.stage, run.status));
        self.runs
            .lock()
            .unwrap()
            .insert(run.instance.clone(), run.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("step: {message}"));
    }

    fn success(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("ok: {message}"));
    }

    fn warn(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("warn: {message}"));
    }
}
