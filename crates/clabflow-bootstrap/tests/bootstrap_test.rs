//! Worker pool and state machine against scripted shells

use async_trait::async_trait;
use clabflow_bootstrap::{
    BootstrapError, BootstrapSettings, BootstrapState, Bootstrapper, CommandOutput,
    CredentialSource, Login, NodeCredential, NodeJob, RemoteShell, ShellSession, ShellTarget,
};
use clabflow_cloud::RetryPolicy;
use clabflow_core::{Topology, load_topology_str};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "clab-dc1";

#[derive(Debug, Clone)]
enum Behaviour {
    Accept,
    RejectAll,
    Unreachable,
    /// Times out this many times, then accepts
    Flaky(u32),
    /// Never answers
    Hang,
    /// Probe fails this many times, then passes
    SlowProbe(u32),
}

#[derive(Default)]
struct Recorded {
    connects: HashMap<String, u32>,
    logins: HashMap<String, Vec<String>>,
    writes: HashMap<String, Vec<(String, u32)>>,
    probes: HashMap<String, u32>,
}

#[derive(Clone, Default)]
struct ScriptedShell {
    behaviour: Arc<HashMap<String, Behaviour>>,
    recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedShell {
    fn new(script: &[(&str, Behaviour)]) -> Self {
        Self {
            behaviour: Arc::new(
                script
                    .iter()
                    .map(|(node, b)| (node.to_string(), b.clone()))
                    .collect(),
            ),
            recorded: Arc::default(),
        }
    }

    fn all(topology: &Topology, behaviour: Behaviour) -> Self {
        let script: Vec<(&str, Behaviour)> = topology
            .nodes
            .iter()
            .map(|n| (n.name.as_str(), behaviour.clone()))
            .collect();
        Self::new(&script)
    }

    fn behaviour(&self, node: &str) -> Behaviour {
        self.behaviour.get(node).cloned().unwrap_or(Behaviour::Accept)
    }

    fn connects(&self, node: &str) -> u32 {
        self.recorded.lock().unwrap().connects.get(node).copied().unwrap_or(0)
    }

    fn logins(&self, node: &str) -> Vec<String> {
        self.recorded.lock().unwrap().logins.get(node).cloned().unwrap_or_default()
    }

    fn writes(&self, node: &str) -> Vec<(String, u32)> {
        self.recorded.lock().unwrap().writes.get(node).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn connect(
        &self,
        target: &ShellTarget,
        login: &Login,
    ) -> clabflow_bootstrap::Result<Box<dyn ShellSession>> {
        let attempt = {
            let mut recorded = self.recorded.lock().unwrap();
            recorded
                .logins
                .entry(target.node.clone())
                .or_default()
                .push(login.username.clone());
            let count = recorded.connects.entry(target.node.clone()).or_default();
            *count += 1;
            *count
        };

        let timeout = || BootstrapError::Timeout {
            target: target.to_string(),
            reason: "Connection timed out".to_string(),
        };
        match self.behaviour(&target.node) {
            Behaviour::RejectAll => Err(BootstrapError::AuthFailure {
                target: target.to_string(),
                reason: "Permission denied".to_string(),
            }),
            Behaviour::Unreachable => Err(timeout()),
            Behaviour::Flaky(failures) if attempt <= failures => Err(timeout()),
            Behaviour::Hang => std::future::pending().await,
            _ => Ok(Box::new(ScriptedSession {
                node: target.node.clone(),
                shell: self.clone(),
            })),
        }
    }
}

struct ScriptedSession {
    node: String,
    shell: ScriptedShell,
}

#[async_trait]
impl ShellSession for ScriptedSession {
    async fn exec(&self, command: &str) -> clabflow_bootstrap::Result<CommandOutput> {
        if !command.starts_with("info from state") {
            return Ok(CommandOutput::default());
        }
        let probes = {
            let mut recorded = self.shell.recorded.lock().unwrap();
            let count = recorded.probes.entry(self.node.clone()).or_default();
            *count += 1;
            *count
        };
        let ready = match self.shell.behaviour(&self.node) {
            Behaviour::SlowProbe(failures) => probes > failures,
            _ => true,
        };
        Ok(CommandOutput {
            status: 0,
            stdout: if ready { "oper-state up" } else { "oper-state down" }.to_string(),
            stderr: String::new(),
        })
    }

    async fn write_file(&self, path: &str, _: &[u8], mode: u32) -> clabflow_bootstrap::Result<()> {
        self.shell
            .recorded
            .lock()
            .unwrap()
            .writes
            .entry(self.node.clone())
            .or_default()
            .push((path.to_string(), mode));
        Ok(())
    }
}

/// Issues revision "1" for every node resource
struct IssuedCredentials;

#[async_trait]
impl CredentialSource for IssuedCredentials {
    async fn issued_credential(
        &self,
        _namespace: &str,
        node_resource: &str,
    ) -> clabflow_bootstrap::Result<Option<NodeCredential>> {
        Ok(Some(NodeCredential {
            node: node_resource.to_string(),
            certificate: b"cert".to_vec(),
            private_key: b"key".to_vec(),
            revision: "1".to_string(),
        }))
    }
}

fn leaf_spine() -> Topology {
    let mut yaml = String::from("name: dc1\ntopology:\n  nodes:\n");
    for (i, name) in ["spine1", "spine2", "leaf1", "leaf2", "leaf3", "leaf4"]
        .iter()
        .enumerate()
    {
        yaml.push_str(&format!(
            "    {name}: {{kind: nokia_srlinux, mgmt-ipv4: 172.20.20.{}}}\n",
            i + 2
        ));
    }
    load_topology_str(&yaml).unwrap()
}

fn jobs(topology: &Topology) -> Vec<NodeJob> {
    topology
        .nodes
        .iter()
        .map(|node| NodeJob {
            node: node.clone(),
            resource: topology.node_resource_name(&node.name),
            resource_present: true,
            established_login: None,
            pushed_revision: None,
        })
        .collect()
}

fn bootstrapper(shell: &ScriptedShell, max_attempts: u32) -> Bootstrapper {
    let settings = BootstrapSettings {
        retry: RetryPolicy::immediate(max_attempts),
        ..Default::default()
    };
    Bootstrapper::new(Arc::new(shell.clone()), Arc::new(IssuedCredentials), settings, NAMESPACE)
}

#[tokio::test]
async fn test_all_nodes_complete() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[]);
    let report = bootstrapper(&shell, 3).run(jobs(&topology)).await;

    assert!(report.is_success());
    assert_eq!(report.nodes.len(), 6);
    let names: Vec<&str> = report.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["spine1", "spine2", "leaf1", "leaf2", "leaf3", "leaf4"]);

    let leaf1 = report.outcome("leaf1").unwrap();
    assert_eq!(
        leaf1.path(),
        vec![
            BootstrapState::Pending,
            BootstrapState::Connecting,
            BootstrapState::CredentialPush,
            BootstrapState::Verifying,
            BootstrapState::Complete,
        ]
    );
    assert_eq!(leaf1.login.as_deref(), Some("admin"));
    assert_eq!(leaf1.credential_revision.as_deref(), Some("1"));
    assert_eq!(
        shell.writes("leaf1"),
        vec![
            ("/etc/opt/srlinux/tls/edaboot.crt".to_string(), 0o644),
            ("/etc/opt/srlinux/tls/edaboot.key".to_string(), 0o600),
        ]
    );
}

#[tokio::test]
async fn test_auth_failure_retry_bound() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[("leaf1", Behaviour::RejectAll)]);
    let report = bootstrapper(&shell, 4).run(jobs(&topology)).await;

    let leaf1 = report.outcome("leaf1").unwrap();
    assert_eq!(leaf1.state, BootstrapState::Failed);
    assert_eq!(leaf1.attempts_for(BootstrapState::Connecting), 4);
    assert_eq!(leaf1.attempts_for(BootstrapState::CredentialPush), 0);
    // one login candidate per attempt
    assert_eq!(shell.connects("leaf1"), 4);
    assert!(leaf1.error.as_deref().unwrap().contains("rejected"));
}

#[tokio::test]
async fn test_failure_is_isolated() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[("leaf1", Behaviour::RejectAll)]);
    let report = bootstrapper(&shell, 2).run(jobs(&topology)).await;

    assert_eq!(report.count(BootstrapState::Failed), 1);
    assert_eq!(report.count(BootstrapState::Complete), 5);
    for node in report.nodes.iter().filter(|n| n.name != "leaf1") {
        assert_eq!(node.attempts_for(BootstrapState::Connecting), 1, "{}", node.name);
    }
}

#[tokio::test]
async fn test_all_nodes_unreachable() {
    let topology = leaf_spine();
    let shell = ScriptedShell::all(&topology, Behaviour::Unreachable);
    let report = bootstrapper(&shell, 3).run(jobs(&topology)).await;

    assert_eq!(report.count(BootstrapState::Failed), 6);
    for node in &report.nodes {
        assert_eq!(shell.connects(&node.name), 3);
        assert!(node.error.as_deref().unwrap().contains("timed out"));
    }
}

#[tokio::test]
async fn test_transient_connect_recovers() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[("spine2", Behaviour::Flaky(2))]);
    let report = bootstrapper(&shell, 3).run(jobs(&topology)).await;

    let spine2 = report.outcome("spine2").unwrap();
    assert!(spine2.is_complete());
    assert_eq!(spine2.attempts_for(BootstrapState::Connecting), 3);
}

#[tokio::test]
async fn test_probe_retried() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[("leaf2", Behaviour::SlowProbe(1)), ("leaf3", Behaviour::SlowProbe(5))]);
    let report = bootstrapper(&shell, 3).run(jobs(&topology)).await;

    let leaf2 = report.outcome("leaf2").unwrap();
    assert!(leaf2.is_complete());
    assert_eq!(leaf2.attempts_for(BootstrapState::Verifying), 2);

    let leaf3 = report.outcome("leaf3").unwrap();
    assert_eq!(leaf3.state, BootstrapState::Failed);
    assert_eq!(leaf3.attempts_for(BootstrapState::Verifying), 3);
    assert!(leaf3.error.as_deref().unwrap().contains("oper-state down"));
}

#[tokio::test]
async fn test_missing_resource_fails_without_connecting() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[]);
    let mut jobs = jobs(&topology);
    jobs[0].resource_present = false;

    let report = bootstrapper(&shell, 3).run(jobs).await;
    let spine1 = report.outcome("spine1").unwrap();
    assert_eq!(spine1.state, BootstrapState::Failed);
    assert_eq!(spine1.error.as_deref(), Some("control-plane resource missing"));
    assert_eq!(shell.connects("spine1"), 0);
    assert_eq!(report.count(BootstrapState::Complete), 5);
}

#[tokio::test]
async fn test_established_login_tried_first() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[]);
    let mut jobs = jobs(&topology);
    for job in &mut jobs {
        job.established_login = Some("admin".to_string());
    }
    let settings = BootstrapSettings {
        retry: RetryPolicy::immediate(1),
        logins: vec![Login::new("ops").with_password("ops")],
        ..Default::default()
    };
    let report = Bootstrapper::new(Arc::new(shell.clone()), Arc::new(IssuedCredentials), settings, NAMESPACE)
        .run(jobs)
        .await;

    assert!(report.is_success());
    assert_eq!(shell.logins("leaf4"), vec!["admin"]);
}

#[tokio::test]
async fn test_installed_revision_not_pushed_again() {
    let topology = leaf_spine();
    let shell = ScriptedShell::new(&[]);
    let mut jobs = jobs(&topology);
    for job in &mut jobs {
        job.pushed_revision = Some("1".to_string());
    }

    let report = bootstrapper(&shell, 1).run(jobs).await;
    assert!(report.is_success());
    assert!(shell.writes("leaf1").is_empty());
    assert_eq!(report.outcome("leaf1").unwrap().credential_revision.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_cancellation_marks_nodes_cancelled() {
    let topology = leaf_spine();
    let shell = ScriptedShell::all(&topology, Behaviour::Hang);
    let cancel = CancellationToken::new();
    let settings = BootstrapSettings {
        retry: RetryPolicy::immediate(3),
        workers: 2,
        ..Default::default()
    };
    let bootstrapper = Bootstrapper::new(Arc::new(shell.clone()), Arc::new(IssuedCredentials), settings, NAMESPACE)
        .with_cancel(cancel.clone());

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };
    let report = bootstrapper.run(jobs(&topology)).await;
    canceller.await.unwrap();

    assert_eq!(report.count(BootstrapState::Cancelled), 6);
    // two workers were in flight, the rest never got a permit
    let started = report
        .nodes
        .iter()
        .filter(|n| n.path().contains(&BootstrapState::Connecting))
        .count();
    assert_eq!(started, 2);
}
