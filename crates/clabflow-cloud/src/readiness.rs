//! ノード同期状態
//!
//! Whether the control plane has taken over each node, read from the
//! `status` it reports on node resources (`node-state`, `npp-state`).

use crate::client::ClusterClient;
use crate::context::SyncContext;
use crate::error::ApplyError;
use crate::retry::RetryError;
use clabflow_core::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Coarse synchronisation state of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSync {
    /// No status reported (yet), or the node resource is missing
    Unknown,
    Pending,
    Syncing,
    Ready,
    Error,
}

impl std::fmt::Display for NodeSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeSync::Unknown => write!(f, "unknown"),
            NodeSync::Pending => write!(f, "pending"),
            NodeSync::Syncing => write!(f, "syncing"),
            NodeSync::Ready => write!(f, "ready"),
            NodeSync::Error => write!(f, "error"),
        }
    }
}

/// Readiness of one node resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReadiness {
    /// Node resource name
    pub name: String,
    pub sync: NodeSync,
    pub node_state: Option<String>,
    pub npp_state: Option<String>,
    pub detail: Option<String>,
}

impl NodeReadiness {
    /// Interpret the reported status of a node resource
    pub fn from_status(name: impl Into<String>, status: &Value) -> Self {
        let field = |key: &str| status.get(key).and_then(Value::as_str).map(String::from);
        let node_state = field("node-state");
        let npp_state = field("npp-state");

        let (mut sync, mut detail) = match (node_state.as_deref(), npp_state.as_deref()) {
            (Some("Synced"), _) => (NodeSync::Ready, None),
            (Some("Committing" | "RetryingCommit"), _) => (NodeSync::Syncing, None),
            (Some("Standby"), _) => (NodeSync::Pending, Some("standby".to_string())),
            (Some("NoIpAddress"), _) => (NodeSync::Error, Some("no IP address".to_string())),
            // TryingToConnect, WaitingForInitialCfg and states added later
            (Some(_), _) => (NodeSync::Pending, None),
            (None, Some("Connected")) => (NodeSync::Syncing, None),
            (None, Some(_)) => (NodeSync::Pending, None),
            (None, None) => (NodeSync::Unknown, None),
        };

        let details: Vec<&str> = ["node-details", "npp-details"]
            .iter()
            .filter_map(|key| status.get(*key).and_then(Value::as_str))
            .filter(|text| !text.is_empty())
            .collect();
        if details.iter().any(|d| d.to_lowercase().contains("error")) {
            sync = NodeSync::Error;
            detail = Some(details.join("; "));
        }

        Self {
            name: name.into(),
            sync,
            node_state,
            npp_state,
            detail,
        }
    }

    fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sync: NodeSync::Unknown,
            node_state: None,
            npp_state: None,
            detail: Some("node resource not found".to_string()),
        }
    }

    fn unreadable(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            sync: NodeSync::Error,
            node_state: None,
            npp_state: None,
            detail: Some(reason),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.sync == NodeSync::Ready
    }
}

/// Readiness of every node of a topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub namespace: String,
    pub nodes: Vec<NodeReadiness>,
    pub waited_ms: u64,
    /// Gave up waiting before every node was ready
    pub timed_out: bool,
}

impl ReadinessReport {
    pub fn all_ready(&self) -> bool {
        self.nodes.iter().all(NodeReadiness::is_ready)
    }

    pub fn count(&self, sync: NodeSync) -> usize {
        self.nodes.iter().filter(|n| n.sync == sync).count()
    }
}

/// Read the status of each named node resource once
pub async fn check_nodes<C: ClusterClient + ?Sized>(
    client: &C,
    ctx: &SyncContext,
    names: &[String],
) -> Vec<NodeReadiness> {
    let namespace = ctx.namespace.as_str();
    let mut nodes = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_str();
        let result = ctx
            .retry
            .run(&ctx.cancel, ApplyError::is_transient, |_| {
                client.get(namespace, ResourceKind::Node, name)
            })
            .await;
        let readiness = match result {
            Ok(Some(observed)) => NodeReadiness::from_status(name, &observed.status),
            Ok(None) => NodeReadiness::missing(name),
            Err(RetryError::Cancelled { .. }) => NodeReadiness::unreadable(name, "cancelled".into()),
            Err(e) => NodeReadiness::unreadable(name, e.to_string()),
        };
        debug!(node = %name, sync = %readiness.sync, "Node status");
        nodes.push(readiness);
    }
    nodes
}

/// Poll node statuses every `interval` until all are ready, `timeout`
/// passes or the context is cancelled. A zero `timeout` checks once.
pub async fn wait_for_nodes<C: ClusterClient + ?Sized>(
    client: &C,
    ctx: &SyncContext,
    names: &[String],
    timeout: Duration,
    interval: Duration,
) -> ReadinessReport {
    let started = Instant::now();
    info!(
        namespace = %ctx.namespace,
        nodes = names.len(),
        timeout_secs = timeout.as_secs(),
        "Waiting for nodes to synchronise"
    );

    loop {
        let nodes = check_nodes(client, ctx, names).await;
        let ready = nodes.iter().filter(|n| n.is_ready()).count();
        let elapsed = started.elapsed();
        info!("{}/{} nodes ready after {}s", ready, nodes.len(), elapsed.as_secs());

        let done = ready == nodes.len() || ctx.cancel.is_cancelled();
        if done || elapsed >= timeout {
            return readiness_report(ctx, nodes, started, !done);
        }

        let pause = interval.min(timeout - elapsed);
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                info!("Stopped waiting for nodes");
                return readiness_report(ctx, nodes, started, false);
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

fn readiness_report(
    ctx: &SyncContext,
    nodes: Vec<NodeReadiness>,
    started: Instant,
    timed_out: bool,
) -> ReadinessReport {
    ReadinessReport {
        namespace: ctx.namespace.clone(),
        nodes,
        waited_ms: started.elapsed().as_millis() as u64,
        timed_out,
    }
}
