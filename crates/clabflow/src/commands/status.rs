//! `clabflow status`: node synchronisation as EDA reports it

use crate::GlobalArgs;
use crate::commands::{cancellation, connect_eda, load_topology};
use crate::report::{self, Exit};
use crate::settings::Settings;
use clabflow_cloud::{StateManager, SyncContext, wait_for_nodes};
use clabflow_core::{Topology, namespace_for};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

/// Seconds between status polls
pub const DEFAULT_INTERVAL: u64 = 10;

pub struct StatusOptions {
    pub topology: PathBuf,
    pub namespace_prefix: String,
    /// Keep polling for up to this many seconds
    pub wait: Option<u64>,
    pub interval: u64,
}

pub async fn handle(
    global: &GlobalArgs,
    settings: &Settings,
    options: StatusOptions,
) -> anyhow::Result<Exit> {
    let Ok(topology) = load_topology(&options.topology) else {
        return Ok(Exit::Invalid);
    };
    let name = topology.safe_name();

    // the namespace recorded at install time wins over the current prefix
    let state = StateManager::new(std::env::current_dir()?).load().await?;
    let namespace = state
        .topology(&name)
        .map(|record| record.namespace.clone())
        .unwrap_or_else(|| namespace_for(&topology.name, &options.namespace_prefix));

    let client = match connect_eda(global, settings).await? {
        Ok(client) => client,
        Err(exit) => return Ok(exit),
    };

    println!("{}", format!("Checking node sync of {} in {}", name, namespace).blue());
    let ctx = SyncContext::new(&name, &namespace)
        .with_retry(settings.reconcile_retry())
        .with_cancel(cancellation(None));
    let readiness = wait_for_nodes(
        &client,
        &ctx,
        &node_resources(&topology),
        Duration::from_secs(options.wait.unwrap_or(0)),
        Duration::from_secs(options.interval.max(1)),
    )
    .await;
    report::print_readiness_report(&readiness);
    Ok(Exit::for_readiness(&readiness))
}

/// Node resource names in topology order
pub fn node_resources(topology: &Topology) -> Vec<String> {
    topology
        .nodes
        .iter()
        .map(|node| topology.node_resource_name(&node.name))
        .collect()
}
