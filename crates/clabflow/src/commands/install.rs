//! `clabflow install`: reconcile the topology, then bootstrap its nodes

use crate::GlobalArgs;
use crate::commands::status::{DEFAULT_INTERVAL, node_resources};
use crate::commands::{cancellation, connect_eda, load_topology};
use crate::report::{self, Exit};
use crate::settings::Settings;
use anyhow::Context;
use chrono::Utc;
use clabflow_bootstrap::{BootstrapReport, BootstrapState, Bootstrapper, NodeJob, OpenSsh};
use clabflow_cloud::{
    NodeRecord, Reconciler, StateManager, SyncContext, SyncOutcome, SyncReport, TopologyRecord,
    wait_for_nodes,
};
use clabflow_core::{ResourceSpec, Topology, desired_resources, fabric_resource, namespace_for};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct InstallOptions {
    pub topology: PathBuf,
    pub namespace_prefix: String,
    pub timeout: Option<u64>,
    pub dry_run: bool,
    pub skip_bootstrap: bool,
    pub workers: Option<usize>,
    /// Seconds to wait for EDA to report the nodes synchronised
    pub wait: Option<u64>,
}

pub async fn handle(
    global: &GlobalArgs,
    settings: &Settings,
    options: InstallOptions,
) -> anyhow::Result<Exit> {
    let Ok(topology) = load_topology(&options.topology) else {
        return Ok(Exit::Invalid);
    };
    let namespace = namespace_for(&topology.name, &options.namespace_prefix);
    let desired = desired_resources(&topology);

    println!(
        "{}",
        format!(
            "Installing {} ({} nodes, {} links) into {}",
            topology.name,
            topology.nodes.len(),
            topology.links.len(),
            namespace
        )
        .blue()
    );

    let client = match connect_eda(global, settings).await? {
        Ok(client) => Arc::new(client),
        Err(exit) => return Ok(exit),
    };

    let cancel = cancellation(options.timeout);
    let description = match fabric_resource(&topology, &namespace).spec {
        ResourceSpec::Fabric(fabric) => fabric.description,
        _ => format!("Containerlab {}", topology.name),
    };
    let ctx = SyncContext::new(topology.safe_name(), &namespace)
        .with_description(description)
        .with_retry(settings.reconcile_retry())
        .with_cancel(cancel.clone());
    let reconciler = Reconciler::new(client.as_ref(), &ctx);

    if options.dry_run {
        return match reconciler.plan(desired).await {
            Ok((_, plan)) => {
                report::print_plan(&plan);
                Ok(Exit::Success)
            }
            Err(SyncOutcome::Aborted(reason)) => {
                eprintln!("{}", "✗ Could not read the current state".red().bold());
                eprintln!("  {}", reason);
                Ok(Exit::Aborted)
            }
            Err(_) => Ok(Exit::Partial),
        };
    }

    let state_manager = StateManager::new(std::env::current_dir()?);
    let lock = state_manager
        .acquire_lock()
        .await
        .context("another clabflow run holds the state lock")?;
    let mut state = state_manager.load().await?;

    let sync = reconciler.reconcile(desired).await;
    report::print_sync_report(&sync);
    let mut exit = Exit::for_sync(&sync);

    let record = state.topology_mut(&topology.safe_name(), &namespace);
    record.namespace = namespace.clone();
    record.source = topology.source.as_ref().map(|p| p.display().to_string());
    record.record_sync(&sync);
    let removed = record.retain_nodes(topology.nodes.iter().map(|n| n.name.as_str()));
    if !removed.is_empty() {
        tracing::info!(nodes = ?removed, "Forgot bootstrap records of removed nodes");
    }

    let bootstrap = match sync.outcome {
        _ if options.skip_bootstrap => None,
        SyncOutcome::Completed if !cancel.is_cancelled() => {
            let jobs = node_jobs(&topology, &sync, record);
            let bootstrapper = Bootstrapper::new(
                Arc::new(OpenSsh::new(settings.ssh())),
                client.clone(),
                settings.bootstrap(options.workers),
                &namespace,
            )
            .with_cancel(cancel.clone());
            println!();
            println!("{}", format!("Bootstrapping {} nodes...", jobs.len()).blue());
            Some(bootstrapper.run(jobs).await)
        }
        _ => {
            println!("{}", "Skipping node bootstrap".yellow());
            None
        }
    };

    if let Some(bootstrap) = &bootstrap {
        report::print_bootstrap_report(bootstrap);
        record_bootstrap(record, bootstrap);
        exit = exit.max(Exit::for_bootstrap(bootstrap));
    }

    state_manager.save(&state).await?;
    lock.release().await?;

    match options.wait {
        Some(secs) if sync.outcome == SyncOutcome::Completed && !cancel.is_cancelled() => {
            let present = sync.present_nodes();
            let names: Vec<String> = node_resources(&topology)
                .into_iter()
                .filter(|name| present.contains(name))
                .collect();
            println!();
            println!(
                "{}",
                format!("Waiting up to {}s for {} nodes to synchronise...", secs, names.len()).blue()
            );
            let readiness = wait_for_nodes(
                client.as_ref(),
                &ctx,
                &names,
                Duration::from_secs(secs),
                Duration::from_secs(DEFAULT_INTERVAL),
            )
            .await;
            report::print_readiness_report(&readiness);
            exit = exit.max(Exit::for_readiness(&readiness));
        }
        Some(_) => println!("{}", "Skipping node sync wait".yellow()),
        None => {}
    }
    Ok(exit)
}

/// One job per topology node, carrying what the last run established
fn node_jobs(topology: &Topology, sync: &SyncReport, record: &TopologyRecord) -> Vec<NodeJob> {
    let present = sync.present_nodes();
    topology
        .nodes
        .iter()
        .map(|node| {
            let resource = topology.node_resource_name(&node.name);
            let previous = record.nodes.get(&node.name);
            NodeJob {
                node: node.clone(),
                resource_present: present.contains(&resource),
                resource,
                established_login: previous.and_then(|p| p.established_login.clone()),
                pushed_revision: previous
                    .filter(|p| p.state == BootstrapState::Complete.to_string())
                    .and_then(|p| p.credential_revision.clone()),
            }
        })
        .collect()
}

fn record_bootstrap(record: &mut TopologyRecord, report: &BootstrapReport) {
    for outcome in &report.nodes {
        let previous = record.nodes.get(&outcome.name);
        let node = NodeRecord {
            state: outcome.state.to_string(),
            established_login: outcome
                .login
                .clone()
                .or_else(|| previous.and_then(|p| p.established_login.clone())),
            credential_revision: outcome
                .credential_revision
                .clone()
                .or_else(|| previous.and_then(|p| p.credential_revision.clone())),
            updated_at: Utc::now(),
        };
        record.set_node(outcome.name.clone(), node);
    }
}
