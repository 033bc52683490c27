//! `clabflow remove`: delete a topology's resources and namespace

use crate::GlobalArgs;
use crate::commands::{cancellation, connect_eda};
use crate::report::{self, Exit};
use crate::settings::Settings;
use anyhow::Context;
use clabflow_cloud::{Reconciler, StateManager, SyncContext};
use clabflow_core::{namespace_for, normalize_name};
use colored::Colorize;

pub async fn handle(
    global: &GlobalArgs,
    settings: &Settings,
    topology: &str,
    namespace_prefix: &str,
    timeout: Option<u64>,
) -> anyhow::Result<Exit> {
    let name = normalize_name(topology);

    let client = match connect_eda(global, settings).await? {
        Ok(client) => client,
        Err(exit) => return Ok(exit),
    };

    let state_manager = StateManager::new(std::env::current_dir()?);
    let lock = state_manager
        .acquire_lock()
        .await
        .context("another clabflow run holds the state lock")?;
    let mut state = state_manager.load().await?;

    // the namespace recorded at install time wins over the current prefix
    let namespace = state
        .topology(&name)
        .map(|record| record.namespace.clone())
        .unwrap_or_else(|| namespace_for(topology, namespace_prefix));
    println!("{}", format!("Removing {} from {}", name, namespace).blue());

    let ctx = SyncContext::new(&name, &namespace)
        .with_retry(settings.reconcile_retry())
        .with_cancel(cancellation(timeout));
    let sync = Reconciler::new(&client, &ctx).teardown().await;
    report::print_sync_report(&sync);

    if sync.is_success() {
        state.remove_topology(&name);
    } else if let Some(record) = state.topologies.get_mut(&name) {
        record.record_sync(&sync);
        // node credentials are gone with the namespace teardown attempt
        record.retain_nodes(std::iter::empty());
    }
    state_manager.save(&state).await?;
    lock.release().await?;

    Ok(Exit::for_sync(&sync))
}
