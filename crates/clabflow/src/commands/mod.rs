pub mod generate;
pub mod install;
pub mod remove;
pub mod status;
pub mod validate;

use crate::GlobalArgs;
use crate::report::{self, Exit};
use crate::settings::Settings;
use clabflow_core::{LoadError, Topology};
use clabflow_eda::EdaClient;
use colored::Colorize;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Load a topology, printing why it failed
pub fn load_topology(path: &Path) -> Result<Topology, LoadError> {
    clabflow_core::load_topology_file(path).inspect_err(|e| {
        eprintln!();
        match e.as_validation() {
            Some(_) => eprintln!("{}", "✗ Invalid topology".red().bold()),
            None => eprintln!("{}", "✗ Could not read topology".red().bold()),
        }
        eprintln!("  {}", e);
    })
}

/// Log in to EDA, or the exit code explaining why not
pub async fn connect_eda(global: &GlobalArgs, settings: &Settings) -> anyhow::Result<Result<EdaClient, Exit>> {
    let config = match settings.eda(global) {
        Ok(config) => config,
        Err(e) => {
            report::print_error(&e);
            return Ok(Err(Exit::Invalid));
        }
    };
    let client = EdaClient::new(config)?;

    // nothing is changed against an unhealthy or unreachable control plane
    match client.is_up().await {
        Ok(true) => {}
        Ok(false) => {
            report::print_error(&anyhow::anyhow!("EDA at {} does not report UP", client.url()));
            return Ok(Err(Exit::Aborted));
        }
        Err(e) => {
            let e = anyhow::Error::new(e).context(format!("EDA at {} is unreachable", client.url()));
            report::print_error(&e);
            return Ok(Err(Exit::Aborted));
        }
    }
    if let Err(e) = client.login().await {
        report::print_error(&anyhow::Error::new(e).context("EDA login failed"));
        return Ok(Err(Exit::Aborted));
    }
    match client.version().await {
        Ok(version) => tracing::info!(%version, "Connected to EDA"),
        Err(e) => tracing::debug!("EDA version unavailable: {}", e),
    }
    Ok(Ok(client))
}

/// Token cancelled by Ctrl-C or when `timeout` seconds have passed
pub fn cancellation(timeout: Option<u64>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, finishing in-flight work...".yellow());
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = on_deadline.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::warn!("Deadline of {}s reached, cancelling", secs);
                    on_deadline.cancel();
                }
            }
        });
    }
    cancel
}
