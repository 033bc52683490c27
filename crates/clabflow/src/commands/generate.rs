use crate::commands::load_topology;
use crate::report::Exit;
use anyhow::Context;
use clabflow_core::{desired_resources, fabric_resource, namespace_for, render_manifests};
use colored::Colorize;
use std::path::Path;

pub fn handle(path: &Path, output: Option<&Path>, namespace_prefix: &str) -> anyhow::Result<Exit> {
    let Ok(topology) = load_topology(path) else {
        return Ok(Exit::Invalid);
    };

    let namespace = namespace_for(&topology.name, namespace_prefix);
    let mut resources = vec![fabric_resource(&topology, &namespace)];
    resources.extend(desired_resources(&topology));
    let manifests = render_manifests(&resources, &namespace).context("failed to render manifests")?;

    match output {
        Some(file) => {
            std::fs::write(file, &manifests)
                .with_context(|| format!("failed to write {}", file.display()))?;
            eprintln!(
                "{}",
                format!("✓ Wrote {} manifests to {}", resources.len(), file.display()).green()
            );
        }
        None => print!("{}", manifests),
    }
    Ok(Exit::Success)
}
