use crate::commands::load_topology;
use crate::report::Exit;
use clabflow_core::{DEFAULT_NAMESPACE_PREFIX, map_topology, namespace_for};
use colored::Colorize;
use std::path::Path;

pub fn handle(path: &Path) -> anyhow::Result<Exit> {
    println!("{}", "Validating topology...".blue());

    let Ok(topology) = load_topology(path) else {
        return Ok(Exit::Invalid);
    };

    println!("{}", "✓ Topology is valid".green().bold());
    println!();
    println!("Summary:");
    println!("  Name:      {}", topology.name.cyan());
    println!(
        "  Namespace: {}",
        namespace_for(&topology.name, DEFAULT_NAMESPACE_PREFIX).cyan()
    );
    if let Some(subnet) = &topology.mgmt_subnet {
        println!("  Mgmt:      {}", subnet);
    }
    println!("  Nodes:     {}", topology.nodes.len());
    for node in &topology.nodes {
        println!(
            "    - {} ({}, {})",
            node.name.cyan(),
            node.kind,
            node.mgmt_ipv4
        );
    }
    println!("  Links:     {}", topology.links.len());
    println!("  Resources: {}", map_topology(&topology).len());
    Ok(Exit::Success)
}
