//! Topology loader
//!
//! Parses a topology description and validates it into a [`Topology`].
//! Nothing outside the process is touched here.

use crate::document::{NodeDefaults, RawLink, RawNode, TopologyDocument};
use crate::error::{LoadError, Result, ValidationError};
use crate::model::{Endpoint, NodeId, NodeKind, Topology, TopologyLink, TopologyNode};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Load and validate a topology file
#[instrument(fields(path = %path.as_ref().display()))]
pub fn load_topology_file(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Topology> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document = TopologyDocument::from_yaml(&content)?;
    let mut topology = build_topology(document, path.parent())?;
    topology.source = Some(path.to_path_buf());

    info!(
        topology = %topology.name,
        nodes = topology.nodes.len(),
        links = topology.links.len(),
        "Topology loaded"
    );
    Ok(topology)
}

/// Load and validate a topology from a string
pub fn load_topology_str(content: &str) -> Result<Topology> {
    let document = TopologyDocument::from_yaml(content)?;
    Ok(build_topology(document, None)?)
}

/// Validate a parsed document into a topology.
///
/// `base_dir` resolves relative startup-config paths.
pub fn build_topology(
    document: TopologyDocument,
    base_dir: Option<&Path>,
) -> std::result::Result<Topology, ValidationError> {
    for field in document.ignored_fields() {
        debug!(field = %field, "Ignoring unsupported topology field");
    }

    let name = document.name.trim().to_string();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    let subnet = document
        .mgmt
        .as_ref()
        .and_then(|m| m.ipv4_subnet.clone())
        .map(|s| parse_subnet(&s).map(|parsed| (s, parsed)))
        .transpose()?;

    let defaults = document.topology.defaults.unwrap_or_default();
    let kinds = document.topology.kinds;

    let mut nodes = Vec::with_capacity(document.topology.nodes.len());
    let mut seen = HashSet::new();
    for (index, (node_name, raw)) in document.topology.nodes.into_iter().enumerate() {
        if !seen.insert(node_name.clone()) {
            return Err(ValidationError::DuplicateNode(node_name));
        }
        let node = build_node(
            NodeId(index),
            node_name,
            raw,
            &defaults,
            &kinds,
            subnet.as_ref(),
            base_dir,
        )?;
        nodes.push(node);
    }

    let links = build_links(document.topology.links, &nodes)?;

    let topology = Topology {
        name,
        mgmt_subnet: subnet.map(|(raw, _)| raw),
        nodes,
        links,
        source: None,
    };
    check_name_collisions(&topology)?;
    Ok(topology)
}

fn build_node(
    id: NodeId,
    name: String,
    raw: RawNode,
    defaults: &NodeDefaults,
    kinds: &std::collections::BTreeMap<String, NodeDefaults>,
    subnet: Option<&(String, (Ipv4Addr, u8))>,
    base_dir: Option<&Path>,
) -> std::result::Result<TopologyNode, ValidationError> {
    for field in raw.extra.keys() {
        debug!(node = %name, field = %field, "Ignoring unsupported node field");
    }

    let kind_name = raw
        .kind
        .or_else(|| defaults.kind.clone())
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ValidationError::MissingKind(name.clone()))?;
    let kind_defaults = kinds.get(&kind_name);

    // node > kinds.<kind> > defaults
    let inherit = |own: Option<String>, pick: fn(&NodeDefaults) -> Option<String>| {
        own.or_else(|| kind_defaults.and_then(pick))
            .or_else(|| pick(defaults))
    };
    let node_type = inherit(raw.node_type, |d| d.node_type.clone());
    let image = inherit(raw.image, |d| d.image.clone());
    let startup_config = inherit(raw.startup_config, |d| d.startup_config.clone());

    let address = raw
        .mgmt_ipv4
        .ok_or_else(|| ValidationError::MissingMgmtAddress(name.clone()))?;
    let mgmt_ipv4: Ipv4Addr = address
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidMgmtAddress {
            node: name.clone(),
            address: address.clone(),
        })?;
    if let Some((raw_subnet, (network, prefix))) = subnet {
        if !in_subnet(mgmt_ipv4, *network, *prefix) {
            return Err(ValidationError::AddressOutsideSubnet {
                node: name,
                address,
                subnet: raw_subnet.clone(),
            });
        }
    }

    let startup_config = startup_config.map(|p| {
        let path = PathBuf::from(p);
        match base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    });

    Ok(TopologyNode {
        id,
        name,
        kind: NodeKind::parse(&kind_name),
        node_type,
        image,
        mgmt_ipv4,
        startup_config,
    })
}

fn build_links(
    raw_links: Vec<RawLink>,
    nodes: &[TopologyNode],
) -> std::result::Result<Vec<TopologyLink>, ValidationError> {
    let known: HashMap<&str, &NodeKind> =
        nodes.iter().map(|n| (n.name.as_str(), &n.kind)).collect();
    let mut used: HashSet<(String, String)> = HashSet::new();
    let mut links = Vec::with_capacity(raw_links.len());

    for (index, raw) in raw_links.into_iter().enumerate() {
        for field in raw.extra.keys() {
            debug!(link = index, field = %field, "Ignoring unsupported link field");
        }

        if raw.endpoints.len() != 2 {
            return Err(ValidationError::MalformedEndpoint {
                link: index,
                endpoint: raw.endpoints.join(","),
            });
        }

        let [a, z] = [&raw.endpoints[0], &raw.endpoints[1]].map(|text| {
            let endpoint = parse_endpoint(index, text)?;
            if !known.contains_key(endpoint.node.as_str()) {
                return Err(ValidationError::UnknownNode {
                    link: index,
                    endpoint: text.clone(),
                    node: endpoint.node,
                });
            }
            Ok(endpoint)
        });
        let (a, z) = (a?, z?);
        // two spellings of one port collide once translated
        for endpoint in [&a, &z] {
            let port = known
                .get(endpoint.node.as_str())
                .map(|kind| kind.interface_name(&endpoint.interface))
                .unwrap_or_else(|| endpoint.interface.clone());
            if !used.insert((endpoint.node.clone(), port)) {
                return Err(ValidationError::DuplicateInterface {
                    node: endpoint.node.clone(),
                    interface: endpoint.interface.clone(),
                });
            }
        }
        links.push(TopologyLink { index, a, z });
    }

    Ok(links)
}

/// Parse `<node>:<interface>`
pub fn parse_endpoint(link: usize, text: &str) -> std::result::Result<Endpoint, ValidationError> {
    let malformed = || ValidationError::MalformedEndpoint {
        link,
        endpoint: text.to_string(),
    };
    let (node, interface) = text.split_once(':').ok_or_else(malformed)?;
    let (node, interface) = (node.trim(), interface.trim());
    if node.is_empty() || interface.is_empty() || interface.contains(':') {
        return Err(malformed());
    }
    Ok(Endpoint {
        node: node.to_string(),
        interface: interface.to_string(),
    })
}

fn parse_subnet(text: &str) -> std::result::Result<(Ipv4Addr, u8), ValidationError> {
    let invalid = || ValidationError::InvalidSubnet(text.to_string());
    let (addr, prefix) = text.trim().split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok((addr, prefix))
}

fn in_subnet(addr: Ipv4Addr, network: Ipv4Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    (u32::from(addr) & mask) == (u32::from(network) & mask)
}

/// Two entities must never share a resource name after normalisation
fn check_name_collisions(topology: &Topology) -> std::result::Result<(), ValidationError> {
    let mut names: HashMap<String, String> = HashMap::new();
    let mut claim = |resource: String, owner: String| match names.get(&resource) {
        Some(first) => Err(ValidationError::NameCollision {
            name: resource,
            first: first.clone(),
            second: owner,
        }),
        None => {
            names.insert(resource, owner);
            Ok(())
        }
    };

    for node in &topology.nodes {
        claim(topology.node_resource_name(&node.name), node.name.clone())?;
    }
    for link in &topology.links {
        claim(
            topology.link_resource_name(link),
            format!("{} <-> {}", link.a, link.z),
        )?;
    }
    Ok(())
}
