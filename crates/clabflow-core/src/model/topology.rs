//! Validated topology graph

use super::kind::NodeKind;
use crate::naming::normalize_name;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Position of a node in the topology, used as an arena index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// An emulated network node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: NodeId,
    /// Unique within the topology
    pub name: String,
    pub kind: NodeKind,
    /// Hardware type/profile (e.g. `ixrd3l`)
    pub node_type: Option<String>,
    pub image: Option<String>,
    pub mgmt_ipv4: Ipv4Addr,
    pub startup_config: Option<PathBuf>,
}

impl TopologyNode {
    /// Software version, taken from the image tag
    pub fn version(&self) -> Option<String> {
        let image = self.image.as_deref()?;
        // registry ports (host:5000/img) are not tags
        let (_, tag) = image.rsplit_once(':')?;
        if tag.contains('/') || tag.is_empty() {
            return None;
        }
        Some(tag.to_string())
    }

    /// Effective node type (explicit or the kind default)
    pub fn effective_type(&self) -> Option<&str> {
        self.node_type.as_deref().or(self.kind.default_type())
    }
}

/// One side of a link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: String,
    pub interface: String,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

/// A point-to-point link between two node interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyLink {
    /// Position in the topology file
    pub index: usize,
    pub a: Endpoint,
    pub z: Endpoint,
}

/// Validated topology
///
/// Built only by the loader; immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub name: String,
    pub mgmt_subnet: Option<String>,
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
    /// File the topology was read from, if any
    pub source: Option<PathBuf>,
}

impl Topology {
    /// Name safe for use in control-plane identifiers
    pub fn safe_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn node(&self, name: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Interfaces of a node as declared by its incident links, in link order
    pub fn interfaces_of(&self, node: &str) -> Vec<&str> {
        let mut interfaces = Vec::new();
        for link in &self.links {
            for endpoint in [&link.a, &link.z] {
                if endpoint.node == node {
                    interfaces.push(endpoint.interface.as_str());
                }
            }
        }
        interfaces
    }

    /// Control-plane name of a node resource: `<topology>-<node>`
    pub fn node_resource_name(&self, node: &str) -> String {
        normalize_name(&format!("{}-{}", self.safe_name(), node))
    }

    /// Control-plane name of a link resource
    pub fn link_resource_name(&self, link: &TopologyLink) -> String {
        normalize_name(&format!(
            "{}-{}-{}-{}-{}",
            self.safe_name(),
            link.a.node,
            link.a.interface,
            link.z.node,
            link.z.interface
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, image: Option<&str>) -> TopologyNode {
        TopologyNode {
            id: NodeId(0),
            name: name.to_string(),
            kind: NodeKind::SrLinux,
            node_type: None,
            image: image.map(String::from),
            mgmt_ipv4: Ipv4Addr::new(10, 0, 0, 1),
            startup_config: None,
        }
    }

    #[test]
    fn test_version_from_image_tag() {
        assert_eq!(
            node("a", Some("ghcr.io/nokia/srlinux:24.10.1")).version(),
            Some("24.10.1".to_string())
        );
        assert_eq!(node("a", Some("ghcr.io/nokia/srlinux")).version(), None);
        assert_eq!(node("a", Some("registry:5000/srlinux")).version(), None);
        assert_eq!(node("a", None).version(), None);
    }

    #[test]
    fn test_resource_names() {
        let topology = Topology {
            name: "My_Lab".to_string(),
            mgmt_subnet: None,
            nodes: vec![node("Leaf1", None), node("spine1", None)],
            links: vec![TopologyLink {
                index: 0,
                a: Endpoint {
                    node: "spine1".to_string(),
                    interface: "e1-1".to_string(),
                },
                z: Endpoint {
                    node: "Leaf1".to_string(),
                    interface: "e1-49".to_string(),
                },
            }],
            source: None,
        };

        assert_eq!(topology.safe_name(), "my-lab");
        assert_eq!(topology.node_resource_name("Leaf1"), "my-lab-leaf1");
        assert_eq!(
            topology.link_resource_name(&topology.links[0]),
            "my-lab-spine1-e1-1-leaf1-e1-49"
        );
        assert_eq!(topology.interfaces_of("Leaf1"), vec!["e1-49"]);
    }
}
