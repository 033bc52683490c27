//! Resource mapper
//!
//! Pure structural mapping from a validated [`Topology`] to the resources
//! the control plane should hold. No I/O and no hidden state: the same
//! topology always maps to byte-identical specs.

use crate::model::{
    FabricSpec, GroupBinding, InitSpec, LinkEndpointSpec, LinkSpec, ManagedResource, NodeKind,
    NodeRole, NodeSpec, ProfileSpec, ResourceId, ResourceKind, ResourceSpec, SELECTOR_LABEL,
    SecurityProfileSpec, TOPOLOGY_LABEL, TlsSpec, Topology, TopologyLink, TopologyNode,
    UserGroupSpec, UserSpec,
};
use crate::naming::normalize_name;
use std::collections::{BTreeMap, BTreeSet};

pub const LINK_ROLE_INTER_SWITCH: &str = "interSwitch";
pub const LINK_ROLE_EDGE: &str = "edge";

pub const INIT_NAME: &str = "init-base";
pub const SECURITY_PROFILE_NAME: &str = "managed-tls";
pub const USER_GROUP_NAME: &str = "sudo";
/// Certificate issuer the control plane runs for node TLS
pub const NODE_ISSUER: &str = "eda-node-issuer";

const GROUP_SERVICES: [&str; 9] = [
    "CLI", "FTP", "GNMI", "GNOI", "GNSI", "GRIBI", "Reflection", "JSON-RPC", "NETCONF",
];

/// Everything the control plane should hold for a topology, in apply order:
/// shared resources, nodes, links.
pub fn desired_resources(topology: &Topology) -> Vec<ManagedResource> {
    let mut resources = shared_resources(topology);
    resources.extend(map_topology(topology));
    resources
}

/// Map a topology to its node and link resources.
///
/// Nodes come first in file order, then links in file order.
pub fn map_topology(topology: &Topology) -> Vec<ManagedResource> {
    let safe = topology.safe_name();
    let mut resources = Vec::with_capacity(topology.nodes.len() + topology.links.len());

    for node in &topology.nodes {
        resources.push(node_resource(topology, &safe, node));
    }
    for link in &topology.links {
        resources.push(link_resource(topology, &safe, link));
    }
    resources
}

/// The topology-wide resource every node and link lives under
pub fn fabric_resource(topology: &Topology, namespace: &str) -> ManagedResource {
    let description = match &topology.source {
        Some(path) => format!("Containerlab {}: {}", topology.name, path.display()),
        None => format!("Containerlab {}", topology.name),
    };
    ManagedResource {
        id: ResourceId::new(ResourceKind::Fabric, namespace),
        labels: topology_labels(&topology.safe_name()),
        spec: ResourceSpec::Fabric(FabricSpec {
            topology: topology.safe_name(),
            mgmt_subnet: topology.mgmt_subnet.clone(),
            description,
        }),
    }
}

/// Resources every managed node relies on: the namespace init, the TLS
/// security profile, the admin group, one user per managed kind and one
/// profile per `(kind, version)`.
///
/// Empty when the topology has no managed nodes.
pub fn shared_resources(topology: &Topology) -> Vec<ManagedResource> {
    let safe = topology.safe_name();
    let mut kinds: Vec<&NodeKind> = Vec::new();
    for node in topology.nodes.iter().filter(|n| n.kind.is_managed()) {
        if !kinds.contains(&&node.kind) {
            kinds.push(&node.kind);
        }
    }
    if kinds.is_empty() {
        return Vec::new();
    }

    let selectors: Vec<String> = kinds.iter().map(|k| selector(k)).collect();
    let shared = |kind: ResourceKind, name: &str, spec: ResourceSpec| ManagedResource {
        id: ResourceId::new(kind, name),
        labels: topology_labels(&safe),
        spec,
    };

    let mut resources = vec![
        shared(
            ResourceKind::Init,
            INIT_NAME,
            ResourceSpec::Init(InitSpec { commit_save: true }),
        ),
        shared(
            ResourceKind::SecurityProfile,
            SECURITY_PROFILE_NAME,
            ResourceSpec::SecurityProfile(SecurityProfileSpec {
                node_selector: selectors,
                tls: TlsSpec {
                    issuer_ref: NODE_ISSUER.to_string(),
                },
            }),
        ),
        shared(
            ResourceKind::UserGroup,
            USER_GROUP_NAME,
            ResourceSpec::UserGroup(UserGroupSpec {
                services: GROUP_SERVICES.iter().map(|s| s.to_string()).collect(),
                superuser: true,
            }),
        ),
    ];

    for kind in &kinds {
        let (username, password) = kind.default_login();
        resources.push(shared(
            ResourceKind::User,
            &node_user_name(kind),
            ResourceSpec::User(UserSpec {
                username: username.to_string(),
                password: password.map(String::from),
                ssh_public_keys: Vec::new(),
                group_bindings: vec![GroupBinding {
                    groups: vec![USER_GROUP_NAME.to_string()],
                    node_selector: vec![selector(kind)],
                }],
            }),
        ));
    }

    let mut profiles = BTreeSet::new();
    for node in topology.nodes.iter().filter(|n| n.kind.is_managed()) {
        let name = node_profile_name(&safe, node);
        if !profiles.insert(name.clone()) {
            continue;
        }
        let version = node.version().unwrap_or_else(|| "latest".to_string());
        let version_match = match node.kind {
            NodeKind::SrLinux => format!("v{}.*", version.replace('.', "\\.")),
            _ => String::new(),
        };
        let (username, password) = node.kind.default_login();
        resources.push(shared(
            ResourceKind::Profile,
            &name,
            ResourceSpec::Profile(ProfileSpec {
                operating_system: node.kind.operating_system().to_string(),
                version,
                version_path: node.kind.version_path().to_string(),
                version_match,
                port: node.kind.gnmi_port(),
                node_user: node_user_name(&node.kind),
                onboarding_username: username.to_string(),
                onboarding_password: password.map(String::from),
                annotate: node.kind != NodeKind::Ceos,
            }),
        ));
    }
    resources
}

/// `User` resource provisioned on nodes of one kind
pub fn node_user_name(kind: &NodeKind) -> String {
    format!("admin-{}", kind.operating_system())
}

fn selector(kind: &NodeKind) -> String {
    format!("{}={}", SELECTOR_LABEL, kind.managed_label())
}

/// Node profile name: `<topology>-<os>-<version>`
pub fn node_profile_name(safe_topology: &str, node: &TopologyNode) -> String {
    let version = node.version().unwrap_or_else(|| "latest".to_string());
    normalize_name(&format!(
        "{}-{}-{}",
        safe_topology,
        node.kind.operating_system(),
        version
    ))
}

fn topology_labels(safe_topology: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(TOPOLOGY_LABEL.to_string(), safe_topology.to_string())])
}

fn node_resource(topology: &Topology, safe: &str, node: &TopologyNode) -> ManagedResource {
    let interfaces: BTreeSet<String> = topology
        .interfaces_of(&node.name)
        .into_iter()
        .map(|ifname| node.kind.interface_name(ifname))
        .collect();

    let mut labels = topology_labels(safe);
    labels.insert(SELECTOR_LABEL.to_string(), node.kind.managed_label());

    ManagedResource {
        id: ResourceId::new(ResourceKind::Node, topology.node_resource_name(&node.name)),
        labels,
        spec: ResourceSpec::Node(NodeSpec {
            topology: safe.to_string(),
            node: node.name.clone(),
            kind: node.kind.operating_system().to_string(),
            node_type: node.effective_type().map(String::from),
            platform: node.kind.platform(node.node_type.as_deref()),
            version: node.version(),
            role: NodeRole::infer(&node.name),
            mgmt_address: node.mgmt_ipv4.to_string(),
            startup_config: node
                .startup_config
                .as_ref()
                .map(|p| p.display().to_string()),
            node_profile: node
                .kind
                .is_managed()
                .then(|| node_profile_name(safe, node)),
            interfaces: interfaces.into_iter().collect(),
        }),
    }
}

fn link_resource(topology: &Topology, safe: &str, link: &TopologyLink) -> ManagedResource {
    // the loader guarantees both endpoints resolve
    let kind_of = |name: &str| {
        topology
            .node(name)
            .map(|n| n.kind.clone())
            .unwrap_or(NodeKind::Linux)
    };
    let (a_kind, z_kind) = (kind_of(&link.a.node), kind_of(&link.z.node));
    let is_host = |k: &NodeKind| matches!(k, NodeKind::Linux | NodeKind::Other(_));
    let role = if is_host(&a_kind) || is_host(&z_kind) {
        LINK_ROLE_EDGE
    } else {
        LINK_ROLE_INTER_SWITCH
    };

    ManagedResource {
        id: ResourceId::new(ResourceKind::Link, topology.link_resource_name(link)),
        labels: topology_labels(safe),
        spec: ResourceSpec::Link(LinkSpec {
            topology: safe.to_string(),
            role: role.to_string(),
            local: LinkEndpointSpec {
                node: topology.node_resource_name(&link.a.node),
                interface: a_kind.interface_name(&link.a.interface),
            },
            remote: LinkEndpointSpec {
                node: topology.node_resource_name(&link.z.node),
                interface: z_kind.interface_name(&link.z.interface),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_topology_str;
    use std::collections::HashSet;

    /// 2 spines, 4 leaves, each leaf dual-homed to each spine twice
    pub(crate) fn leaf_spine_yaml() -> String {
        let mut yaml = String::from(
            "name: dc1\nmgmt:\n  ipv4-subnet: 172.20.20.0/24\ntopology:\n  kinds:\n    nokia_srlinux:\n      image: ghcr.io/nokia/srlinux:24.10.1\n  nodes:\n",
        );
        for (i, name) in ["spine1", "spine2", "leaf1", "leaf2", "leaf3", "leaf4"]
            .iter()
            .enumerate()
        {
            yaml.push_str(&format!(
                "    {name}:\n      kind: nokia_srlinux\n      mgmt-ipv4: 172.20.20.{}\n",
                i + 2
            ));
        }
        yaml.push_str("  links:\n");
        for spine in 1..=2 {
            for leaf in 1..=4 {
                for lane in 0..2 {
                    let spine_port = (leaf - 1) * 2 + lane + 1;
                    let leaf_port = 49 + (spine - 1) * 2 + lane;
                    yaml.push_str(&format!(
                        "    - endpoints: [\"spine{spine}:e1-{spine_port}\", \"leaf{leaf}:e1-{leaf_port}\"]\n"
                    ));
                }
            }
        }
        yaml
    }

    #[test]
    fn test_leaf_spine_counts_and_names() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let resources = map_topology(&topology);

        let nodes: Vec<_> = resources
            .iter()
            .filter(|r| r.kind() == ResourceKind::Node)
            .collect();
        let links: Vec<_> = resources
            .iter()
            .filter(|r| r.kind() == ResourceKind::Link)
            .collect();
        assert_eq!(nodes.len(), 6);
        assert_eq!(links.len(), 16);
        assert_eq!(nodes[0].name(), "dc1-spine1");
        assert_eq!(nodes[5].name(), "dc1-leaf4");
        assert_eq!(links[0].name(), "dc1-spine1-e1-1-leaf1-e1-49");

        let names: HashSet<_> = resources.iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), 22);

        // nodes strictly before links
        let first_link = resources
            .iter()
            .position(|r| r.kind() == ResourceKind::Link)
            .unwrap();
        assert!(resources[..first_link]
            .iter()
            .all(|r| r.kind() == ResourceKind::Node));
    }

    #[test]
    fn test_mapping_is_byte_identical() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let first = map_topology(&topology);
        let second = map_topology(&topology.clone());

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        }

        let reloaded = load_topology_str(&leaf_spine_yaml()).unwrap();
        let third = map_topology(&reloaded);
        assert_eq!(
            first.iter().map(|r| r.canonical_bytes()).collect::<Vec<_>>(),
            third.iter().map(|r| r.canonical_bytes()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_node_spec_fields() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let resources = map_topology(&topology);
        let ResourceSpec::Node(spine) = &resources[0].spec else {
            panic!("expected a node spec");
        };

        assert_eq!(spine.kind, "srl");
        assert_eq!(spine.node_type.as_deref(), Some("ixrd3l"));
        assert_eq!(spine.platform, "7220 IXR-D3L");
        assert_eq!(spine.version.as_deref(), Some("24.10.1"));
        assert_eq!(spine.role, NodeRole::Spine);
        assert_eq!(spine.mgmt_address, "172.20.20.2");
        assert_eq!(spine.node_profile.as_deref(), Some("dc1-srl-24.10.1"));
        assert_eq!(spine.interfaces.len(), 8);
        assert!(spine.interfaces.contains(&"ethernet-1-1".to_string()));
        let mut sorted = spine.interfaces.clone();
        sorted.sort();
        assert_eq!(sorted, spine.interfaces);

        assert_eq!(
            resources[0].labels.get(SELECTOR_LABEL).map(String::as_str),
            Some("managedSrl")
        );
        assert_eq!(
            resources[0].labels.get(TOPOLOGY_LABEL).map(String::as_str),
            Some("dc1")
        );
    }

    #[test]
    fn test_link_spec_references_node_resources() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let resources = map_topology(&topology);
        let node_names: HashSet<_> = resources
            .iter()
            .filter(|r| r.kind() == ResourceKind::Node)
            .map(|r| r.name().to_string())
            .collect();

        for link in resources.iter().filter(|r| r.kind() == ResourceKind::Link) {
            for dep in link.dependencies() {
                assert_eq!(dep.kind, ResourceKind::Node);
                assert!(node_names.contains(&dep.name), "{dep} is not a node resource");
            }
            let ResourceSpec::Link(spec) = &link.spec else {
                panic!("expected a link spec");
            };
            assert_eq!(spec.role, LINK_ROLE_INTER_SWITCH);
            assert!(spec.local.interface.starts_with("ethernet-1-"));
        }
    }

    #[test]
    fn test_edge_link_to_host() {
        let topology = load_topology_str(
            r#"
name: lab
topology:
  nodes:
    leaf1: {kind: arista_ceos, mgmt-ipv4: 10.0.0.1}
    client1: {kind: linux, mgmt-ipv4: 10.0.0.2}
  links:
    - endpoints: ["leaf1:eth3", "client1:eth1"]
"#,
        )
        .unwrap();
        let resources = map_topology(&topology);
        let ResourceSpec::Link(link) = &resources[2].spec else {
            panic!("expected a link spec");
        };
        assert_eq!(link.role, LINK_ROLE_EDGE);
        assert_eq!(link.local.interface, "ethernet-3-1");
        assert_eq!(link.remote.interface, "eth1");
        assert_eq!(link.remote.node, "lab-client1");
    }

    #[test]
    fn test_fabric_resource() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let fabric = fabric_resource(&topology, "clab-dc1");
        assert_eq!(fabric.id, ResourceId::new(ResourceKind::Fabric, "clab-dc1"));
        let ResourceSpec::Fabric(spec) = &fabric.spec else {
            panic!("expected a fabric spec");
        };
        assert_eq!(spec.mgmt_subnet.as_deref(), Some("172.20.20.0/24"));
        assert_eq!(spec.description, "Containerlab dc1");
    }

    #[test]
    fn test_spec_wire_form_is_camel_case() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let value = map_topology(&topology)[0].spec_value();
        assert_eq!(value["mgmtAddress"], "172.20.20.2");
        assert_eq!(value["nodeProfile"], "dc1-srl-24.10.1");
        assert!(value.get("mgmt_address").is_none());
    }

    #[test]
    fn test_every_dependency_is_mapped_before_its_dependent() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let resources = desired_resources(&topology);
        let position = |id: &ResourceId| resources.iter().position(|r| &r.id == id);

        for (i, resource) in resources.iter().enumerate() {
            for dep in resource.dependencies() {
                let Some(at) = position(&dep) else {
                    panic!("{} references {} which is not mapped", resource.id, dep);
                };
                assert!(at < i, "{} is mapped after {}", dep, resource.id);
            }
        }
    }

    #[test]
    fn test_shared_resources_for_leaf_spine() {
        let topology = load_topology_str(&leaf_spine_yaml()).unwrap();
        let shared = shared_resources(&topology);
        let ids: Vec<String> = shared.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "init/init-base",
                "security-profile/managed-tls",
                "user-group/sudo",
                "user/admin-srl",
                "profile/dc1-srl-24.10.1",
            ]
        );
        assert!(shared.iter().all(|r| r.kind().is_shared()));

        let ResourceSpec::Profile(profile) = &shared[4].spec else {
            panic!("expected a profile spec");
        };
        assert_eq!(profile.operating_system, "srl");
        assert_eq!(profile.version, "24.10.1");
        assert_eq!(profile.version_match, "v24\\.10\\.1.*");
        assert_eq!(profile.node_user, "admin-srl");
        assert_eq!(profile.onboarding_password.as_deref(), Some("NokiaSrl1!"));

        let ResourceSpec::User(user) = &shared[3].spec else {
            panic!("expected a user spec");
        };
        assert_eq!(user.group_bindings[0].node_selector, vec!["containerlab=managedSrl"]);
    }

    #[test]
    fn test_shared_resources_per_kind_and_version() {
        let topology = load_topology_str(
            r#"
name: lab
topology:
  nodes:
    leaf1: {kind: nokia_srlinux, image: "ghcr.io/nokia/srlinux:24.10.1", mgmt-ipv4: 10.0.0.1}
    leaf2: {kind: nokia_srlinux, image: "ghcr.io/nokia/srlinux:25.3.1", mgmt-ipv4: 10.0.0.2}
    leaf3: {kind: nokia_srlinux, image: "ghcr.io/nokia/srlinux:24.10.1", mgmt-ipv4: 10.0.0.3}
    spine1: {kind: arista_ceos, image: "ceos:4.33.1F", mgmt-ipv4: 10.0.0.4}
    client1: {kind: linux, mgmt-ipv4: 10.0.0.5}
"#,
        )
        .unwrap();
        let shared = shared_resources(&topology);
        let count = |kind| shared.iter().filter(|r| r.kind() == kind).count();
        assert_eq!(count(ResourceKind::User), 2);
        assert_eq!(count(ResourceKind::Profile), 3);

        let nodes = map_topology(&topology);
        let ResourceSpec::Node(client) = &nodes[4].spec else {
            panic!("expected a node spec");
        };
        assert_eq!(client.node_profile, None);
        assert!(nodes[4].dependencies().is_empty());
    }

    #[test]
    fn test_hosts_only_topology_has_no_shared_resources() {
        let topology = load_topology_str(
            "name: lab\ntopology:\n  nodes:\n    h1: {kind: linux, mgmt-ipv4: 10.0.0.1}\n",
        )
        .unwrap();
        assert!(shared_resources(&topology).is_empty());
        assert_eq!(desired_resources(&topology).len(), 1);
    }
}
