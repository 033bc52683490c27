//! Control-plane resource specifications

use super::kind::NodeRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carrying the owning topology on every managed resource
pub const TOPOLOGY_LABEL: &str = "clabflow.io/topology";

/// Label used by node users/profiles to select devices of one kind
pub const SELECTOR_LABEL: &str = "containerlab";

pub const API_GROUP: &str = "core.eda.nokia.com";
pub const API_VERSION: &str = "v1";
const BOOTSTRAP_API: &str = "bootstrap.eda.nokia.com/v1alpha1";
const AAA_API: &str = "aaa.eda.nokia.com/v1alpha1";

/// Kind of managed resource
///
/// The derived ordering is the apply order: fabric, then the shared
/// resources nodes rely on, then nodes, then links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Fabric,
    Init,
    SecurityProfile,
    UserGroup,
    User,
    Profile,
    Node,
    Link,
}

impl ResourceKind {
    /// Every kind kept inside the topology namespace, in apply order
    pub const NAMESPACED: [ResourceKind; 7] = [
        ResourceKind::Init,
        ResourceKind::SecurityProfile,
        ResourceKind::UserGroup,
        ResourceKind::User,
        ResourceKind::Profile,
        ResourceKind::Node,
        ResourceKind::Link,
    ];

    /// Topology-wide resources applied once before any node
    pub fn is_shared(&self) -> bool {
        matches!(
            self,
            ResourceKind::Init
                | ResourceKind::SecurityProfile
                | ResourceKind::UserGroup
                | ResourceKind::User
                | ResourceKind::Profile
        )
    }

    /// Resource kind name in the control-plane schema
    pub fn api_kind(&self) -> &'static str {
        match self {
            ResourceKind::Fabric => "Namespace",
            ResourceKind::Init => "Init",
            ResourceKind::SecurityProfile => "NodeSecurityProfile",
            ResourceKind::UserGroup => "NodeGroup",
            ResourceKind::User => "NodeUser",
            ResourceKind::Profile => "NodeProfile",
            ResourceKind::Node => "TopoNode",
            ResourceKind::Link => "TopoLink",
        }
    }

    /// Plural path segment in the control-plane REST API
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Fabric => "namespaces",
            ResourceKind::Init => "inits",
            ResourceKind::SecurityProfile => "nodesecurityprofiles",
            ResourceKind::UserGroup => "nodegroups",
            ResourceKind::User => "nodeusers",
            ResourceKind::Profile => "nodeprofiles",
            ResourceKind::Node => "toponodes",
            ResourceKind::Link => "topolinks",
        }
    }

    pub fn api_version(&self) -> String {
        match self {
            ResourceKind::Fabric => "v1".to_string(),
            ResourceKind::Init => BOOTSTRAP_API.to_string(),
            ResourceKind::UserGroup => AAA_API.to_string(),
            _ => format!("{}/{}", API_GROUP, API_VERSION),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Fabric => "fabric",
            ResourceKind::Init => "init",
            ResourceKind::SecurityProfile => "security-profile",
            ResourceKind::UserGroup => "user-group",
            ResourceKind::User => "user",
            ResourceKind::Profile => "profile",
            ResourceKind::Node => "node",
            ResourceKind::Link => "link",
        };
        write!(f, "{}", name)
    }
}

/// Identity of a resource: `(kind, name)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Spec of the fabric-level resource (the topology namespace)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricSpec {
    pub topology: String,
    pub mgmt_subnet: Option<String>,
    pub description: String,
}

/// Spec of a node resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub topology: String,
    pub node: String,
    /// Operating-system label
    pub kind: String,
    pub node_type: Option<String>,
    pub platform: String,
    pub version: Option<String>,
    pub role: NodeRole,
    pub mgmt_address: String,
    pub startup_config: Option<String>,
    /// `None` for hosts the control plane does not manage
    pub node_profile: Option<String>,
    /// Sorted, kind-translated interface names
    pub interfaces: Vec<String>,
}

/// One side of a link resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEndpointSpec {
    /// Node resource name
    pub node: String,
    pub interface: String,
}

/// Spec of a link resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSpec {
    pub topology: String,
    pub role: String,
    pub local: LinkEndpointSpec,
    pub remote: LinkEndpointSpec,
}

impl LinkSpec {
    /// Node resource names this link depends on
    pub fn node_refs(&self) -> [&str; 2] {
        [&self.local.node, &self.remote.node]
    }
}

/// Spec of the namespace bootstrap resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSpec {
    pub commit_save: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    pub issuer_ref: String,
}

/// Which nodes get certificates from which issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityProfileSpec {
    pub node_selector: Vec<String>,
    pub tls: TlsSpec,
}

/// Permissions of a node user group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroupSpec {
    pub services: Vec<String>,
    pub superuser: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBinding {
    pub groups: Vec<String>,
    pub node_selector: Vec<String>,
}

/// Account provisioned on every node matching the bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub username: String,
    pub password: Option<String>,
    pub ssh_public_keys: Vec<String>,
    pub group_bindings: Vec<GroupBinding>,
}

/// How the control plane onboards nodes of one OS and version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    pub operating_system: String,
    pub version: String,
    pub version_path: String,
    pub version_match: String,
    pub port: u16,
    /// `User` resource name
    pub node_user: String,
    pub onboarding_username: String,
    pub onboarding_password: Option<String>,
    pub annotate: bool,
}

/// Typed spec payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResourceSpec {
    Fabric(FabricSpec),
    Init(InitSpec),
    SecurityProfile(SecurityProfileSpec),
    UserGroup(UserGroupSpec),
    User(UserSpec),
    Profile(ProfileSpec),
    Node(NodeSpec),
    Link(LinkSpec),
}

/// A resource the engine wants to exist in the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedResource {
    pub id: ResourceId,
    pub labels: BTreeMap<String, String>,
    pub spec: ResourceSpec,
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Spec as a JSON value, the form compared against observed state
    pub fn spec_value(&self) -> serde_json::Value {
        // plain data; serialization cannot fail
        serde_json::to_value(&self.spec).unwrap_or_default()
    }

    /// Canonical byte encoding of the spec
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.spec).unwrap_or_default()
    }

    /// Resources that must exist before this one
    pub fn dependencies(&self) -> Vec<ResourceId> {
        match &self.spec {
            ResourceSpec::Link(link) => link
                .node_refs()
                .into_iter()
                .map(|node| ResourceId::new(ResourceKind::Node, node))
                .collect(),
            ResourceSpec::Node(node) => node
                .node_profile
                .iter()
                .map(|profile| ResourceId::new(ResourceKind::Profile, profile))
                .collect(),
            ResourceSpec::Profile(profile) => {
                vec![ResourceId::new(ResourceKind::User, &profile.node_user)]
            }
            ResourceSpec::User(user) => user
                .group_bindings
                .iter()
                .flat_map(|b| &b.groups)
                .map(|group| ResourceId::new(ResourceKind::UserGroup, group))
                .collect(),
            _ => Vec::new(),
        }
    }
}
