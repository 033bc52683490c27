//! Node kinds
//!
//! Kind-specific behaviour (interface naming, platform labels, default
//! credentials) is kept here so that the mapper and the bootstrapper agree.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SRL_SHORT_INTERFACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^e(\d+)-(\d+)$").expect("valid regex"));
static EOS_ETHERNET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ethernet-(\d+)-(\d+)$").expect("valid regex"));
static EOS_BREAKOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:eth|et)(\d+)_(\d+)$").expect("valid regex"));
static EOS_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:eth|et)(\d+)$").expect("valid regex"));

/// Containerlab node kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Nokia SR Linux (`nokia_srlinux`, `srl`)
    SrLinux,
    /// Arista cEOS (`arista_ceos`, `ceos`)
    Ceos,
    /// Nokia SR OS (`nokia_sros`, `vr-sros`)
    Sros,
    /// Plain Linux container
    Linux,
    /// Any other kind, kept verbatim
    Other(String),
}

impl NodeKind {
    /// Parse a containerlab kind string
    pub fn parse(kind: &str) -> Self {
        match kind.to_lowercase().as_str() {
            "nokia_srlinux" | "srl" => NodeKind::SrLinux,
            "arista_ceos" | "ceos" => NodeKind::Ceos,
            "nokia_sros" | "vr-sros" | "vr-nokia_sros" => NodeKind::Sros,
            "linux" => NodeKind::Linux,
            _ => NodeKind::Other(kind.to_string()),
        }
    }

    /// Containerlab name of the kind
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::SrLinux => "nokia_srlinux",
            NodeKind::Ceos => "arista_ceos",
            NodeKind::Sros => "nokia_sros",
            NodeKind::Linux => "linux",
            NodeKind::Other(kind) => kind,
        }
    }

    /// Operating-system label used in control-plane specs
    pub fn operating_system(&self) -> &str {
        match self {
            NodeKind::SrLinux => "srl",
            NodeKind::Ceos => "eos",
            NodeKind::Sros => "sros",
            NodeKind::Linux => "linux",
            NodeKind::Other(kind) => kind,
        }
    }

    /// Type used when the topology does not set one
    pub fn default_type(&self) -> Option<&'static str> {
        match self {
            NodeKind::SrLinux => Some("ixrd3l"),
            NodeKind::Ceos => Some("ceos"),
            NodeKind::Sros => Some("sr-1"),
            NodeKind::Linux | NodeKind::Other(_) => None,
        }
    }

    /// Hardware platform label for a node type
    pub fn platform(&self, node_type: Option<&str>) -> String {
        match self {
            // ixrd2 => 7220 IXR-D2
            NodeKind::SrLinux => {
                let t = node_type.or(self.default_type()).unwrap_or_default();
                format!("7220 IXR-{}", t.trim_start_matches("ixr").to_uppercase())
            }
            NodeKind::Ceos => "EOS".to_string(),
            NodeKind::Sros => format!(
                "7750 {}",
                node_type.or(self.default_type()).unwrap_or_default().to_uppercase()
            ),
            NodeKind::Linux | NodeKind::Other(_) => {
                node_type.unwrap_or("unknown").to_string()
            }
        }
    }

    /// Translate a containerlab interface name to the name the device uses
    pub fn interface_name(&self, ifname: &str) -> String {
        match self {
            NodeKind::SrLinux => SRL_SHORT_INTERFACE
                .captures(ifname)
                .map(|c| format!("ethernet-{}-{}", &c[1], &c[2]))
                .unwrap_or_else(|| ifname.to_string()),
            NodeKind::Ceos => {
                if let Some(c) = EOS_ETHERNET.captures(ifname) {
                    return format!("ethernet-{}-{}", &c[1], &c[2]);
                }
                if let Some(c) = EOS_BREAKOUT.captures(ifname) {
                    return format!("ethernet-{}-{}", &c[1], &c[2]);
                }
                if let Some(c) = EOS_SHORT.captures(ifname) {
                    // default breakout lane
                    return format!("ethernet-{}-1", &c[1]);
                }
                ifname.to_string()
            }
            NodeKind::Sros | NodeKind::Linux | NodeKind::Other(_) => ifname.to_string(),
        }
    }

    /// Value of the `containerlab` selector label
    pub fn managed_label(&self) -> String {
        let os = self.operating_system();
        let mut chars = os.chars();
        match chars.next() {
            Some(first) => format!("managed{}{}", first.to_uppercase(), chars.as_str()),
            None => "managed".to_string(),
        }
    }

    /// Whether the control plane onboards this kind
    pub fn is_managed(&self) -> bool {
        matches!(self, NodeKind::SrLinux | NodeKind::Ceos | NodeKind::Sros)
    }

    /// gNMI port the control plane connects to
    pub fn gnmi_port(&self) -> u16 {
        match self {
            NodeKind::SrLinux => 57410,
            NodeKind::Ceos => 50051,
            _ => 57400,
        }
    }

    /// State path the control plane reads the software version from
    pub fn version_path(&self) -> &'static str {
        match self {
            NodeKind::SrLinux => ".system.information.version",
            NodeKind::Sros => ".state.system.version.version-number",
            _ => "",
        }
    }

    /// Factory login for a freshly deployed node: `(username, password)`.
    ///
    /// `None` password means key-based login only.
    pub fn default_login(&self) -> (&'static str, Option<&'static str>) {
        match self {
            NodeKind::SrLinux => ("admin", Some("NokiaSrl1!")),
            NodeKind::Ceos | NodeKind::Sros => ("admin", Some("admin")),
            NodeKind::Linux | NodeKind::Other(_) => ("root", None),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of a node in the fabric, inferred from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Leaf,
    Spine,
    Borderleaf,
    Dcgw,
}

impl NodeRole {
    pub fn infer(node_name: &str) -> Self {
        let name = node_name.to_lowercase();
        if name.contains("spine") {
            NodeRole::Spine
        } else if name.contains("borderleaf") || name.starts_with("bl") {
            NodeRole::Borderleaf
        } else if name.contains("dcgw") {
            NodeRole::Dcgw
        } else {
            NodeRole::Leaf
        }
    }
}
