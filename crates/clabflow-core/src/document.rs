//! Raw containerlab topology document
//!
//! These types mirror the YAML file one-to-one. Fields the engine does not
//! consume land in `extra` maps and are ignored explicitly; nothing here is
//! trusted until the loader validates it.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;

pub type ExtraFields = BTreeMap<String, serde_yaml::Value>;

/// Top level of a `*.clab.yml` file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologyDocument {
    pub name: String,
    #[serde(default)]
    pub mgmt: Option<MgmtSection>,
    #[serde(default)]
    pub topology: TopologySection,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// `mgmt:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MgmtSection {
    #[serde(default, rename = "ipv4-subnet")]
    pub ipv4_subnet: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// `topology:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopologySection {
    #[serde(default)]
    pub defaults: Option<NodeDefaults>,
    #[serde(default)]
    pub kinds: BTreeMap<String, NodeDefaults>,
    /// Node entries in file order, duplicates preserved
    #[serde(default, deserialize_with = "node_entries")]
    pub nodes: Vec<(String, RawNode)>,
    #[serde(default)]
    pub links: Vec<RawLink>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Values inherited by nodes from `topology.defaults` / `topology.kinds.<kind>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDefaults {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, rename = "startup-config")]
    pub startup_config: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One entry under `topology.nodes`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNode {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, rename = "mgmt-ipv4")]
    pub mgmt_ipv4: Option<String>,
    #[serde(default, rename = "startup-config")]
    pub startup_config: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// One entry under `topology.links`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLink {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Read a mapping as an ordered list of entries.
///
/// A plain map type would silently keep only the last of two equal keys;
/// keeping every entry lets validation report the duplicate.
fn node_entries<'de, D>(deserializer: D) -> Result<Vec<(String, RawNode)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, RawNode)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping of node name to node definition")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, node)) = map.next_entry::<String, Option<RawNode>>()? {
                entries.push((name, node.unwrap_or_default()));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(EntriesVisitor)
}

impl TopologyDocument {
    /// Parse a YAML (or JSON) document
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Names of every top-level field that is ignored
    pub fn ignored_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.extra.keys().cloned().collect();
        if let Some(mgmt) = &self.mgmt {
            fields.extend(mgmt.extra.keys().map(|k| format!("mgmt.{}", k)));
        }
        fields.extend(
            self.topology
                .extra
                .keys()
                .map(|k| format!("topology.{}", k)),
        );
        fields
    }
}
