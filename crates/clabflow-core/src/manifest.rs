//! Manifest rendering for `generate`

use crate::model::{ManagedResource, ResourceKind};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    api_version: String,
    kind: &'static str,
    metadata: Metadata<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spec: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Metadata<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    labels: &'a BTreeMap<String, String>,
}

/// Render resources as a multi-document YAML stream.
///
/// The fabric resource renders as the namespace itself; every other
/// resource is placed inside `namespace`.
pub fn render_manifests(
    resources: &[ManagedResource],
    namespace: &str,
) -> Result<String, serde_yaml::Error> {
    let mut out = String::new();
    for resource in resources {
        let fabric = resource.kind() == ResourceKind::Fabric;
        let manifest = Manifest {
            api_version: resource.kind().api_version(),
            kind: resource.kind().api_kind(),
            metadata: Metadata {
                name: resource.name(),
                namespace: (!fabric).then_some(namespace),
                labels: &resource.labels,
            },
            spec: (!fabric).then(|| resource.spec_value()),
        };
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&manifest)?);
    }
    Ok(out)
}
