//! `ClusterClient` over the EDA REST API
//!
//! Resources live under `apps/{group}/{version}/namespaces/{ns}/{plural}/{name}`
//! (`core.eda.nokia.com/v1` for nodes, links, profiles and users, the
//! bootstrap and aaa groups for inits and user groups), the topology
//! namespace under `api/v1/namespaces/{ns}`. The concurrency token is
//! `metadata.resourceVersion`.

use crate::client::EdaClient;
use crate::error::EdaError;
use async_trait::async_trait;
use clabflow_cloud::{ApplyError, ClusterClient, ConcurrencyToken, DeleteOutcome, ObservedResource};
use clabflow_core::{ManagedResource, ResourceId, ResourceKind, TOPOLOGY_LABEL};
use reqwest::Method;
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub(crate) fn namespace_path(namespace: &str) -> String {
    format!("api/v1/namespaces/{}", namespace)
}

pub(crate) fn collection_path(namespace: &str, kind: ResourceKind) -> String {
    format!(
        "apps/{}/namespaces/{}/{}",
        kind.api_version(),
        namespace,
        kind.plural()
    )
}

pub(crate) fn resource_path(namespace: &str, kind: ResourceKind, name: &str) -> String {
    format!("{}/{}", collection_path(namespace, kind), name)
}

/// Request body for create/update
pub(crate) fn to_object(
    resource: &ManagedResource,
    namespace: &str,
    token: Option<&ConcurrencyToken>,
) -> Value {
    let mut metadata = json!({
        "name": resource.name(),
        "namespace": namespace,
        "labels": resource.labels,
    });
    if let Some(token) = token {
        metadata["resourceVersion"] = Value::String(token.0.clone());
    }
    json!({
        "apiVersion": resource.kind().api_version(),
        "kind": resource.kind().api_kind(),
        "metadata": metadata,
        "spec": resource.spec_value(),
    })
}

pub(crate) fn resource_version(object: &Value) -> Result<ConcurrencyToken, EdaError> {
    object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(|v| ConcurrencyToken(v.to_string()))
        .ok_or_else(|| EdaError::UnexpectedResponse("missing metadata.resourceVersion".into()))
}

pub(crate) fn from_object(kind: ResourceKind, object: &Value) -> Result<ObservedResource, EdaError> {
    let name = object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| EdaError::UnexpectedResponse("missing metadata.name".into()))?;
    let labels: BTreeMap<String, String> = match object.pointer("/metadata/labels") {
        Some(labels) if !labels.is_null() => serde_json::from_value(labels.clone())?,
        _ => BTreeMap::new(),
    };
    Ok(ObservedResource {
        id: ResourceId::new(kind, name),
        labels,
        spec: object.get("spec").cloned().unwrap_or(Value::Null),
        status: object.get("status").cloned().unwrap_or(Value::Null),
        token: resource_version(object)?,
    })
}

#[async_trait]
impl ClusterClient for EdaClient {
    fn name(&self) -> &str {
        "eda"
    }

    async fn ensure_namespace(&self, namespace: &str, description: &str) -> Result<bool, ApplyError> {
        let path = namespace_path(namespace);
        if self.request(Method::GET, &path, None).await?.is_some() {
            return Ok(false);
        }

        let body = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": namespace,
                "annotations": {"description": description},
            },
        });
        match self.request(Method::POST, "api/v1/namespaces", Some(&body)).await {
            Ok(_) => {
                tracing::info!(namespace, "Created namespace");
                Ok(true)
            }
            // created concurrently
            Err(EdaError::Api { status: 409, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<DeleteOutcome, ApplyError> {
        let reply = self
            .request(Method::DELETE, &namespace_path(namespace), None)
            .await?;
        Ok(match reply {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn get(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<ObservedResource>, ApplyError> {
        let reply = self
            .request(Method::GET, &resource_path(namespace, kind, name), None)
            .await?;
        match reply {
            Some(object) => Ok(Some(from_object(kind, &object)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        namespace: &str,
        kind: ResourceKind,
        topology: &str,
    ) -> Result<Vec<ObservedResource>, ApplyError> {
        let path = format!(
            "{}?labelSelector={}%3D{}",
            collection_path(namespace, kind),
            TOPOLOGY_LABEL,
            topology
        );
        let Some(body) = self.request(Method::GET, &path, None).await? else {
            // namespace does not exist
            return Ok(Vec::new());
        };
        let items = body.get("items").and_then(Value::as_array);
        let mut observed = Vec::new();
        for item in items.into_iter().flatten() {
            observed.push(from_object(kind, item)?);
        }
        Ok(observed)
    }

    async fn create(&self, namespace: &str, resource: &ManagedResource) -> Result<ConcurrencyToken, ApplyError> {
        let body = to_object(resource, namespace, None);
        let reply = self
            .request(Method::POST, &collection_path(namespace, resource.kind()), Some(&body))
            .await?
            .ok_or_else(|| ApplyError::Fatal(format!("namespace {} does not exist", namespace)))?;
        Ok(resource_version(&reply)?)
    }

    async fn update(
        &self,
        namespace: &str,
        resource: &ManagedResource,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, ApplyError> {
        let body = to_object(resource, namespace, Some(token));
        let path = resource_path(namespace, resource.kind(), resource.name());
        match self.request(Method::PUT, &path, Some(&body)).await {
            Ok(Some(reply)) => Ok(resource_version(&reply)?),
            // deleted since it was read
            Ok(None) => Err(ApplyError::Conflict {
                stale_token: Some(token.clone()),
            }),
            Err(EdaError::Api { status: 409, .. }) => Err(ApplyError::Conflict {
                stale_token: Some(token.clone()),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<DeleteOutcome, ApplyError> {
        let reply = self
            .request(Method::DELETE, &resource_path(namespace, kind, name), None)
            .await?;
        Ok(match reply {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}
