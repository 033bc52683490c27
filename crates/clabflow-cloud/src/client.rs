//! Control-plane client abstraction

use crate::error::ApplyError;
use async_trait::async_trait;
use clabflow_core::{ManagedResource, ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimistic-concurrency token issued by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrencyToken(pub String);

impl std::fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resource as the control plane currently holds it
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedResource {
    pub id: ResourceId,
    pub labels: BTreeMap<String, String>,
    pub spec: serde_json::Value,
    /// Status the control plane reports; `Null` until it has one
    pub status: serde_json::Value,
    pub token: ConcurrencyToken,
}

/// Result of a successful delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Control-plane CRUD with typed outcomes.
///
/// Implementations never retry on their own; retry policy belongs to the
/// caller.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Name of the control plane (for logs and reports)
    fn name(&self) -> &str;

    /// Make sure the topology namespace exists. Returns `true` when it was
    /// created by this call.
    async fn ensure_namespace(&self, namespace: &str, description: &str)
    -> Result<bool, ApplyError>;

    async fn delete_namespace(&self, namespace: &str) -> Result<DeleteOutcome, ApplyError>;

    /// `Found(spec, token)` is `Some`, `NotFound` is `None`
    async fn get(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<ObservedResource>, ApplyError>;

    /// Resources of `kind` labelled as belonging to `topology`
    async fn list(
        &self,
        namespace: &str,
        kind: ResourceKind,
        topology: &str,
    ) -> Result<Vec<ObservedResource>, ApplyError>;

    async fn create(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ConcurrencyToken, ApplyError>;

    /// Replace the spec of an existing resource, presenting the token the
    /// caller last observed
    async fn update(
        &self,
        namespace: &str,
        resource: &ManagedResource,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, ApplyError>;

    async fn delete(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<DeleteOutcome, ApplyError>;
}

/// Whether an observed spec already satisfies a desired one.
///
/// Every field set in `desired` must be present and equal in `observed`;
/// extra fields the control plane adds (defaults, status) are ignored.
/// A desired `null` matches a missing field.
pub fn spec_matches(desired: &serde_json::Value, observed: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| {
            match have.get(key) {
                Some(actual) => spec_matches(value, actual),
                None => value.is_null(),
            }
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| spec_matches(w, h))
        }
        (want, have) => want == have,
    }
}
