//! In-memory control plane for tests
//!
//! Behaves like a strict API server: tokens increase on every write, an
//! update with a stale token conflicts, and creating an existing object
//! conflicts. Faults can be injected per resource.

use crate::client::{ClusterClient, ConcurrencyToken, DeleteOutcome, ObservedResource};
use crate::error::ApplyError;
use async_trait::async_trait;
use clabflow_core::{ManagedResource, ResourceId, ResourceKind, TOPOLOGY_LABEL};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// One recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureNamespace(String),
    DeleteNamespace(String),
    Get(ResourceId),
    List(ResourceKind),
    Create(ResourceId),
    Update(ResourceId),
    Delete(ResourceId),
}

impl Call {
    /// Whether the call changes control-plane state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Get(_) | Call::List(_))
    }

    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Call::Get(id) | Call::Create(id) | Call::Update(id) | Call::Delete(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    labels: BTreeMap<String, String>,
    spec: serde_json::Value,
    status: serde_json::Value,
    token: u64,
}

#[derive(Debug, Default)]
struct Inner {
    namespaces: BTreeMap<String, String>,
    objects: BTreeMap<(String, ResourceId), StoredObject>,
    next_token: u64,
    calls: Vec<Call>,
    faults: HashMap<ResourceId, VecDeque<ApplyError>>,
    always_transient: HashSet<ResourceId>,
    fatal_after: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
    /// Successful resource mutations (create/update/delete)
    applied: usize,
}

impl Inner {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Fault to return for a call on `id`, if any
    fn fault(&mut self, id: &ResourceId, mutation: bool) -> Option<ApplyError> {
        if self.always_transient.contains(id) {
            return Some(ApplyError::Transient(format!("{} unavailable", id)));
        }
        if !mutation {
            return None;
        }
        if let Some(limit) = self.fatal_after {
            if self.applied >= limit {
                return Some(ApplyError::Fatal("forbidden".to_string()));
            }
        }
        self.faults.get_mut(id).and_then(VecDeque::pop_front)
    }

    fn record_applied(&mut self) {
        self.applied += 1;
        if let Some((limit, token)) = &self.cancel_after {
            if self.applied >= *limit {
                token.cancel();
            }
        }
    }

    fn observed(&self, namespace: &str, id: &ResourceId) -> Option<ObservedResource> {
        self.objects
            .get(&(namespace.to_string(), id.clone()))
            .map(|o| ObservedResource {
                id: id.clone(),
                labels: o.labels.clone(),
                spec: o.spec.clone(),
                status: o.status.clone(),
                token: ConcurrencyToken(o.token.to_string()),
            })
    }
}

/// In-memory [`ClusterClient`]
#[derive(Debug, Default)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a resource directly, bypassing faults and the call log
    pub fn seed(&self, namespace: &str, resource: &ManagedResource) {
        let mut inner = self.lock();
        inner
            .namespaces
            .entry(namespace.to_string())
            .or_default();
        let token = inner.token();
        inner.objects.insert(
            (namespace.to_string(), resource.id.clone()),
            StoredObject {
                labels: resource.labels.clone(),
                spec: resource.spec_value(),
                status: serde_json::Value::Null,
                token,
            },
        );
    }

    /// Overwrite a stored spec as another writer would (bumps the token)
    pub fn tamper(&self, namespace: &str, id: &ResourceId, spec: serde_json::Value) {
        let mut inner = self.lock();
        let token = inner.token();
        if let Some(object) = inner.objects.get_mut(&(namespace.to_string(), id.clone())) {
            object.spec = spec;
            object.token = token;
        }
    }

    /// Report a status for a stored object, as the controller would.
    /// Status writes do not bump the token.
    pub fn set_status(&self, namespace: &str, id: &ResourceId, status: serde_json::Value) {
        let mut inner = self.lock();
        if let Some(object) = inner.objects.get_mut(&(namespace.to_string(), id.clone())) {
            object.status = status;
        }
    }

    /// Queue an error for the next mutating call on `id`
    pub fn fail_next(&self, id: ResourceId, error: ApplyError) {
        self.lock().faults.entry(id).or_default().push_back(error);
    }

    /// Every call on `id`, reads included, fails transiently
    pub fn always_transient(&self, id: ResourceId) {
        self.lock().always_transient.insert(id);
    }

    /// Mutations fail fatally once `n` have succeeded
    pub fn fatal_after(&self, n: usize) {
        self.lock().fatal_after = Some(n);
    }

    /// Cancel `token` as soon as `n` mutations have succeeded
    pub fn cancel_after(&self, n: usize, token: CancellationToken) {
        self.lock().cancel_after = Some((n, token));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn contains(&self, namespace: &str, id: &ResourceId) -> bool {
        self.lock()
            .objects
            .contains_key(&(namespace.to_string(), id.clone()))
    }

    pub fn spec_of(&self, namespace: &str, id: &ResourceId) -> Option<serde_json::Value> {
        self.lock().observed(namespace, id).map(|o| o.spec)
    }

    pub fn count(&self, namespace: &str, kind: ResourceKind) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|(ns, id)| ns == namespace && id.kind == kind)
            .count()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.lock().namespaces.contains_key(namespace)
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_namespace(
        &self,
        namespace: &str,
        description: &str,
    ) -> Result<bool, ApplyError> {
        let mut inner = self.lock();
        inner.calls.push(Call::EnsureNamespace(namespace.to_string()));
        let fabric = ResourceId::new(ResourceKind::Fabric, namespace);
        if let Some(error) = inner.fault(&fabric, true) {
            return Err(error);
        }
        if inner.namespaces.contains_key(namespace) {
            return Ok(false);
        }
        inner
            .namespaces
            .insert(namespace.to_string(), description.to_string());
        Ok(true)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<DeleteOutcome, ApplyError> {
        let mut inner = self.lock();
        inner.calls.push(Call::DeleteNamespace(namespace.to_string()));
        let fabric = ResourceId::new(ResourceKind::Fabric, namespace);
        if let Some(error) = inner.fault(&fabric, true) {
            return Err(error);
        }
        if inner.namespaces.remove(namespace).is_none() {
            return Ok(DeleteOutcome::NotFound);
        }
        inner.objects.retain(|(ns, _), _| ns != namespace);
        Ok(DeleteOutcome::Deleted)
    }

    async fn get(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<ObservedResource>, ApplyError> {
        let id = ResourceId::new(kind, name);
        let mut inner = self.lock();
        inner.calls.push(Call::Get(id.clone()));
        if let Some(error) = inner.fault(&id, false) {
            return Err(error);
        }
        Ok(inner.observed(namespace, &id))
    }

    async fn list(
        &self,
        namespace: &str,
        kind: ResourceKind,
        topology: &str,
    ) -> Result<Vec<ObservedResource>, ApplyError> {
        let mut inner = self.lock();
        inner.calls.push(Call::List(kind));
        let ids: Vec<ResourceId> = inner
            .objects
            .iter()
            .filter(|((ns, id), object)| {
                ns == namespace
                    && id.kind == kind
                    && object.labels.get(TOPOLOGY_LABEL).map(String::as_str) == Some(topology)
            })
            .map(|((_, id), _)| id.clone())
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| inner.observed(namespace, id))
            .collect())
    }

    async fn create(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ConcurrencyToken, ApplyError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Create(resource.id.clone()));
        if let Some(error) = inner.fault(&resource.id, true) {
            return Err(error);
        }
        if !inner.namespaces.contains_key(namespace) {
            return Err(ApplyError::Fatal(format!(
                "namespace {} does not exist",
                namespace
            )));
        }
        let key = (namespace.to_string(), resource.id.clone());
        if inner.objects.contains_key(&key) {
            return Err(ApplyError::Conflict { stale_token: None });
        }
        let token = inner.token();
        inner.objects.insert(
            key,
            StoredObject {
                labels: resource.labels.clone(),
                spec: resource.spec_value(),
                status: serde_json::Value::Null,
                token,
            },
        );
        inner.record_applied();
        Ok(ConcurrencyToken(token.to_string()))
    }

    async fn update(
        &self,
        namespace: &str,
        resource: &ManagedResource,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, ApplyError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Update(resource.id.clone()));
        if let Some(error) = inner.fault(&resource.id, true) {
            return Err(error);
        }
        let key = (namespace.to_string(), resource.id.clone());
        let current = match inner.objects.get(&key) {
            Some(object) => object.token,
            None => {
                return Err(ApplyError::Conflict {
                    stale_token: Some(token.clone()),
                });
            }
        };
        if current.to_string() != token.0 {
            return Err(ApplyError::Conflict {
                stale_token: Some(token.clone()),
            });
        }
        let next = inner.token();
        if let Some(object) = inner.objects.get_mut(&key) {
            object.labels = resource.labels.clone();
            object.spec = resource.spec_value();
            object.token = next;
        }
        inner.record_applied();
        Ok(ConcurrencyToken(next.to_string()))
    }

    async fn delete(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<DeleteOutcome, ApplyError> {
        let id = ResourceId::new(kind, name);
        let mut inner = self.lock();
        inner.calls.push(Call::Delete(id.clone()));
        if let Some(error) = inner.fault(&id, true) {
            return Err(error);
        }
        match inner.objects.remove(&(namespace.to_string(), id)) {
            Some(_) => {
                inner.record_applied();
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}
