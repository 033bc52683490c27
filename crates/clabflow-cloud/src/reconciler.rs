//! Desired-vs-observed reconciliation
//!
//! One run: observe every desired identity (and list for orphans), build a
//! [`Plan`], then apply it in dependency order: shared resources, nodes,
//! links. Deletes run the other way round. Transient errors are
//! retried per resource and end in `Failed` when exhausted; a conflict gets
//! one re-read; a fatal error aborts the run and leaves everything already
//! applied in place.

use crate::action::{Action, ActionType, Plan, PlanSummary};
use crate::client::{ClusterClient, ObservedResource, spec_matches};
use crate::context::{FabricState, SyncContext};
use crate::error::ApplyError;
use crate::retry::RetryError;
use clabflow_core::{ManagedResource, ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Terminal (or pending) status of one resource in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum ResourceStatus {
    Pending,
    Created,
    Updated,
    Unchanged,
    Deleted,
    Failed(String),
    /// Not attempted because the run was cancelled or aborted
    Skipped,
}

impl ResourceStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ResourceStatus::Failed(_))
    }

    /// The resource exists in the control plane with the desired spec
    pub fn is_present(&self) -> bool {
        matches!(
            self,
            ResourceStatus::Created | ResourceStatus::Updated | ResourceStatus::Unchanged
        )
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "pending"),
            ResourceStatus::Created => write!(f, "created"),
            ResourceStatus::Updated => write!(f, "updated"),
            ResourceStatus::Unchanged => write!(f, "unchanged"),
            ResourceStatus::Deleted => write!(f, "deleted"),
            ResourceStatus::Failed(reason) => write!(f, "failed: {}", reason),
            ResourceStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-identity reconciliation record
#[derive(Debug, Clone)]
pub struct SyncEntry {
    pub id: ResourceId,
    pub desired: Option<ManagedResource>,
    pub observed: Option<ObservedResource>,
    pub status: ResourceStatus,
}

/// Desired and observed state of every identity in one run
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    entries: BTreeMap<ResourceId, SyncEntry>,
    /// Desired order first, orphans after
    order: Vec<ResourceId>,
}

impl SyncState {
    pub fn new(desired: Vec<ManagedResource>) -> Self {
        let mut state = Self::default();
        for resource in desired {
            let id = resource.id.clone();
            state.order.push(id.clone());
            state.entries.insert(
                id.clone(),
                SyncEntry {
                    id,
                    desired: Some(resource),
                    observed: None,
                    status: ResourceStatus::Pending,
                },
            );
        }
        state
    }

    /// Record an observed resource; unknown identities become orphans
    pub fn observe(&mut self, observed: ObservedResource) {
        let id = observed.id.clone();
        match self.entries.get_mut(&id) {
            Some(entry) => entry.observed = Some(observed),
            None => {
                self.order.push(id.clone());
                self.entries.insert(
                    id.clone(),
                    SyncEntry {
                        id,
                        desired: None,
                        observed: Some(observed),
                        status: ResourceStatus::Pending,
                    },
                );
            }
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&SyncEntry> {
        self.entries.get(id)
    }

    pub fn set_status(&mut self, id: &ResourceId, status: ResourceStatus) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.status = status;
        }
    }

    /// Entries in desired order, orphans last
    pub fn entries(&self) -> impl Iterator<Item = &SyncEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    /// Partition into create/update/delete/no-op in apply order
    pub fn plan(&self) -> Plan {
        let mut actions = Vec::new();

        for kind in ResourceKind::NAMESPACED {
            for entry in self.pending_of(kind) {
                let Some(desired) = &entry.desired else {
                    continue;
                };
                let action = match &entry.observed {
                    None => Action::new(entry.id.clone(), ActionType::Create, "not present"),
                    Some(observed) if in_sync(desired, observed) => {
                        Action::new(entry.id.clone(), ActionType::NoOp, "up to date")
                    }
                    Some(_) => Action::new(entry.id.clone(), ActionType::Update, "spec differs"),
                };
                actions.push(action);
            }
        }

        for kind in ResourceKind::NAMESPACED.into_iter().rev() {
            for entry in self.pending_of(kind) {
                if entry.desired.is_none() && entry.observed.is_some() {
                    actions.push(Action::new(
                        entry.id.clone(),
                        ActionType::Delete,
                        "no longer in topology",
                    ));
                }
            }
        }

        Plan::new(actions)
    }

    fn pending_of(&self, kind: ResourceKind) -> impl Iterator<Item = &SyncEntry> {
        self.entries()
            .filter(move |e| e.id.kind == kind && e.status == ResourceStatus::Pending)
    }

    fn skip_pending(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.status == ResourceStatus::Pending {
                entry.status = ResourceStatus::Skipped;
            }
        }
    }
}

fn in_sync(desired: &ManagedResource, observed: &ObservedResource) -> bool {
    let labels_match = desired
        .labels
        .iter()
        .all(|(k, v)| observed.labels.get(k) == Some(v));
    labels_match && spec_matches(&desired.spec_value(), &observed.spec)
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum SyncOutcome {
    Completed,
    /// A fatal control-plane error stopped the run
    Aborted(String),
    Cancelled,
}

/// Final status of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub id: ResourceId,
    pub action: Option<ActionType>,
    pub status: ResourceStatus,
}

/// Everything a run did, for the final report and the run-state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub topology: String,
    pub namespace: String,
    pub fabric: Option<ResourceStatus>,
    pub resources: Vec<ResourceReport>,
    pub summary: PlanSummary,
    pub outcome: SyncOutcome,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn failed(&self) -> impl Iterator<Item = &ResourceReport> {
        self.resources.iter().filter(|r| r.status.is_failed())
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Completed
            && self.failed().next().is_none()
            && !self.fabric.as_ref().is_some_and(ResourceStatus::is_failed)
    }

    pub fn status_of(&self, id: &ResourceId) -> Option<&ResourceStatus> {
        self.resources
            .iter()
            .find(|r| &r.id == id)
            .map(|r| &r.status)
    }

    /// Names of node resources that exist with their desired spec
    pub fn present_nodes(&self) -> BTreeSet<String> {
        self.resources
            .iter()
            .filter(|r| r.id.kind == ResourceKind::Node && r.status.is_present())
            .map(|r| r.id.name.clone())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&ResourceStatus) -> bool) -> usize {
        self.resources.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Why a phase stopped early
enum Halt {
    Abort(String),
    Cancel,
}

/// Result of applying one action
enum Step {
    Done(ResourceStatus),
    Halt(Halt),
}

/// Drives one reconciliation against a [`ClusterClient`]
pub struct Reconciler<'a, C: ClusterClient + ?Sized> {
    client: &'a C,
    ctx: &'a SyncContext,
}

impl<'a, C: ClusterClient + ?Sized> Reconciler<'a, C> {
    pub fn new(client: &'a C, ctx: &'a SyncContext) -> Self {
        Self { client, ctx }
    }

    /// Observe, plan and apply
    pub async fn reconcile(&self, desired: Vec<ManagedResource>) -> SyncReport {
        let started = Instant::now();
        info!(
            topology = %self.ctx.topology,
            namespace = %self.ctx.namespace,
            client = self.client.name(),
            resources = desired.len(),
            "Reconciling topology"
        );

        let (mut state, halt) = self.observe(desired).await;
        let plan = state.plan();
        info!("Plan: {}", plan.summary());

        let mut fabric = None;
        let outcome = match halt {
            Some(halt) => {
                state.skip_pending();
                outcome_of(halt)
            }
            None => self.apply(&mut state, &plan, &mut fabric).await,
        };

        self.report(state, &plan, fabric, outcome, started)
    }

    /// Delete every resource of the topology, then its namespace
    pub async fn teardown(&self) -> SyncReport {
        let started = Instant::now();
        info!(
            topology = %self.ctx.topology,
            namespace = %self.ctx.namespace,
            "Removing topology"
        );

        let (mut state, halt) = self.observe(Vec::new()).await;
        let plan = state.plan();
        let mut fabric = None;
        let outcome = match halt {
            Some(halt) => {
                state.skip_pending();
                outcome_of(halt)
            }
            None => self.apply(&mut state, &plan, &mut fabric).await,
        };

        let clean = outcome == SyncOutcome::Completed
            && state.entries().all(|e| !e.status.is_failed());
        let outcome = if clean {
            let client = self.client;
            let namespace = self.ctx.namespace.as_str();
            match self.call(move |_| client.delete_namespace(namespace)).await {
                Ok(_) => {
                    info!(namespace = %namespace, "Namespace deleted");
                    fabric = Some(ResourceStatus::Deleted);
                    outcome
                }
                Err(e) => match classify(e) {
                    Step::Done(status) => {
                        fabric = Some(status);
                        outcome
                    }
                    Step::Halt(halt) => outcome_of(halt),
                },
            }
        } else {
            fabric = Some(ResourceStatus::Skipped);
            outcome
        };

        self.report(state, &plan, fabric, outcome, started)
    }

    /// Observe and plan without mutating anything
    pub async fn plan(&self, desired: Vec<ManagedResource>) -> Result<(SyncState, Plan), SyncOutcome> {
        match self.observe(desired).await {
            (state, None) => {
                let plan = state.plan();
                Ok((state, plan))
            }
            (_, Some(halt)) => Err(outcome_of(halt)),
        }
    }

    /// Read the observed state of every desired identity, then list for
    /// orphans.
    async fn observe(&self, desired: Vec<ManagedResource>) -> (SyncState, Option<Halt>) {
        let mut state = SyncState::new(desired);
        let client = self.client;
        let namespace = self.ctx.namespace.as_str();

        let ids: Vec<ResourceId> = state.entries().map(|e| e.id.clone()).collect();
        for id in ids {
            let (kind, name) = (id.kind, id.name.as_str());
            match self.call(move |_| client.get(namespace, kind, name)).await {
                Ok(Some(observed)) => state.observe(observed),
                Ok(None) => {}
                Err(e) => match classify(e) {
                    Step::Done(status) => {
                        warn!(resource = %id, "Could not read resource: {}", status);
                        state.set_status(&id, status);
                    }
                    Step::Halt(halt) => return (state, Some(halt)),
                },
            }
        }

        let topology = self.ctx.topology.as_str();
        for kind in ResourceKind::NAMESPACED {
            match self.call(move |_| client.list(namespace, kind, topology)).await {
                Ok(observed) => {
                    for resource in observed {
                        if state.get(&resource.id).is_none() {
                            debug!(resource = %resource.id, "Found orphaned resource");
                            state.observe(resource);
                        }
                    }
                }
                Err(e) => match classify(e) {
                    Step::Done(status) => {
                        warn!(kind = %kind, "Could not list resources, orphans are kept: {}", status);
                    }
                    Step::Halt(halt) => return (state, Some(halt)),
                },
            }
        }

        (state, None)
    }

    /// Apply a plan computed from `state`
    async fn apply(
        &self,
        state: &mut SyncState,
        plan: &Plan,
        fabric: &mut Option<ResourceStatus>,
    ) -> SyncOutcome {
        if plan.writes() {
            if self.ctx.cancel.is_cancelled() {
                state.skip_pending();
                return SyncOutcome::Cancelled;
            }
            match self.ensure_fabric().await {
                Ok(FabricState::Created) => *fabric = Some(ResourceStatus::Created),
                Ok(FabricState::Present) => *fabric = Some(ResourceStatus::Unchanged),
                Err(e) => {
                    let reason = format!("namespace {}: {}", self.ctx.namespace, e);
                    warn!("{}", reason);
                    *fabric = Some(ResourceStatus::Failed(e.to_string()));
                    state.skip_pending();
                    return SyncOutcome::Aborted(reason);
                }
            }
        }

        for action in &plan.actions {
            if action.action_type == ActionType::NoOp {
                state.set_status(&action.resource, ResourceStatus::Unchanged);
                continue;
            }
            if self.ctx.cancel.is_cancelled() {
                info!("Reconciliation cancelled");
                state.skip_pending();
                return SyncOutcome::Cancelled;
            }

            let step = match state.get(&action.resource) {
                Some(entry) => self.apply_action(state, entry, action.action_type).await,
                None => continue,
            };

            match step {
                Step::Done(status) => {
                    match &status {
                        ResourceStatus::Failed(reason) => {
                            warn!(resource = %action.resource, "Failed to {}: {}", action.action_type, reason)
                        }
                        _ => info!(resource = %action.resource, "{}", status),
                    }
                    state.set_status(&action.resource, status);
                }
                Step::Halt(Halt::Cancel) => {
                    state.skip_pending();
                    return SyncOutcome::Cancelled;
                }
                Step::Halt(Halt::Abort(reason)) => {
                    warn!(resource = %action.resource, "Aborting reconciliation: {}", reason);
                    state.set_status(&action.resource, ResourceStatus::Failed(reason.clone()));
                    state.skip_pending();
                    return SyncOutcome::Aborted(reason);
                }
            }
        }

        SyncOutcome::Completed
    }

    async fn apply_action(&self, state: &SyncState, entry: &SyncEntry, action: ActionType) -> Step {
        let client = self.client;
        let namespace = self.ctx.namespace.as_str();
        let (kind, name) = (entry.id.kind, entry.id.name.as_str());

        match (action, &entry.desired, &entry.observed) {
            (ActionType::Create | ActionType::Update, Some(desired), observed) => {
                if let Some(dep) = failed_dependency(state, desired) {
                    return Step::Done(ResourceStatus::Failed(format!(
                        "dependency {} failed",
                        dep
                    )));
                }
                let result = match observed {
                    Some(observed) => {
                        let token = &observed.token;
                        self.call(move |_| client.update(namespace, desired, token))
                            .await
                            .map(|_| ResourceStatus::Updated)
                    }
                    None => self
                        .call(move |_| client.create(namespace, desired))
                        .await
                        .map(|_| ResourceStatus::Created),
                };
                match result {
                    Ok(status) => Step::Done(status),
                    Err(RetryError::Rejected {
                        error: ApplyError::Conflict { .. },
                        ..
                    }) => self.resolve_conflict(desired).await,
                    Err(e) => classify(e),
                }
            }
            (ActionType::Delete, _, _) => {
                match self.call(move |_| client.delete(namespace, kind, name)).await {
                    Ok(_) => Step::Done(ResourceStatus::Deleted),
                    Err(e) => classify(e),
                }
            }
            _ => Step::Done(ResourceStatus::Unchanged),
        }
    }

    /// Re-read once and retry once; a second conflict fails the resource
    async fn resolve_conflict(&self, desired: &ManagedResource) -> Step {
        debug!(resource = %desired.id, "Conflict, re-reading");
        let client = self.client;
        let namespace = self.ctx.namespace.as_str();
        let (kind, name) = (desired.kind(), desired.name());

        let observed = match self.call(move |_| client.get(namespace, kind, name)).await {
            Ok(observed) => observed,
            Err(e) => return classify(e),
        };

        let result = match &observed {
            Some(current) if in_sync(desired, current) => {
                return Step::Done(ResourceStatus::Unchanged);
            }
            Some(current) => {
                let token = &current.token;
                self.call(move |_| client.update(namespace, desired, token))
                    .await
                    .map(|_| ResourceStatus::Updated)
            }
            None => self
                .call(move |_| client.create(namespace, desired))
                .await
                .map(|_| ResourceStatus::Created),
        };

        match result {
            Ok(status) => Step::Done(status),
            Err(e) => classify(e),
        }
    }

    async fn ensure_fabric(&self) -> Result<FabricState, ApplyError> {
        let client = self.client;
        let namespace = self.ctx.namespace.as_str();
        let description = self.ctx.description.as_str();

        self.ctx
            .fabric
            .ensure(|| async move {
                let created = self
                    .call(move |_| client.ensure_namespace(namespace, description))
                    .await
                    .map_err(|e| match e {
                        RetryError::Cancelled { .. } => {
                            ApplyError::Transient("cancelled while ensuring namespace".to_string())
                        }
                        RetryError::Exhausted { attempts, last } => ApplyError::Transient(
                            format!("gave up after {} attempts: {}", attempts, last),
                        ),
                        RetryError::Rejected { error, .. } => error,
                    })?;
                if created {
                    info!(namespace = %namespace, "Namespace created");
                    Ok(FabricState::Created)
                } else {
                    debug!(namespace = %namespace, "Namespace present");
                    Ok(FabricState::Present)
                }
            })
            .await
    }

    /// Retry transient errors under the context policy
    async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError<ApplyError>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApplyError>>,
    {
        self.ctx
            .retry
            .run(&self.ctx.cancel, ApplyError::is_transient, |attempt| {
                if attempt > 1 {
                    debug!(attempt, "Retrying control-plane call");
                }
                op(attempt)
            })
            .await
    }

    fn report(
        &self,
        state: SyncState,
        plan: &Plan,
        fabric: Option<ResourceStatus>,
        outcome: SyncOutcome,
        started: Instant,
    ) -> SyncReport {
        let actions: BTreeMap<&ResourceId, ActionType> = plan
            .actions
            .iter()
            .map(|a| (&a.resource, a.action_type))
            .collect();
        let resources = state
            .entries()
            .map(|e| ResourceReport {
                id: e.id.clone(),
                action: actions.get(&e.id).copied(),
                status: e.status.clone(),
            })
            .collect();

        SyncReport {
            topology: self.ctx.topology.clone(),
            namespace: self.ctx.namespace.clone(),
            fabric,
            resources,
            summary: plan.summary(),
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// First resource `desired` references that did not make it
fn failed_dependency(state: &SyncState, desired: &ManagedResource) -> Option<ResourceId> {
    desired.dependencies().into_iter().find(|dep| {
        state
            .get(dep)
            .is_some_and(|e| matches!(e.status, ResourceStatus::Failed(_) | ResourceStatus::Skipped))
    })
}

fn classify(error: RetryError<ApplyError>) -> Step {
    match error {
        RetryError::Cancelled { .. } => Step::Halt(Halt::Cancel),
        RetryError::Exhausted { attempts, last } => Step::Done(ResourceStatus::Failed(format!(
            "gave up after {} attempts: {}",
            attempts, last
        ))),
        RetryError::Rejected {
            error: ApplyError::Fatal(reason),
            ..
        } => Step::Halt(Halt::Abort(reason)),
        RetryError::Rejected { error, .. } => Step::Done(ResourceStatus::Failed(error.to_string())),
    }
}

fn outcome_of(halt: Halt) -> SyncOutcome {
    match halt {
        Halt::Abort(reason) => SyncOutcome::Aborted(reason),
        Halt::Cancel => SyncOutcome::Cancelled,
    }
}
