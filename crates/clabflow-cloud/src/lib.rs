//! clabflow control-plane synchronisation
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │              clabflow install              │
//! └──────────────────┬────────────────────────┘
//!                    │ Vec<ManagedResource>
//! ┌──────────────────▼────────────────────────┐
//! │              clabflow-cloud               │
//! │  SyncContext ─ FabricBarrier ─ RetryPolicy │
//! │  Reconciler: observe → plan → apply        │
//! │  readiness: poll node status               │
//! │  trait ClusterClient { get, create, ... }  │
//! └──────────┬─────────────────────┬──────────┘
//!            │                     │
//!    ┌───────▼───────┐     ┌───────▼───────┐
//!    │  clabflow-eda │     │ MemoryCluster │
//!    │  (REST API)   │     │ (test-utils)  │
//!    └───────────────┘     └───────────────┘
//! ```

pub mod action;
pub mod client;
pub mod context;
pub mod error;
#[cfg(feature = "test-utils")]
pub mod memory;
pub mod readiness;
pub mod reconciler;
pub mod retry;
pub mod state;

// Re-exports
pub use action::{Action, ActionType, Plan, PlanSummary};
pub use client::{ClusterClient, ConcurrencyToken, DeleteOutcome, ObservedResource, spec_matches};
pub use context::{FabricBarrier, FabricState, SyncContext};
pub use error::{ApplyError, CloudError, Result};
pub use readiness::{NodeReadiness, NodeSync, ReadinessReport, check_nodes, wait_for_nodes};
pub use reconciler::{
    Reconciler, ResourceReport, ResourceStatus, SyncEntry, SyncOutcome, SyncReport, SyncState,
};
pub use retry::{RetryError, RetryPolicy};
pub use state::{NodeRecord, ResourceRecord, RunState, StateLock, StateManager, TopologyRecord};
