//! Explicit per-run context passed to every reconciler call

use crate::error::ApplyError;
use crate::retry::RetryPolicy;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Outcome of ensuring the fabric resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FabricState {
    /// Created by this run
    Created,
    /// Already present
    Present,
}

/// Single-flight barrier for the topology-wide resource.
///
/// The first caller runs the initialisation; concurrent callers wait for
/// it and every later caller sees the same outcome, success or failure.
#[derive(Debug, Default)]
pub struct FabricBarrier {
    cell: OnceCell<Result<FabricState, ApplyError>>,
    initialisations: AtomicUsize,
}

impl FabricBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ensure<F, Fut>(&self, init: F) -> Result<FabricState, ApplyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FabricState, ApplyError>>,
    {
        self.cell
            .get_or_init(|| async {
                self.initialisations.fetch_add(1, Ordering::SeqCst);
                init().await
            })
            .await
            .clone()
    }

    /// How many times initialisation actually ran (0 or 1)
    pub fn initialisations(&self) -> usize {
        self.initialisations.load(Ordering::SeqCst)
    }
}

/// Everything a reconciliation needs besides the client itself
#[derive(Debug)]
pub struct SyncContext {
    /// Control-plane safe topology name
    pub topology: String,
    pub namespace: String,
    /// Human-readable description stored on the namespace
    pub description: String,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
    pub fabric: FabricBarrier,
}

impl SyncContext {
    pub fn new(topology: impl Into<String>, namespace: impl Into<String>) -> Self {
        let topology = topology.into();
        Self {
            description: format!("Containerlab {}", topology),
            topology,
            namespace: namespace.into(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            fabric: FabricBarrier::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
