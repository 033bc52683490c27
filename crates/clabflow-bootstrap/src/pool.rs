//! Bounded worker pool over the node state machine

use crate::credential::CredentialSource;
use crate::machine::{BootstrapSettings, BootstrapState, NodeBootstrap, NodeJob, NodeOutcome};
use crate::shell::RemoteShell;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Terminal outcomes in topology order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub nodes: Vec<NodeOutcome>,
}

impl BootstrapReport {
    pub fn outcome(&self, name: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn count(&self, state: BootstrapState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(NodeOutcome::is_complete)
    }
}

/// Bootstraps many nodes, at most `settings.workers` at a time
pub struct Bootstrapper {
    shell: Arc<dyn RemoteShell>,
    credentials: Arc<dyn CredentialSource>,
    settings: Arc<BootstrapSettings>,
    namespace: String,
    cancel: CancellationToken,
}

impl Bootstrapper {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        credentials: Arc<dyn CredentialSource>,
        settings: BootstrapSettings,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            shell,
            credentials,
            settings: Arc::new(settings),
            namespace: namespace.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, jobs: Vec<NodeJob>) -> BootstrapReport {
        let workers = self.settings.workers.max(1);
        info!("Bootstrapping {} nodes with {} workers", jobs.len(), workers);

        let jobs: Vec<Arc<NodeJob>> = jobs.into_iter().map(Arc::new).collect();
        let slots = jobs.iter().map(|j| j.node.id.0 + 1).max().unwrap_or(0);
        // indexed by NodeId
        let mut arena: Vec<Option<NodeOutcome>> = (0..slots).map(|_| None).collect();

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for job in &jobs {
            if !job.resource_present {
                warn!(node = %job.node.name, "Node resource missing, not bootstrapping");
                arena[job.node.id.0] = Some(NodeOutcome::failed(job, "control-plane resource missing"));
                continue;
            }

            let job = Arc::clone(job);
            let shell = Arc::clone(&self.shell);
            let credentials = Arc::clone(&self.credentials);
            let settings = Arc::clone(&self.settings);
            let semaphore = Arc::clone(&semaphore);
            let namespace = self.namespace.clone();
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (job.node.id, NodeOutcome::cancelled(&job));
                };

                let machine = NodeBootstrap {
                    shell: shell.as_ref(),
                    credentials: credentials.as_ref(),
                    settings: &settings,
                    namespace: &namespace,
                    cancel: &cancel,
                };
                (job.node.id, machine.run(&job).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => arena[id.0] = Some(outcome),
                Err(e) => warn!("Bootstrap worker stopped: {}", e),
            }
        }

        let nodes = jobs
            .iter()
            .map(|job| {
                arena[job.node.id.0]
                    .take()
                    .unwrap_or_else(|| NodeOutcome::failed(job, "bootstrap worker stopped unexpectedly"))
            })
            .collect();
        BootstrapReport { nodes }
    }
}
