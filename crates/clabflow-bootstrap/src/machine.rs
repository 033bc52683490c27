//! Per-node bootstrap state machine
//!
//! ```text
//! Pending → Connecting → CredentialPush → Verifying → Complete
//!                 │             │              │
//!                 └─────────────┴──────────────┴──→ Failed | Cancelled
//! ```
//!
//! Each step is retried on its own with the bootstrap [`RetryPolicy`].

use crate::credential::CredentialSource;
use crate::error::BootstrapError;
use crate::profile::BootstrapProfile;
use crate::shell::{Login, RemoteShell, ShellSession, ShellTarget};
use clabflow_cloud::{RetryError, RetryPolicy};
use clabflow_core::{NodeId, NodeKind, TopologyNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    Pending,
    Connecting,
    CredentialPush,
    Verifying,
    Complete,
    Failed,
    Cancelled,
}

impl BootstrapState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BootstrapState::Complete | BootstrapState::Failed | BootstrapState::Cancelled
        )
    }
}

impl std::fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BootstrapState::Pending => "pending",
            BootstrapState::Connecting => "connecting",
            BootstrapState::CredentialPush => "credential-push",
            BootstrapState::Verifying => "verifying",
            BootstrapState::Complete => "complete",
            BootstrapState::Failed => "failed",
            BootstrapState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: BootstrapState,
    pub to: BootstrapState,
    pub note: Option<String>,
}

/// Bootstrap settings shared by every node of a run
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub retry: RetryPolicy,
    pub workers: usize,
    pub port: u16,
    /// Tried after the established login and before the kind default
    pub logins: Vec<Login>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            workers: DEFAULT_WORKERS,
            port: DEFAULT_SSH_PORT,
            logins: Vec::new(),
        }
    }
}

/// One node to bootstrap
#[derive(Debug, Clone)]
pub struct NodeJob {
    pub node: TopologyNode,
    /// Node resource name in the control plane
    pub resource: String,
    /// Whether the node resource exists after reconciliation
    pub resource_present: bool,
    /// Login label that worked last time
    pub established_login: Option<String>,
    /// Credential revision already installed on the node
    pub pushed_revision: Option<String>,
}

/// Terminal result for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node: NodeId,
    pub name: String,
    pub resource: String,
    pub state: BootstrapState,
    pub history: Vec<Transition>,
    /// Attempts used per step
    pub attempts: BTreeMap<BootstrapState, u32>,
    /// Label of the login that was accepted
    pub login: Option<String>,
    pub credential_revision: Option<String>,
    pub error: Option<String>,
}

impl NodeOutcome {
    fn new(job: &NodeJob) -> Self {
        Self {
            node: job.node.id,
            name: job.node.name.clone(),
            resource: job.resource.clone(),
            state: BootstrapState::Pending,
            history: Vec::new(),
            attempts: BTreeMap::new(),
            login: None,
            credential_revision: job.pushed_revision.clone(),
            error: None,
        }
    }

    pub(crate) fn failed(job: &NodeJob, reason: &str) -> Self {
        let mut outcome = Self::new(job);
        outcome.error = Some(reason.to_string());
        outcome.advance(BootstrapState::Failed, Some(reason.to_string()));
        outcome
    }

    pub(crate) fn cancelled(job: &NodeJob) -> Self {
        let mut outcome = Self::new(job);
        outcome.advance(BootstrapState::Cancelled, None);
        outcome
    }

    fn advance(&mut self, to: BootstrapState, note: Option<String>) {
        self.history.push(Transition {
            from: self.state,
            to,
            note,
        });
        self.state = to;
    }

    /// Attempts used by a step, 0 if it never ran
    pub fn attempts_for(&self, step: BootstrapState) -> u32 {
        self.attempts.get(&step).copied().unwrap_or(0)
    }

    pub fn is_complete(&self) -> bool {
        self.state == BootstrapState::Complete
    }

    /// States visited, starting with `Pending`
    pub fn path(&self) -> Vec<BootstrapState> {
        std::iter::once(BootstrapState::Pending)
            .chain(self.history.iter().map(|t| t.to))
            .collect()
    }
}

enum Halt {
    Failed(String),
    Cancelled,
}

/// Login order: the established login, configured candidates, then the
/// kind's factory login. Duplicates keep their first position.
pub fn login_candidates(kind: &NodeKind, established: Option<&str>, extra: &[Login]) -> Vec<Login> {
    let (username, password) = kind.default_login();
    let factory = match password {
        Some(password) => Login::new(username).with_password(password),
        None => Login::new(username),
    };

    let mut candidates: Vec<Login> = Vec::with_capacity(extra.len() + 1);
    for login in extra.iter().cloned().chain(std::iter::once(factory)) {
        if !candidates.contains(&login) {
            candidates.push(login);
        }
    }

    if let Some(label) = established
        && let Some(pos) = candidates.iter().position(|l| l.label() == label)
    {
        let login = candidates.remove(pos);
        candidates.insert(0, login);
    }
    candidates
}

/// Drives one node through the state machine
pub struct NodeBootstrap<'a> {
    pub shell: &'a dyn RemoteShell,
    pub credentials: &'a dyn CredentialSource,
    pub settings: &'a BootstrapSettings,
    pub namespace: &'a str,
    pub cancel: &'a CancellationToken,
}

impl NodeBootstrap<'_> {
    pub async fn run(&self, job: &NodeJob) -> NodeOutcome {
        if !job.resource_present {
            warn!(node = %job.node.name, "Node resource missing, not bootstrapping");
            return NodeOutcome::failed(job, "control-plane resource missing");
        }

        let mut outcome = NodeOutcome::new(job);
        match self.drive(job, &mut outcome).await {
            Ok(()) => {
                info!(node = %job.node.name, "Bootstrap complete");
                outcome.advance(BootstrapState::Complete, None);
            }
            Err(Halt::Failed(reason)) => {
                warn!(node = %job.node.name, step = %outcome.state, "Bootstrap failed: {}", reason);
                outcome.error = Some(reason.clone());
                outcome.advance(BootstrapState::Failed, Some(reason));
            }
            Err(Halt::Cancelled) => {
                info!(node = %job.node.name, step = %outcome.state, "Bootstrap cancelled");
                outcome.advance(BootstrapState::Cancelled, None);
            }
        }
        outcome
    }

    async fn drive(&self, job: &NodeJob, outcome: &mut NodeOutcome) -> Result<(), Halt> {
        let profile = BootstrapProfile::for_kind(&job.node.kind);
        let target = ShellTarget {
            node: job.node.name.clone(),
            address: job.node.mgmt_ipv4.to_string(),
            port: self.settings.port,
            posix_prefix: profile.posix_prefix.map(String::from),
        };
        let candidates = login_candidates(
            &job.node.kind,
            job.established_login.as_deref(),
            &self.settings.logins,
        );

        let (target, candidates, profile) = (&target, &candidates, &profile);
        let (session, login) = self
            .step(outcome, BootstrapState::Connecting, move |_| {
                self.connect(target, candidates)
            })
            .await?;
        outcome.login = Some(login.label());

        let session = session.as_ref();
        let revision = self
            .step(outcome, BootstrapState::CredentialPush, move |_| {
                self.push(session, job, profile)
            })
            .await?;
        if revision.is_some() {
            outcome.credential_revision = revision;
        }

        self.step(outcome, BootstrapState::Verifying, move |_| {
            self.verify(session, job, profile)
        })
        .await
    }

    /// Enter `state` and run `op` under the retry policy until it succeeds,
    /// runs out of attempts or the run is cancelled
    async fn step<T, F, Fut>(
        &self,
        outcome: &mut NodeOutcome,
        state: BootstrapState,
        op: F,
    ) -> Result<T, Halt>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, BootstrapError>>,
    {
        outcome.advance(state, None);
        let attempts = AtomicU32::new(0);
        let name = outcome.name.clone();
        let counted = |attempt: u32| {
            attempts.store(attempt, Ordering::Relaxed);
            if attempt > 1 {
                debug!(node = %name, step = %state, attempt, "Retrying");
            }
            op(attempt)
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RetryError::Cancelled { attempts: 0 }),
            result = self.settings.retry.run(self.cancel, |_: &BootstrapError| true, counted) => result,
        };
        outcome
            .attempts
            .insert(state, attempts.load(Ordering::Relaxed));

        result.map_err(|error| match error {
            RetryError::Cancelled { .. } => Halt::Cancelled,
            other => Halt::Failed(other.to_string()),
        })
    }

    async fn connect(
        &self,
        target: &ShellTarget,
        candidates: &[Login],
    ) -> Result<(Box<dyn ShellSession>, Login), BootstrapError> {
        for login in candidates {
            match self.shell.connect(target, login).await {
                Ok(session) => return Ok((session, login.clone())),
                Err(error) if error.is_auth_failure() => {
                    debug!(target = %target, user = %login.username, "Login rejected");
                }
                Err(error) => return Err(error),
            }
        }
        Err(BootstrapError::AuthFailure {
            target: target.to_string(),
            reason: format!("all {} login candidates rejected", candidates.len()),
        })
    }

    /// Install the issued credential; returns its revision
    async fn push(
        &self,
        session: &dyn ShellSession,
        job: &NodeJob,
        profile: &BootstrapProfile,
    ) -> Result<Option<String>, BootstrapError> {
        let Some((certificate_path, key_path)) = profile.credential_paths else {
            debug!(node = %job.node.name, kind = %job.node.kind, "Kind takes no pushed credential");
            return Ok(None);
        };
        let Some(credential) = self
            .credentials
            .issued_credential(self.namespace, &job.resource)
            .await?
        else {
            debug!(node = %job.node.name, "No credential issued yet");
            return Ok(None);
        };
        if job.pushed_revision.as_deref() == Some(credential.revision.as_str()) {
            debug!(node = %job.node.name, revision = %credential.revision, "Credential already installed");
            return Ok(Some(credential.revision));
        }

        session
            .write_file(certificate_path, &credential.certificate, 0o644)
            .await?;
        session
            .write_file(key_path, &credential.private_key, 0o600)
            .await?;
        for command in &profile.reload {
            let output = session.exec(command).await?;
            if !output.success() {
                return Err(BootstrapError::CommandFailed {
                    node: job.node.name.clone(),
                    command: command.to_string(),
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                });
            }
        }
        info!(node = %job.node.name, revision = %credential.revision, "Credential installed");
        Ok(Some(credential.revision))
    }

    async fn verify(
        &self,
        session: &dyn ShellSession,
        job: &NodeJob,
        profile: &BootstrapProfile,
    ) -> Result<(), BootstrapError> {
        let output = session.exec(profile.probe).await?;
        if output.success() && profile.probe_passed(&output.stdout) {
            return Ok(());
        }
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        Err(BootstrapError::ProbeFailure {
            node: job.node.name.clone(),
            reason: format!("`{}` exited with {}: {}", profile.probe, output.status, detail),
        })
    }
}
