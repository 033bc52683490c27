//! Node bootstrap for clabflow
//!
//! After the control-plane resources exist, every node is reached over a
//! remote shell, gets its issued TLS credential and is probed for
//! readiness. Nodes run independently on a bounded worker pool.

pub mod credential;
pub mod error;
pub mod machine;
pub mod pool;
pub mod profile;
pub mod shell;
pub mod ssh;

pub use credential::{CredentialSource, NoCredentials, NodeCredential};
pub use error::{BootstrapError, Result};
pub use machine::{
    BootstrapSettings, BootstrapState, DEFAULT_SSH_PORT, DEFAULT_WORKERS, NodeBootstrap, NodeJob,
    NodeOutcome, Transition, login_candidates,
};
pub use pool::{BootstrapReport, Bootstrapper};
pub use profile::BootstrapProfile;
pub use shell::{CommandOutput, Login, RemoteShell, ShellSession, ShellTarget};
pub use ssh::{OpenSsh, SshOptions};
