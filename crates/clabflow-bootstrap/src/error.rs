use thiserror::Error;

/// Per-node bootstrap failures. All of them are retried per step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error(
        "connection to {target} timed out: {reason}\n\nHint:\n  • Check that the node is running and its management address is reachable"
    )]
    Timeout { target: String, reason: String },

    #[error(
        "authentication to {target} failed: {reason}\n\nHint:\n  • Add the node's login to ssh.logins in the clabflow config"
    )]
    AuthFailure { target: String, reason: String },

    #[error("readiness probe on {node} failed: {reason}")]
    ProbeFailure { node: String, reason: String },

    #[error("command `{command}` on {node} exited with {status}: {stderr}")]
    CommandFailed {
        node: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("could not fetch credential for {node}: {reason}")]
    Credential { node: String, reason: String },

    #[error("remote shell error: {0}")]
    Shell(String),
}

impl BootstrapError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, BootstrapError::AuthFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
