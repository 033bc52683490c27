//! Remote-shell seam
//!
//! The bootstrapper only needs to run commands and write files on a node.
//! [`crate::ssh::OpenSsh`] drives the system `ssh` client; tests plug in
//! scripted shells.

use crate::error::Result;
use async_trait::async_trait;

/// Username and optional password for a remote-shell login
#[derive(Clone, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    /// `None` means key-based authentication
    pub password: Option<String>,
}

impl Login {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Label stored in the run-state file. Never contains the password.
    pub fn label(&self) -> String {
        match self.password {
            Some(_) => self.username.clone(),
            None => format!("{} (key)", self.username),
        }
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellTarget {
    /// Topology node name, for logs and errors
    pub node: String,
    pub address: String,
    pub port: u16,
    /// Prefix that makes the login shell run a POSIX command
    /// (`bash ` on network OS CLIs)
    pub posix_prefix: Option<String>,
}

impl std::fmt::Display for ShellTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}:{})", self.node, self.address, self.port)
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Opens authenticated sessions
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Authenticate as `login`; fails with `AuthFailure` when rejected and
    /// `Timeout` when the node cannot be reached
    async fn connect(&self, target: &ShellTarget, login: &Login) -> Result<Box<dyn ShellSession>>;
}

/// An authenticated session on one node
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Run a command. A non-zero exit status is returned, not raised.
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Create or replace a file with the given permission bits
    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<()>;
}
