//! Control-plane error types

use crate::client::ConcurrencyToken;
use thiserror::Error;

/// Outcome classes of a failed control-plane call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Network failure, timeout or rate limiting; worth retrying
    #[error("transient control-plane error: {0}")]
    Transient(String),

    /// Concurrent modification; the presented token (if any) is stale
    #[error("conflicting concurrent modification")]
    Conflict {
        stale_token: Option<ConcurrencyToken>,
    },

    /// Authentication or schema error; the run cannot continue
    #[error("fatal control-plane error: {0}")]
    Fatal(String),
}

impl ApplyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApplyError::Transient(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Conflict { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplyError::Fatal(_))
    }
}

/// Errors of the run-state file
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
