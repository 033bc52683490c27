//! EDA client error types

use clabflow_cloud::ApplyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EdaError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("EDA authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("EDA API returned {status} for {path}: {message}")]
    Api {
        status: u16,
        path: String,
        message: String,
    },

    #[error("Unexpected EDA response: {0}")]
    UnexpectedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid base64 in {field}: {source}")]
    Base64 {
        field: String,
        #[source]
        source: base64::DecodeError,
    },
}

pub type Result<T> = std::result::Result<T, EdaError>;

impl EdaError {
    pub fn status(&self) -> Option<u16> {
        match self {
            EdaError::Api { status, .. } => Some(*status),
            EdaError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Whether a status code is worth retrying
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

impl From<EdaError> for ApplyError {
    fn from(error: EdaError) -> Self {
        match &error {
            EdaError::Api { status: 409, .. } => ApplyError::Conflict { stale_token: None },
            EdaError::Api { status, .. } if is_transient_status(*status) => {
                ApplyError::Transient(error.to_string())
            }
            EdaError::Http(e) if e.is_decode() || e.is_builder() => {
                ApplyError::Fatal(error.to_string())
            }
            EdaError::Http(e) => match e.status() {
                Some(status) if !is_transient_status(status.as_u16()) => {
                    ApplyError::Fatal(error.to_string())
                }
                // connect, timeout, reset
                _ => ApplyError::Transient(error.to_string()),
            },
            _ => ApplyError::Fatal(error.to_string()),
        }
    }
}
