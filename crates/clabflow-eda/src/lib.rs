//! EDA control-plane client for clabflow
//!
//! Implements [`clabflow_cloud::ClusterClient`] over the EDA REST API and
//! [`clabflow_bootstrap::CredentialSource`] over the node certificate
//! secrets EDA issues.

pub mod auth;
pub mod client;
pub mod cluster;
pub mod error;
pub mod secret;

pub use client::{EdaClient, EdaConfig};
pub use error::{EdaError, Result, is_transient_status};
pub use secret::secret_name;
