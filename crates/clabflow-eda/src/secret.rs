//! Node TLS credentials issued by EDA
//!
//! EDA stores the certificate it issues for a node in secret
//! `<namespace>--<node-resource>-cert-tls` of namespace `eda-system`.

use crate::client::EdaClient;
use crate::error::EdaError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clabflow_bootstrap::{BootstrapError, CredentialSource, NodeCredential};
use reqwest::Method;
use serde_json::Value;

const SECRET_NAMESPACE: &str = "eda-system";

pub fn secret_name(namespace: &str, node_resource: &str) -> String {
    format!("{}--{}-cert-tls", namespace, node_resource)
}

fn decode_field(secret: &Value, key: &str) -> Result<Vec<u8>, EdaError> {
    let encoded = secret
        .get("data")
        .and_then(|data| data.get(key))
        .and_then(Value::as_str)
        .ok_or_else(|| EdaError::UnexpectedResponse(format!("secret has no data.{}", key)))?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|source| EdaError::Base64 {
            field: key.to_string(),
            source,
        })
}

pub(crate) fn credential_from_secret(node_resource: &str, secret: &Value) -> Result<NodeCredential, EdaError> {
    let revision = secret
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(NodeCredential {
        node: node_resource.to_string(),
        certificate: decode_field(secret, "tls.crt")?,
        private_key: decode_field(secret, "tls.key")?,
        revision,
    })
}

#[async_trait]
impl CredentialSource for EdaClient {
    async fn issued_credential(
        &self,
        namespace: &str,
        node_resource: &str,
    ) -> clabflow_bootstrap::Result<Option<NodeCredential>> {
        let path = format!(
            "api/v1/namespaces/{}/secrets/{}",
            SECRET_NAMESPACE,
            secret_name(namespace, node_resource)
        );
        let to_bootstrap = |e: EdaError| BootstrapError::Credential {
            node: node_resource.to_string(),
            reason: e.to_string(),
        };

        let Some(secret) = self
            .request(Method::GET, &path, None)
            .await
            .map_err(to_bootstrap)?
        else {
            return Ok(None);
        };
        credential_from_secret(node_resource, &secret)
            .map(Some)
            .map_err(to_bootstrap)
    }
}
