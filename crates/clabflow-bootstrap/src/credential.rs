//! Node credentials issued by the control plane

use crate::error::Result;
use async_trait::async_trait;

/// Key and certificate material for one node
#[derive(Clone, PartialEq, Eq)]
pub struct NodeCredential {
    /// Node resource name the credential was issued for
    pub node: String,
    /// PEM certificate
    pub certificate: Vec<u8>,
    /// PEM private key
    pub private_key: Vec<u8>,
    /// Control-plane revision of the credential
    pub revision: String,
}

impl std::fmt::Debug for NodeCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCredential")
            .field("node", &self.node)
            .field("certificate", &format_args!("<{} bytes>", self.certificate.len()))
            .field("private_key", &"<redacted>")
            .field("revision", &self.revision)
            .finish()
    }
}

/// Where issued credentials come from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Credential issued for a node resource, `None` if none was issued yet
    async fn issued_credential(
        &self,
        namespace: &str,
        node_resource: &str,
    ) -> Result<Option<NodeCredential>>;
}

/// Source for runs where no credential is ever issued
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

#[async_trait]
impl CredentialSource for NoCredentials {
    async fn issued_credential(&self, _: &str, _: &str) -> Result<Option<NodeCredential>> {
        Ok(None)
    }
}
