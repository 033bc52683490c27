use std::path::PathBuf;
use thiserror::Error;

/// Topology consistency violations.
///
/// Any of these aborts the run before a single control-plane call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("topology name is empty")]
    EmptyName,

    #[error("node '{0}' is declared more than once")]
    DuplicateNode(String),

    #[error("node '{0}' has no kind (set it on the node or in topology.defaults)")]
    MissingKind(String),

    #[error("node '{0}' has no management address (mgmt-ipv4)")]
    MissingMgmtAddress(String),

    #[error("node '{node}' has an invalid management address '{address}'")]
    InvalidMgmtAddress { node: String, address: String },

    #[error("node '{node}' management address {address} is outside subnet {subnet}")]
    AddressOutsideSubnet {
        node: String,
        address: String,
        subnet: String,
    },

    #[error("invalid management subnet '{0}'")]
    InvalidSubnet(String),

    #[error("link #{link}: malformed endpoint '{endpoint}', expected '<node>:<interface>'")]
    MalformedEndpoint { link: usize, endpoint: String },

    #[error("link #{link}: endpoint '{endpoint}' references unknown node '{node}'")]
    UnknownNode {
        link: usize,
        endpoint: String,
        node: String,
    },

    #[error("interface '{interface}' on node '{node}' is used by more than one link")]
    DuplicateInterface { node: String, interface: String },

    #[error("'{first}' and '{second}' both map to resource name '{name}'")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },
}

/// Errors raised while reading a topology file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read topology file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse topology: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid topology: {0}")]
    Validation(#[from] ValidationError),
}

impl LoadError {
    /// The validation failure behind this error, if any.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            LoadError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;
