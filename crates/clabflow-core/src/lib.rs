//! clabflow core
//!
//! Everything that can be decided without talking to another system:
//!
//! - **document**: the raw containerlab YAML
//! - **loader**: validation into an immutable [`Topology`]
//! - **naming**: control-plane safe identifiers
//! - **mapper**: topology to [`ManagedResource`] specs, shared resources first
//! - **manifest**: YAML rendering of those specs

pub mod document;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod mapper;
pub mod model;
pub mod naming;

// Re-exports
pub use error::{LoadError, Result, ValidationError};
pub use loader::{build_topology, load_topology_file, load_topology_str};
pub use manifest::render_manifests;
pub use mapper::{desired_resources, fabric_resource, map_topology, shared_resources};
pub use model::*;
pub use naming::{DEFAULT_NAMESPACE_PREFIX, namespace_for, normalize_name};
