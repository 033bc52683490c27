//! Topology and resource models
//!
//! `Topology` is the validated, immutable graph produced by the loader.
//! `ManagedResource` is what the mapper derives from it for the control plane.

mod kind;
mod resource;
mod topology;

// Re-exports
pub use kind::*;
pub use resource::*;
pub use topology::*;
