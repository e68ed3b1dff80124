//! Structured cluster specification ("api model").
//!
//! This is the canonical description of a cluster's topology and
//! credentials. It is what gets persisted into the `api_model` field and
//! what the upgrade works against.

mod types;

pub use types::*;

/// Orchestrator type recorded for every cluster this provider manages.
pub const KUBERNETES: &str = "Kubernetes";

/// API version written into persisted specifications.
pub const API_VERSION: &str = "vlabs";
