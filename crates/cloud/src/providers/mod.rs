//! Cloud control-plane abstractions.
//!
//! This module defines the capability traits and the Azure implementation.

pub mod azure;
mod traits;

pub use traits::{
    CloudError, Deployments, ResourceGroups, SecretStore, StaticTokenProvider, TokenAudience,
    TokenProvider, VirtualMachines,
};

pub use azure::ArmClient;
