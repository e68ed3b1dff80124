//! Azure Resource Manager implementation of the capability traits.
//!
//! ## Endpoints
//!
//! - **Resource Manager** (`management.azure.com`) - deployments, VMs,
//!   resource groups and Key Vault metadata
//! - **Key Vault data plane** (`<vault>.vault.azure.net`) - secret values
//!
//! The Resource Manager endpoint is configurable so sovereign clouds and
//! test servers can be targeted.

mod client;
mod models;

pub use client::ArmClient;
pub use models::*;
