//! Azure Resource Manager clients for the acs-engine cluster provider.
//!
//! The cluster provider only needs a handful of control-plane capabilities,
//! each expressed as a trait so the orchestration layer can be tested
//! without a live subscription:
//!
//! - **Secrets** - read a secret version from Key Vault
//! - **Deployments** - create or update an ARM template deployment
//! - **Virtual machines** - delete a node VM before it is redeployed
//! - **Resource groups** - tear down a cluster's resource group
//!
//! [`ArmClient`] implements all of them over HTTPS using a bearer token
//! obtained from a [`TokenProvider`].

pub mod providers;

pub use providers::azure::DeploymentTemplate;
pub use providers::{
    azure, ArmClient, CloudError, Deployments, ResourceGroups, SecretStore, StaticTokenProvider,
    TokenAudience, TokenProvider, VirtualMachines,
};
