//! Cluster definition reconciliation and upgrade orchestration for
//! acs-engine Kubernetes clusters on Azure.
//!
//! A cluster is configured through a flat key/value representation
//! ([`ResourceData`]) and persisted as a structured, versioned specification
//! ([`ContainerService`]) in the `api_model` attribute. This crate provides:
//!
//! - **Model Translator** ([`translate`]) - flat configuration ⇄ specification
//! - **Cluster Specification Store** ([`store`]) - persist and reload the specification
//! - **Subscription Resolver** ([`subscription`]) - pick a subscription from the Azure CLI profile
//! - **Upgrade Orchestrator** ([`upgrade`]) - staged, resumable node-by-node upgrade
//! - **Resource lifecycle** ([`lifecycle`]) - create, read, update, delete
//!
//! Cloud access goes through the capability traits of [`acs_cloud`].

pub mod api;
pub mod context;
pub mod error;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;
pub mod kubeconfig;
pub mod lifecycle;
pub mod resource;
pub mod schema;
pub mod store;
pub mod subscription;
pub mod translate;
pub mod upgrade;

pub use api::ContainerService;
pub use context::{ProviderContext, ProviderSettings};
pub use error::Error;
pub use kubeconfig::{CertificateKubeConfig, ClusterAccess};
pub use lifecycle::ClusterLifecycle;
pub use resource::{ResourceData, ResourceId};
pub use store::{ClientSecret, LoadedCluster};
pub use subscription::{AzureCliProfile, Subscription};
pub use upgrade::{UpgradeOrchestrator, UpgradeReport, UpgradeStage};
