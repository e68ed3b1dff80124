//! Capability traits and common error type.

use async_trait::async_trait;
use thiserror::Error;

use crate::providers::azure::DeploymentTemplate;

/// Errors that can occur during control-plane operations.
#[derive(Error, Debug)]
pub enum CloudError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl CloudError {
    /// Whether the error means the addressed resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The resource a bearer token is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAudience {
    /// Azure Resource Manager (`https://management.azure.com/`).
    ResourceManager,
    /// Key Vault data plane (`https://vault.azure.net`).
    KeyVault,
}

/// Source of bearer credentials.
///
/// How tokens are acquired is up to the implementation; the clients only
/// attach whatever is returned as an `Authorization: Bearer` header.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a bearer token for the given audience.
    async fn token(&self, audience: TokenAudience) -> Result<String, CloudError>;
}

/// Token provider backed by pre-acquired tokens.
#[derive(Clone)]
pub struct StaticTokenProvider {
    management: String,
    vault: Option<String>,
}

impl StaticTokenProvider {
    /// Create a provider from an ARM token and an optional Key Vault token.
    pub fn new(management: impl Into<String>, vault: Option<String>) -> Self {
        Self {
            management: management.into(),
            vault,
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("management", &"<redacted>")
            .field("vault", &self.vault.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, audience: TokenAudience) -> Result<String, CloudError> {
        match audience {
            TokenAudience::ResourceManager => Ok(self.management.clone()),
            TokenAudience::KeyVault => self
                .vault
                .clone()
                .ok_or_else(|| CloudError::Auth("no Key Vault token configured".to_string())),
        }
    }
}

/// Read access to secrets held in Key Vault.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret value.
    ///
    /// `vault_id` is the ARM resource id of the vault. A `None` or empty
    /// `version` selects the latest version.
    async fn get_secret(
        &self,
        vault_id: &str,
        secret_name: &str,
        version: Option<&str>,
    ) -> Result<String, CloudError>;
}

/// ARM template deployments.
#[async_trait]
pub trait Deployments: Send + Sync {
    /// Create or update a deployment and wait for it to finish.
    async fn create_or_update_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: &DeploymentTemplate,
    ) -> Result<(), CloudError>;
}

/// Virtual machine operations needed to replace a node.
#[async_trait]
pub trait VirtualMachines: Send + Sync {
    /// Delete a VM and wait for the deletion to finish. Missing VMs are not an error.
    async fn delete_virtual_machine(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> Result<(), CloudError>;
}

/// Resource group operations.
#[async_trait]
pub trait ResourceGroups: Send + Sync {
    /// Delete a resource group and everything in it.
    async fn delete_resource_group(&self, name: &str) -> Result<(), CloudError>;
}
