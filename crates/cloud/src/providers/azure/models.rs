//! Azure API data models.

use serde::{Deserialize, Serialize};

// ============================================================================
// Deployment types
// ============================================================================

/// An ARM template together with its parameter values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTemplate {
    /// Template body (`$schema`, `parameters`, `resources`, ...).
    pub template: serde_json::Value,
    /// Parameter values keyed by parameter name, each `{ "value": ... }`.
    pub parameters: serde_json::Value,
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentMode {
    /// Add or update resources, leave everything else alone.
    Incremental,
    /// Make the resource group match the template exactly.
    Complete,
}

/// Create deployment request.
#[derive(Debug, Serialize)]
pub struct CreateDeploymentRequest<'a> {
    /// Properties.
    pub properties: CreateDeploymentProperties<'a>,
}

/// Create deployment properties.
#[derive(Debug, Serialize)]
pub struct CreateDeploymentProperties<'a> {
    /// Deployment mode.
    pub mode: DeploymentMode,
    /// Template body.
    pub template: &'a serde_json::Value,
    /// Parameter values.
    pub parameters: &'a serde_json::Value,
}

/// Deployment resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    /// Resource ID.
    #[serde(default)]
    pub id: String,
    /// Deployment name.
    #[serde(default)]
    pub name: String,
    /// Properties.
    pub properties: Option<DeploymentProperties>,
}

/// Deployment properties.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentProperties {
    /// Provisioning state (`Accepted`, `Running`, `Succeeded`, `Failed`, `Canceled`).
    pub provisioning_state: String,
    /// Error details when the deployment failed.
    pub error: Option<ErrorDetail>,
}

/// ARM error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    /// Error code.
    #[serde(default)]
    pub code: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

impl Deployment {
    /// Current provisioning state, empty when the service did not report one.
    #[must_use]
    pub fn provisioning_state(&self) -> &str {
        self.properties
            .as_ref()
            .map_or("", |p| p.provisioning_state.as_str())
    }
}

// ============================================================================
// Key Vault types
// ============================================================================

/// Key Vault resource (management plane).
#[derive(Debug, Clone, Deserialize)]
pub struct Vault {
    /// Resource ID.
    pub id: String,
    /// Vault name.
    pub name: String,
    /// Properties.
    pub properties: VaultProperties,
}

/// Key Vault properties.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultProperties {
    /// Data plane URI (e.g. `https://myvault.vault.azure.net/`).
    pub vault_uri: String,
}

/// Secret bundle (data plane).
#[derive(Debug, Clone, Deserialize)]
pub struct SecretBundle {
    /// Secret value.
    pub value: String,
    /// Secret identifier including version.
    #[serde(default)]
    pub id: String,
}

// ============================================================================
// Common Azure constants
// ============================================================================

/// Azure Resource Manager endpoints.
pub mod endpoints {
    /// Public cloud.
    pub const PUBLIC: &str = "https://management.azure.com";
    /// Azure China.
    pub const CHINA: &str = "https://management.chinacloudapi.cn";
    /// Azure US Government.
    pub const US_GOVERNMENT: &str = "https://management.usgovcloudapi.net";
}
