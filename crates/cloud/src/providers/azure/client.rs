//! Azure Resource Manager client implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::models::{
    endpoints, CreateDeploymentProperties, CreateDeploymentRequest, Deployment, DeploymentMode,
    DeploymentTemplate, SecretBundle, Vault,
};
use crate::providers::traits::{
    CloudError, Deployments, ResourceGroups, SecretStore, TokenAudience, TokenProvider,
    VirtualMachines,
};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Polling interval when waiting for long-running operations.
const POLL_INTERVAL_SECS: u64 = 15;

/// Upper bound for a single long-running operation.
const OPERATION_TIMEOUT_SECS: u64 = 3600;

/// Azure API version for deployments and resource groups.
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Azure API version for Compute.
const COMPUTE_API_VERSION: &str = "2023-09-01";

/// Azure API version for Key Vault management.
const KEYVAULT_MGMT_API_VERSION: &str = "2019-09-01";

/// Key Vault data plane API version.
const KEYVAULT_API_VERSION: &str = "7.0";

/// Azure Resource Manager client.
///
/// One instance is built per provider invocation and shared by reference;
/// it owns the HTTP connection pool and the token source.
#[derive(Clone)]
pub struct ArmClient {
    /// HTTP client.
    client: Client,
    /// Subscription ID.
    subscription_id: String,
    /// Bearer token source.
    tokens: Arc<dyn TokenProvider>,
    /// Resource Manager endpoint without trailing slash.
    endpoint: String,
    /// Interval between polls of long-running operations.
    poll_interval: Duration,
    /// Upper bound for long-running operations.
    operation_timeout: Duration,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("subscription_id", &self.subscription_id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ArmClient {
    /// Create a new client for the public cloud.
    ///
    /// # Arguments
    /// * `subscription_id` - Azure subscription ID
    /// * `tokens` - bearer token source
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(
        subscription_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(CloudError::Http)?;

        Ok(Self {
            client,
            subscription_id: subscription_id.into(),
            tokens,
            endpoint: endpoints::PUBLIC.to_string(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            operation_timeout: Duration::from_secs(OPERATION_TIMEOUT_SECS),
        })
    }

    /// Target a different Resource Manager endpoint.
    ///
    /// # Errors
    /// Returns error if the endpoint is not a valid URL.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, CloudError> {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| CloudError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        self.endpoint = parsed.as_str().trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Change how often long-running operations are polled.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Change the upper bound for long-running operations.
    #[must_use]
    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    /// Subscription this client operates in.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Get Azure Resource Manager subscription URL.
    fn subscription_url(&self) -> String {
        format!("{}/subscriptions/{}", self.endpoint, self.subscription_id)
    }

    fn deployment_url(&self, resource_group: &str, deployment_name: &str) -> String {
        format!(
            "{}/resourcegroups/{}/providers/Microsoft.Resources/deployments/{}?api-version={}",
            self.subscription_url(),
            resource_group,
            deployment_name,
            RESOURCES_API_VERSION
        )
    }

    fn virtual_machine_url(&self, resource_group: &str, vm_name: &str) -> String {
        format!(
            "{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}?api-version={}",
            self.subscription_url(),
            resource_group,
            vm_name,
            COMPUTE_API_VERSION
        )
    }

    fn resource_group_url(&self, name: &str) -> String {
        format!(
            "{}/resourcegroups/{}?api-version={}",
            self.subscription_url(),
            name,
            RESOURCES_API_VERSION
        )
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        audience: TokenAudience,
    ) -> Result<T, CloudError> {
        debug!(url = %url, "GET request");

        let token = self.tokens.token(audience).await?;
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated PUT request.
    async fn put<T, B>(&self, url: &str, body: &B) -> Result<T, CloudError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        debug!(url = %url, "PUT request");

        let token = self.tokens.token(TokenAudience::ResourceManager).await?;
        let response = self
            .client
            .put(url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated DELETE request. Missing resources are treated as deleted.
    async fn delete(&self, url: &str) -> Result<(), CloudError> {
        debug!(url = %url, "DELETE request");

        let token = self.tokens.token(TokenAudience::ResourceManager).await?;
        let response = self
            .client
            .delete(url)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::ACCEPTED || status == StatusCode::NOT_FOUND
        {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(CloudError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Handle API response.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, "Failed to parse response");
                CloudError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(CloudError::NotFound(text))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(CloudError::Auth(text))
        } else {
            Err(CloudError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Poll a resource until GET returns 404.
    async fn wait_gone(&self, url: &str) -> Result<(), CloudError> {
        let start = std::time::Instant::now();

        loop {
            match self
                .get::<serde_json::Value>(url, TokenAudience::ResourceManager)
                .await
            {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => {
                    debug!(
                        url = %url,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Resource still present"
                    );
                }
            }

            if start.elapsed() > self.operation_timeout {
                return Err(CloudError::Timeout(self.operation_timeout.as_secs()));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll a deployment until it reaches a terminal provisioning state.
    async fn wait_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> Result<(), CloudError> {
        let url = self.deployment_url(resource_group, deployment_name);
        let start = std::time::Instant::now();

        loop {
            let deployment: Deployment = self.get(&url, TokenAudience::ResourceManager).await?;
            let state = deployment.provisioning_state().to_string();

            debug!(
                deployment = %deployment_name,
                state = %state,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling deployment status"
            );

            match state.as_str() {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" => {
                    let message = deployment
                        .properties
                        .and_then(|p| p.error)
                        .map_or_else(
                            || format!("deployment {deployment_name} {state}"),
                            |e| format!("{}: {}", e.code, e.message),
                        );
                    return Err(CloudError::Api {
                        status: 500,
                        message,
                    });
                }
                _ => {}
            }

            if start.elapsed() > self.operation_timeout {
                return Err(CloudError::Timeout(self.operation_timeout.as_secs()));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl SecretStore for ArmClient {
    async fn get_secret(
        &self,
        vault_id: &str,
        secret_name: &str,
        version: Option<&str>,
    ) -> Result<String, CloudError> {
        if !vault_id.starts_with('/') {
            return Err(CloudError::Config(format!(
                "vault id '{vault_id}' is not a resource id"
            )));
        }

        let vault_url = format!(
            "{}{}?api-version={}",
            self.endpoint, vault_id, KEYVAULT_MGMT_API_VERSION
        );
        let vault: Vault = self.get(&vault_url, TokenAudience::ResourceManager).await?;

        let version = version.unwrap_or_default();
        let secret_url = format!(
            "{}/secrets/{}/{}?api-version={}",
            vault.properties.vault_uri.trim_end_matches('/'),
            secret_name,
            version,
            KEYVAULT_API_VERSION
        );

        debug!(vault = %vault.name, secret = %secret_name, "Fetching secret");

        let bundle: SecretBundle = self.get(&secret_url, TokenAudience::KeyVault).await?;
        Ok(bundle.value)
    }
}

#[async_trait]
impl Deployments for ArmClient {
    async fn create_or_update_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: &DeploymentTemplate,
    ) -> Result<(), CloudError> {
        info!(
            resource_group = %resource_group,
            deployment = %deployment_name,
            "Creating deployment"
        );

        let body = CreateDeploymentRequest {
            properties: CreateDeploymentProperties {
                mode: DeploymentMode::Incremental,
                template: &template.template,
                parameters: &template.parameters,
            },
        };

        let url = self.deployment_url(resource_group, deployment_name);
        let _: Deployment = self.put(&url, &body).await?;

        self.wait_deployment(resource_group, deployment_name).await?;

        info!(deployment = %deployment_name, "Deployment succeeded");
        Ok(())
    }
}

#[async_trait]
impl VirtualMachines for ArmClient {
    async fn delete_virtual_machine(
        &self,
        resource_group: &str,
        vm_name: &str,
    ) -> Result<(), CloudError> {
        info!(vm_name = %vm_name, "Deleting virtual machine");

        let url = self.virtual_machine_url(resource_group, vm_name);
        self.delete(&url).await?;
        self.wait_gone(&url).await?;

        info!(vm_name = %vm_name, "Virtual machine deleted");
        Ok(())
    }
}

#[async_trait]
impl ResourceGroups for ArmClient {
    async fn delete_resource_group(&self, name: &str) -> Result<(), CloudError> {
        info!(resource_group = %name, "Deleting resource group");

        let url = self.resource_group_url(name);
        self.delete(&url).await?;
        self.wait_gone(&url).await?;

        info!(resource_group = %name, "Resource group deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::traits::StaticTokenProvider;

    fn client() -> ArmClient {
        ArmClient::new(
            "00000000-0000-0000-0000-000000000000",
            Arc::new(StaticTokenProvider::new("token", None)),
        )
        .unwrap()
    }

    #[test]
    fn test_deployment_url() {
        let url = client().deployment_url("rg", "cluster");
        assert_eq!(
            url,
            "https://management.azure.com/subscriptions/00000000-0000-0000-0000-000000000000/resourcegroups/rg/providers/Microsoft.Resources/deployments/cluster?api-version=2021-04-01"
        );
    }

    #[test]
    fn test_with_endpoint_trims_trailing_slash() {
        let client = client().with_endpoint("http://127.0.0.1:8080/").unwrap();
        assert!(client
            .resource_group_url("rg")
            .starts_with("http://127.0.0.1:8080/subscriptions/"));
    }

    #[test]
    fn test_with_endpoint_rejects_garbage() {
        assert!(matches!(
            client().with_endpoint("not a url"),
            Err(CloudError::Config(_))
        ));
    }

    #[test]
    fn test_deployment_state() {
        let deployment: Deployment = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/x/resourceGroups/rg/providers/Microsoft.Resources/deployments/d",
            "name": "d",
            "properties": { "provisioningState": "Running" }
        }))
        .unwrap();
        assert_eq!(deployment.provisioning_state(), "Running");
    }
}
