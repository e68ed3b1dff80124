//! Cluster Specification Store.
//!
//! The cluster specification is persisted in the `api_model` attribute as
//! base64-encoded JSON. That blob, not the flat configuration, is the source
//! of truth once a cluster exists.

use std::fmt;

use acs_cloud::SecretStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info};

use crate::api::ContainerService;
use crate::error::Error;
use crate::resource::ResourceData;
use crate::schema::keys;
use crate::translate;

/// A resolved client secret. Never part of a [`ContainerService`], so it is
/// never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret(String);

impl ClientSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(<redacted>)")
    }
}

/// A cluster specification together with its resolved credential.
#[derive(Debug, Clone)]
pub struct LoadedCluster {
    pub cluster: ContainerService,
    /// Present when credentials were validated.
    pub credential: Option<ClientSecret>,
}

/// Serialize the specification as base64-encoded JSON.
pub fn encode_api_model(cluster: &ContainerService) -> Result<String, Error> {
    let json = serde_json::to_vec(cluster)
        .map_err(|e| Error::validation("cluster", format!("cannot serialize api model: {e}")))?;
    Ok(STANDARD.encode(json))
}

pub fn decode_api_model(blob: &str) -> Result<ContainerService, Error> {
    let bytes = STANDARD
        .decode(blob.trim())
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))?;
    let json = String::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
    Ok(serde_json::from_str(&json)?)
}

/// Persist the specification into the `api_model` attribute.
pub fn set_state_api_model(d: &mut ResourceData, cluster: &ContainerService) -> Result<(), Error> {
    let blob = encode_api_model(cluster)?;
    d.set(keys::API_MODEL, blob)?;
    debug!(cluster = %cluster.name, "Persisted api model");
    Ok(())
}

/// Load the specification from the persisted blob, or build it from the
/// flat configuration when no blob exists yet.
pub fn load_container_service_from_apimodel(d: &ResourceData) -> Result<ContainerService, Error> {
    if let Some(blob) = d.get_str(keys::API_MODEL) {
        let mut cluster = decode_api_model(blob)?;
        if cluster.id.is_empty() {
            cluster.id = d.id().to_string();
        }
        return Ok(cluster);
    }

    if d.get_ok(keys::NAME).is_none() {
        return Err(Error::not_found(
            "api model",
            "no api_model blob and no cluster configuration",
        ));
    }

    debug!("No api model persisted, building from configuration");
    translate::set_container_service(d)
}

/// Load the specification and, when `validate_credentials` is set, resolve
/// the identity's client secret.
pub async fn load_cluster(
    d: &ResourceData,
    validate_credentials: bool,
    secrets: &dyn SecretStore,
) -> Result<LoadedCluster, Error> {
    let cluster = load_container_service_from_apimodel(d)?;

    let credential = if validate_credentials {
        cluster.validate()?;
        Some(resolve_client_secret(&cluster, secrets).await?)
    } else {
        None
    };

    Ok(LoadedCluster {
        cluster,
        credential,
    })
}

/// The identity's client secret, read from Key Vault when referenced there.
pub async fn resolve_client_secret(
    cluster: &ContainerService,
    secrets: &dyn SecretStore,
) -> Result<ClientSecret, Error> {
    let profile = &cluster.properties.service_principal_profile;

    if let Some(secret_ref) = &profile.keyvault_secret_ref {
        info!(
            cluster = %cluster.name,
            secret = %secret_ref.secret_name,
            "Resolving service principal secret from Key Vault"
        );
        let value = secrets
            .get_secret(
                &secret_ref.vault_id,
                &secret_ref.secret_name,
                secret_ref.version.as_deref(),
            )
            .await
            .map_err(|e| {
                Error::Credential(format!(
                    "cannot read secret '{}' from vault '{}': {e}",
                    secret_ref.secret_name, secret_ref.vault_id
                ))
            })?;
        if value.is_empty() {
            return Err(Error::Credential(format!(
                "secret '{}' is empty",
                secret_ref.secret_name
            )));
        }
        return Ok(ClientSecret::new(value));
    }

    match profile.secret.as_deref() {
        Some(secret) if !secret.is_empty() => Ok(ClientSecret::new(secret)),
        _ => Err(Error::Credential(
            "service principal has neither a secret nor a Key Vault reference".to_string(),
        )),
    }
}
