//! Administrative cluster access.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::api::{CertificateProfile, ContainerService};
use crate::error::Error;

/// Produces an administrative kubeconfig for a cluster.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Kubeconfig bytes (YAML). With `refresh_certificates` the config is
    /// always rebuilt from the current certificate material.
    async fn get_kube_config(
        &self,
        cluster: &ContainerService,
        refresh_certificates: bool,
    ) -> Result<Vec<u8>, Error>;
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct KubeConfigFile {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
    contexts: Vec<NamedContext>,
    current_context: String,
}

#[derive(Serialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct NamedUser {
    name: String,
    user: UserEntry,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    client_certificate_data: String,
    client_key_data: String,
}

#[derive(Serialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Serialize)]
struct ContextEntry {
    cluster: String,
    user: String,
}

/// Renders kubeconfigs from the cluster's certificate profile.
#[derive(Default)]
pub struct CertificateKubeConfig {
    /// Rendered configs by cluster name, with the fingerprint they were built from.
    cache: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl CertificateKubeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn certificates(cluster: &ContainerService) -> Result<&CertificateProfile, Error> {
        cluster
            .properties
            .certificate_profile
            .as_ref()
            .filter(|c| c.is_complete())
            .ok_or_else(|| {
                Error::Infrastructure(format!(
                    "cluster '{}' has no complete certificate profile",
                    cluster.name
                ))
            })
    }

    fn fingerprint(server: &str, certs: &CertificateProfile) -> String {
        let mut hasher = Sha1::new();
        hasher.update(server.as_bytes());
        hasher.update(certs.ca_certificate.as_bytes());
        hasher.update(certs.kube_config_certificate.as_bytes());
        hasher.update(certs.kube_config_private_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Render the kubeconfig without consulting the cache.
    pub fn render(cluster: &ContainerService) -> Result<Vec<u8>, Error> {
        let certs = Self::certificates(cluster)?;
        let fqdn = cluster.properties.master_profile.resolved_fqdn(&cluster.location);
        if fqdn.is_empty() {
            return Err(Error::Infrastructure(format!(
                "cluster '{}' has no API server address",
                cluster.name
            )));
        }

        let name = cluster.properties.master_profile.dns_prefix.clone();
        let user = format!("{name}-admin");
        let file = KubeConfigFile {
            api_version: "v1",
            kind: "Config",
            clusters: vec![NamedCluster {
                name: name.clone(),
                cluster: ClusterEntry {
                    server: format!("https://{fqdn}"),
                    certificate_authority_data: STANDARD.encode(&certs.ca_certificate),
                },
            }],
            users: vec![NamedUser {
                name: user.clone(),
                user: UserEntry {
                    client_certificate_data: STANDARD.encode(&certs.kube_config_certificate),
                    client_key_data: STANDARD.encode(&certs.kube_config_private_key),
                },
            }],
            contexts: vec![NamedContext {
                name: name.clone(),
                context: ContextEntry {
                    cluster: name.clone(),
                    user,
                },
            }],
            current_context: name,
        };

        serde_yaml::to_string(&file)
            .map(String::into_bytes)
            .map_err(|e| Error::Infrastructure(format!("cannot render kubeconfig: {e}")))
    }
}

#[async_trait]
impl ClusterAccess for CertificateKubeConfig {
    async fn get_kube_config(
        &self,
        cluster: &ContainerService,
        refresh_certificates: bool,
    ) -> Result<Vec<u8>, Error> {
        let certs = Self::certificates(cluster)?;
        let fingerprint = Self::fingerprint(
            &cluster.properties.master_profile.resolved_fqdn(&cluster.location),
            certs,
        );

        if !refresh_certificates {
            let cache = self
                .cache
                .lock()
                .map_err(|_| Error::Infrastructure("kubeconfig cache poisoned".to_string()))?;
            if let Some((cached, config)) = cache.get(&cluster.name) {
                if *cached == fingerprint {
                    debug!(cluster = %cluster.name, "Reusing cached kubeconfig");
                    return Ok(config.clone());
                }
            }
        }

        info!(
            cluster = %cluster.name,
            refresh = refresh_certificates,
            "Rendering administrative kubeconfig"
        );
        let config = Self::render(cluster)?;
        self.cache
            .lock()
            .map_err(|_| Error::Infrastructure("kubeconfig cache poisoned".to_string()))?
            .insert(cluster.name.clone(), (fingerprint, config.clone()));
        Ok(config)
    }
}
