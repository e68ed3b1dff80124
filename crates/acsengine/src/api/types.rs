//! Cluster specification types.
//!
//! Field names follow the acs-engine api model JSON so persisted blobs stay
//! readable by the engine's own tooling.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A container service (cluster) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerService {
    /// Resource id of the owning configuration resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Cluster name.
    pub name: String,
    /// Azure location.
    pub location: String,
    /// Resource group holding the cluster.
    #[serde(default)]
    pub resource_group: String,
    /// Resource tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Cluster properties.
    pub properties: Properties,
}

/// Cluster properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    /// Orchestrator type and version.
    pub orchestrator_profile: OrchestratorProfile,
    /// Control plane.
    pub master_profile: MasterProfile,
    /// Worker pools, in deployment order.
    #[serde(default)]
    pub agent_pool_profiles: Vec<AgentPoolProfile>,
    /// Linux admin credentials.
    pub linux_profile: LinuxProfile,
    /// Windows admin credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows_profile: Option<WindowsProfile>,
    /// Cluster identity.
    pub service_principal_profile: ServicePrincipalProfile,
    /// Certificates used for administrative cluster access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_profile: Option<CertificateProfile>,
}

/// Orchestrator profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorProfile {
    /// Orchestrator type (always `Kubernetes`).
    pub orchestrator_type: String,
    /// Control-plane version.
    pub orchestrator_version: String,
}

/// Control-plane profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterProfile {
    /// Number of control-plane nodes.
    pub count: u32,
    /// DNS prefix of the API server endpoint.
    pub dns_prefix: String,
    /// VM size.
    pub vm_size: String,
    /// OS disk size override in GB.
    #[serde(
        rename = "osDiskSizeGB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub os_disk_size_gb: Option<u32>,
    /// Fully qualified domain name of the API server.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fqdn: String,
}

/// Worker pool profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
    /// Pool name, unique within the cluster.
    pub name: String,
    /// Number of nodes.
    pub count: u32,
    /// VM size.
    pub vm_size: String,
    /// OS disk size override in GB.
    #[serde(
        rename = "osDiskSizeGB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub os_disk_size_gb: Option<u32>,
    /// Node operating system.
    #[serde(default)]
    pub os_type: OsType,
    /// Version the pool's nodes run. `None` means "same as the control plane".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator_version: Option<String>,
}

/// Node operating system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsType {
    #[default]
    Linux,
    Windows,
}

impl OsType {
    /// Name as written in configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "Linux",
            Self::Windows => "Windows",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Linux" => Ok(Self::Linux),
            "Windows" => Ok(Self::Windows),
            other => Err(Error::validation(
                "agent pool profile",
                format!("unknown os_type '{other}' (expected Linux or Windows)"),
            )),
        }
    }
}

/// Linux admin profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxProfile {
    /// Admin username.
    pub admin_username: String,
    /// SSH configuration.
    pub ssh: SshConfiguration,
}

/// SSH configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    /// Authorized public keys.
    #[serde(default)]
    pub public_keys: Vec<PublicKey>,
}

/// SSH public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Key data (`ssh-rsa AAAA...`).
    pub key_data: String,
}

/// Windows admin profile.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsProfile {
    /// Admin username.
    pub admin_username: String,
    /// Admin password.
    pub admin_password: String,
}

impl fmt::Debug for WindowsProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowsProfile")
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

/// Cluster identity.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipalProfile {
    /// Client (application) id.
    pub client_id: String,
    /// Inline client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Key Vault reference to the client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyvault_secret_ref: Option<KeyvaultSecretRef>,
}

impl fmt::Debug for ServicePrincipalProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalProfile")
            .field("client_id", &self.client_id)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("keyvault_secret_ref", &self.keyvault_secret_ref)
            .finish()
    }
}

/// Reference to a secret in Key Vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyvaultSecretRef {
    /// ARM resource id of the vault.
    #[serde(rename = "vaultID")]
    pub vault_id: String,
    /// Secret name.
    pub secret_name: String,
    /// Secret version, latest when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// PEM certificates for administrative access.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateProfile {
    /// Cluster CA certificate.
    #[serde(default)]
    pub ca_certificate: String,
    /// Admin client certificate.
    #[serde(default)]
    pub kube_config_certificate: String,
    /// Admin client private key.
    #[serde(default)]
    pub kube_config_private_key: String,
}

impl fmt::Debug for CertificateProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateProfile")
            .field("ca_certificate", &self.ca_certificate.len())
            .field("kube_config_certificate", &self.kube_config_certificate.len())
            .field("kube_config_private_key", &"<redacted>")
            .finish()
    }
}

impl CertificateProfile {
    /// Whether every certificate needed for a kubeconfig is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.ca_certificate.is_empty()
            && !self.kube_config_certificate.is_empty()
            && !self.kube_config_private_key.is_empty()
    }
}

fn disk_size(size: Option<u32>) -> Option<u32> {
    size.filter(|gb| *gb > 0)
}

impl MasterProfile {
    /// OS disk size, `None` when the platform default applies.
    #[must_use]
    pub fn os_disk_size(&self) -> Option<u32> {
        disk_size(self.os_disk_size_gb)
    }

    /// The recorded FQDN, or the one Azure assigns for the DNS prefix.
    #[must_use]
    pub fn resolved_fqdn(&self, location: &str) -> String {
        if self.fqdn.is_empty() && !location.is_empty() {
            format!("{}.{}.cloudapp.azure.com", self.dns_prefix, location)
        } else {
            self.fqdn.clone()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.count == 0 {
            return Err(Error::validation("master profile", "count must be at least 1"));
        }
        if self.dns_prefix.is_empty() {
            return Err(Error::validation("master profile", "dns_name_prefix is empty"));
        }
        if self.vm_size.is_empty() {
            return Err(Error::validation("master profile", "vm_size is empty"));
        }
        Ok(())
    }
}

impl AgentPoolProfile {
    /// OS disk size, `None` when the platform default applies.
    #[must_use]
    pub fn os_disk_size(&self) -> Option<u32> {
        disk_size(self.os_disk_size_gb)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::validation("agent pool profile", "name is empty"));
        }
        if self.count == 0 {
            return Err(Error::validation(
                format!("agent pool profile '{}'", self.name),
                "count must be at least 1",
            ));
        }
        if self.vm_size.is_empty() {
            return Err(Error::validation(
                format!("agent pool profile '{}'", self.name),
                "vm_size is empty",
            ));
        }
        Ok(())
    }
}

impl LinuxProfile {
    /// Public keys with non-empty key data.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ssh
            .public_keys
            .iter()
            .map(|k| k.key_data.as_str())
            .filter(|k| !k.is_empty())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.admin_username.is_empty() {
            return Err(Error::validation("linux profile", "admin_username is empty"));
        }
        if self.keys().next().is_none() {
            return Err(Error::validation(
                "linux profile",
                "at least one non-empty public key is required",
            ));
        }
        Ok(())
    }
}

impl WindowsProfile {
    pub fn validate(&self) -> Result<(), Error> {
        if self.admin_username.is_empty() {
            return Err(Error::validation("windows profile", "admin_username is empty"));
        }
        if self.admin_password.is_empty() {
            return Err(Error::validation("windows profile", "admin_password is empty"));
        }
        Ok(())
    }
}

impl ServicePrincipalProfile {
    pub fn validate(&self) -> Result<(), Error> {
        if self.client_id.is_empty() {
            return Err(Error::validation("service principal", "client_id is empty"));
        }
        let inline = self.secret.as_deref().is_some_and(|s| !s.is_empty());
        match (&self.keyvault_secret_ref, inline) {
            (Some(_), true) => Err(Error::validation(
                "service principal",
                "client_secret and a Key Vault reference are mutually exclusive",
            )),
            (Some(r), false) if r.vault_id.is_empty() || r.secret_name.is_empty() => {
                Err(Error::validation(
                    "service principal",
                    "Key Vault reference needs both vault_id and secret_name",
                ))
            }
            (None, false) => Err(Error::validation(
                "service principal",
                "either client_secret or vault_id and secret_name are required",
            )),
            _ => Ok(()),
        }
    }
}

impl ContainerService {
    /// Control-plane version.
    #[must_use]
    pub fn orchestrator_version(&self) -> &str {
        &self.properties.orchestrator_profile.orchestrator_version
    }

    /// Whether any worker pool runs Windows.
    #[must_use]
    pub fn has_windows(&self) -> bool {
        self.properties
            .agent_pool_profiles
            .iter()
            .any(|p| p.os_type == OsType::Windows)
    }

    /// Look up a worker pool by name.
    #[must_use]
    pub fn agent_pool(&self, name: &str) -> Option<&AgentPoolProfile> {
        self.properties
            .agent_pool_profiles
            .iter()
            .find(|p| p.name == name)
    }

    /// Look up a worker pool by name for modification.
    pub fn agent_pool_mut(&mut self, name: &str) -> Option<&mut AgentPoolProfile> {
        self.properties
            .agent_pool_profiles
            .iter_mut()
            .find(|p| p.name == name)
    }

    /// Version a pool's nodes currently run.
    #[must_use]
    pub fn agent_pool_version<'a>(&'a self, pool: &'a AgentPoolProfile) -> &'a str {
        pool.orchestrator_version
            .as_deref()
            .unwrap_or_else(|| self.orchestrator_version())
    }

    /// Check the specification's invariants.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::validation("cluster", "name is empty"));
        }
        if self.location.is_empty() {
            return Err(Error::validation("cluster", "location is empty"));
        }
        if self.orchestrator_version().is_empty() {
            return Err(Error::validation("orchestrator profile", "version is empty"));
        }

        let props = &self.properties;
        props.master_profile.validate()?;
        props.linux_profile.validate()?;
        props.service_principal_profile.validate()?;

        let mut seen = HashSet::new();
        for pool in &props.agent_pool_profiles {
            pool.validate()?;
            if !seen.insert(pool.name.as_str()) {
                return Err(Error::validation(
                    format!("agent pool profile '{}'", pool.name),
                    "pool names must be unique",
                ));
            }
        }

        match (&props.windows_profile, self.has_windows()) {
            (Some(windows), true) => windows.validate()?,
            (None, true) => {
                return Err(Error::validation(
                    "windows profile",
                    "required when an agent pool uses os_type Windows",
                ))
            }
            (Some(_), false) => {
                return Err(Error::validation(
                    "windows profile",
                    "only allowed when an agent pool uses os_type Windows",
                ))
            }
            (None, false) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_mock_cluster_is_valid() {
        let cluster = fixtures::mock_cluster("cluster", "southcentralus", "dnsprefix");
        cluster.validate().unwrap();
    }

    #[test]
    fn test_duplicate_pool_names_rejected() {
        let mut cluster = fixtures::mock_cluster("cluster", "southcentralus", "dnsprefix");
        let pool = cluster.properties.agent_pool_profiles[0].clone();
        cluster.properties.agent_pool_profiles.push(pool);
        let err = cluster.validate().unwrap_err();
        assert!(err.to_string().contains("unique"), "{err}");
    }

    #[test]
    fn test_windows_pool_requires_windows_profile() {
        let mut cluster = fixtures::mock_cluster("cluster", "southcentralus", "dnsprefix");
        cluster.properties.agent_pool_profiles[0].os_type = OsType::Windows;
        cluster.properties.windows_profile = None;
        assert!(cluster.validate().unwrap_err().is_validation());

        cluster.properties.windows_profile = Some(fixtures::mock_windows_profile("azureuser", "password"));
        cluster.validate().unwrap();
    }

    #[test]
    fn test_windows_profile_without_windows_pool_rejected() {
        let mut cluster = fixtures::mock_cluster("cluster", "southcentralus", "dnsprefix");
        cluster.properties.windows_profile = Some(fixtures::mock_windows_profile("azureuser", "password"));
        assert!(cluster.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_service_principal_secret_sources() {
        let mut sp = fixtures::mock_service_principal("client", "vault");
        sp.validate().unwrap();

        sp.secret = Some("inline".to_string());
        assert!(sp.validate().is_err(), "both sources must be rejected");

        sp.keyvault_secret_ref = None;
        sp.validate().unwrap();

        sp.secret = None;
        assert!(sp.validate().is_err(), "no source must be rejected");
    }

    #[test]
    fn test_resolved_fqdn() {
        let mut master = fixtures::mock_master_profile(1, "prefix", "Standard_D2_v2", "", 0);
        assert_eq!(
            master.resolved_fqdn("westus"),
            "prefix.westus.cloudapp.azure.com"
        );
        master.fqdn = "custom.example.com".to_string();
        assert_eq!(master.resolved_fqdn("westus"), "custom.example.com");
    }

    #[test]
    fn test_agent_pool_version_falls_back_to_control_plane() {
        let mut cluster = fixtures::mock_cluster("cluster", "southcentralus", "dnsprefix");
        let pool = cluster.properties.agent_pool_profiles[0].clone();
        assert_eq!(cluster.agent_pool_version(&pool), "1.10.0");

        cluster.properties.agent_pool_profiles[0].orchestrator_version = Some("1.9.0".to_string());
        let pool = cluster.properties.agent_pool_profiles[0].clone();
        assert_eq!(cluster.agent_pool_version(&pool), "1.9.0");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut sp = fixtures::mock_service_principal("client", "vault");
        sp.secret = Some("hunter2".to_string());
        assert!(!format!("{sp:?}").contains("hunter2"));

        let windows = fixtures::mock_windows_profile("azureuser", "hunter2");
        assert!(!format!("{windows:?}").contains("hunter2"));
    }
}
