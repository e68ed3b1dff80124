//! Typed blocks of the flat configuration schema.
//!
//! Each struct mirrors one element of a nested list in the flat
//! representation. Optional keys are skipped when unset so absence, not a
//! zero value, reaches the configuration engine.

use serde::{Deserialize, Serialize};

/// Top-level keys.
pub mod keys {
    pub const NAME: &str = "name";
    pub const LOCATION: &str = "location";
    pub const RESOURCE_GROUP: &str = "resource_group";
    pub const KUBERNETES_VERSION: &str = "kubernetes_version";
    pub const LINUX_PROFILE: &str = "linux_profile";
    pub const WINDOWS_PROFILE: &str = "windows_profile";
    pub const SERVICE_PRINCIPAL: &str = "service_principal";
    pub const MASTER_PROFILE: &str = "master_profile";
    pub const AGENT_POOL_PROFILES: &str = "agent_pool_profiles";
    pub const TAGS: &str = "tags";
    pub const CERTIFICATE_PROFILE: &str = "certificate_profile";
    pub const API_MODEL: &str = "api_model";
}

/// `linux_profile` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxProfileBlock {
    pub admin_username: String,
    #[serde(default)]
    pub ssh: Vec<SshBlock>,
}

/// `linux_profile.0.ssh` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshBlock {
    #[serde(default)]
    pub public_key: Vec<PublicKeyBlock>,
}

/// `linux_profile.0.ssh.0.public_key` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyBlock {
    pub key_data: String,
}

/// `windows_profile` element.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsProfileBlock {
    pub admin_username: String,
    pub admin_password: String,
}

/// `service_principal` element.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePrincipalBlock {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_version: Option<String>,
}

/// `master_profile` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterProfileBlock {
    pub count: u32,
    pub dns_name_prefix: String,
    pub vm_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk_size: Option<u32>,
    /// Computed.
    #[serde(default)]
    pub fqdn: String,
}

/// `agent_pool_profiles` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPoolBlock {
    pub name: String,
    pub count: u32,
    pub vm_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk_size: Option<u32>,
    /// Only written for Windows pools; absence means Linux.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
}

/// `certificate_profile` element. PEM material for administrative access.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateProfileBlock {
    pub ca_certificate: String,
    pub kube_config_certificate: String,
    pub kube_config_private_key: String,
}

impl std::fmt::Debug for CertificateProfileBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateProfileBlock").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for WindowsProfileBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsProfileBlock")
            .field("admin_username", &self.admin_username)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ServicePrincipalBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePrincipalBlock")
            .field("client_id", &self.client_id)
            .field("vault_id", &self.vault_id)
            .field("secret_name", &self.secret_name)
            .finish_non_exhaustive()
    }
}
