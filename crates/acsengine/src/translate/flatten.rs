//! Cluster specification → flat configuration.

use serde::Serialize;
use serde_json::Value;

use crate::api::{
    AgentPoolProfile, CertificateProfile, LinuxProfile, MasterProfile, OsType,
    ServicePrincipalProfile, WindowsProfile,
};
use crate::error::Error;
use crate::resource::FlatMap;
use crate::schema::{
    AgentPoolBlock, CertificateProfileBlock, LinuxProfileBlock, MasterProfileBlock,
    PublicKeyBlock, ServicePrincipalBlock, SshBlock, WindowsProfileBlock,
};

fn to_flat<T: Serialize>(profile: &str, block: &T) -> Result<FlatMap, Error> {
    match serde_json::to_value(block) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::validation(
            profile,
            format!("flattened to a non-map value: {other}"),
        )),
        Err(e) => Err(Error::validation(profile, e.to_string())),
    }
}

/// Flatten the Linux admin profile. Empty keys are dropped.
pub fn flatten_linux_profile(profile: &LinuxProfile) -> Result<Vec<FlatMap>, Error> {
    profile.validate()?;

    let block = LinuxProfileBlock {
        admin_username: profile.admin_username.clone(),
        ssh: vec![SshBlock {
            public_key: profile
                .keys()
                .map(|key| PublicKeyBlock {
                    key_data: key.to_string(),
                })
                .collect(),
        }],
    };

    Ok(vec![to_flat("linux profile", &block)?])
}

/// Flatten the optional Windows admin profile; `None` flattens to an empty list.
pub fn flatten_windows_profile(profile: Option<&WindowsProfile>) -> Result<Vec<FlatMap>, Error> {
    let Some(profile) = profile else {
        return Ok(Vec::new());
    };
    profile.validate()?;

    let block = WindowsProfileBlock {
        admin_username: profile.admin_username.clone(),
        admin_password: profile.admin_password.clone(),
    };

    Ok(vec![to_flat("windows profile", &block)?])
}

/// Flatten the cluster identity for the managed resource.
pub fn flatten_service_principal(profile: &ServicePrincipalProfile) -> Result<Vec<FlatMap>, Error> {
    profile.validate()?;

    let secret_ref = profile.keyvault_secret_ref.as_ref();
    let block = ServicePrincipalBlock {
        client_id: profile.client_id.clone(),
        client_secret: profile.secret.clone().filter(|s| !s.is_empty()),
        vault_id: secret_ref.map(|r| r.vault_id.clone()),
        secret_name: secret_ref.map(|r| r.secret_name.clone()),
        secret_version: secret_ref.and_then(|r| r.version.clone()),
    };

    Ok(vec![to_flat("service principal", &block)?])
}

/// Flatten the cluster identity for the read-only data source: client id only.
pub fn flatten_data_source_service_principal(
    profile: &ServicePrincipalProfile,
) -> Result<Vec<FlatMap>, Error> {
    if profile.client_id.is_empty() {
        return Err(Error::validation("service principal", "client_id is empty"));
    }

    let block = ServicePrincipalBlock {
        client_id: profile.client_id.clone(),
        ..ServicePrincipalBlock::default()
    };

    Ok(vec![to_flat("service principal", &block)?])
}

/// Flatten the control-plane profile. `location` is used to derive the FQDN
/// when the specification does not record one.
pub fn flatten_master_profile(profile: &MasterProfile, location: &str) -> Result<Vec<FlatMap>, Error> {
    profile.validate()?;

    let block = MasterProfileBlock {
        count: profile.count,
        dns_name_prefix: profile.dns_prefix.clone(),
        vm_size: profile.vm_size.clone(),
        os_disk_size: profile.os_disk_size(),
        fqdn: profile.resolved_fqdn(location),
    };

    Ok(vec![to_flat("master profile", &block)?])
}

/// Flatten worker pools, preserving order.
pub fn flatten_agent_pool_profiles(profiles: &[AgentPoolProfile]) -> Result<Vec<FlatMap>, Error> {
    profiles
        .iter()
        .map(|profile| {
            profile.validate()?;
            let block = AgentPoolBlock {
                name: profile.name.clone(),
                count: profile.count,
                vm_size: profile.vm_size.clone(),
                os_disk_size: profile.os_disk_size(),
                os_type: (profile.os_type == OsType::Windows)
                    .then(|| OsType::Windows.as_str().to_string()),
            };
            to_flat("agent pool profile", &block)
        })
        .collect()
}

/// Flatten the administrative certificates; `None` flattens to an empty list.
pub fn flatten_certificate_profile(
    profile: Option<&CertificateProfile>,
) -> Result<Vec<FlatMap>, Error> {
    let Some(profile) = profile else {
        return Ok(Vec::new());
    };
    if !profile.is_complete() {
        return Err(Error::validation(
            "certificate profile",
            "ca_certificate, kube_config_certificate and kube_config_private_key are required",
        ));
    }

    let block = CertificateProfileBlock {
        ca_certificate: profile.ca_certificate.clone(),
        kube_config_certificate: profile.kube_config_certificate.clone(),
        kube_config_private_key: profile.kube_config_private_key.clone(),
    };

    Ok(vec![to_flat("certificate profile", &block)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PublicKey, SshConfiguration};
    use crate::fixtures;
    use serde_json::json;

    #[test]
    fn test_flatten_linux_profile() {
        let profile = fixtures::mock_linux_profile("adminUser", "public key data");

        let linux_profile = flatten_linux_profile(&profile).unwrap();

        assert_eq!(linux_profile.len(), 1, "did not find linux profile");
        assert_eq!(linux_profile[0]["admin_username"], json!("adminUser"));
        assert_eq!(
            linux_profile[0]["ssh"][0]["public_key"][0]["key_data"],
            json!("public key data")
        );
    }

    #[test]
    fn test_flatten_unset_linux_profile() {
        let profile = LinuxProfile {
            admin_username: String::new(),
            ssh: SshConfiguration {
                public_keys: vec![PublicKey {
                    key_data: String::new(),
                }],
            },
        };
        assert!(flatten_linux_profile(&profile).unwrap_err().is_validation());
    }

    #[test]
    fn test_flatten_linux_profile_with_only_empty_keys() {
        let mut profile = fixtures::mock_linux_profile("adminUser", "");
        profile.ssh.public_keys.push(PublicKey::default());
        assert!(flatten_linux_profile(&profile).is_err());
    }

    #[test]
    fn test_flatten_linux_profile_drops_empty_keys() {
        let mut profile = fixtures::mock_linux_profile("adminUser", "key one");
        profile.ssh.public_keys.push(PublicKey::default());

        let linux_profile = flatten_linux_profile(&profile).unwrap();
        let keys = linux_profile[0]["ssh"][0]["public_key"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_flatten_windows_profile() {
        let profile = fixtures::mock_windows_profile("adminUser", "password");

        let windows_profile = flatten_windows_profile(Some(&profile)).unwrap();

        assert_eq!(windows_profile.len(), 1, "did not find windows profile");
        assert_eq!(windows_profile[0]["admin_username"], json!("adminUser"));
        assert_eq!(windows_profile[0]["admin_password"], json!("password"));
    }

    #[test]
    fn test_flatten_unset_windows_profile() {
        let windows_profile = flatten_windows_profile(None).unwrap();
        assert!(windows_profile.is_empty(), "did not find zero Windows profiles");
    }

    #[test]
    fn test_flatten_service_principal() {
        let profile = fixtures::mock_service_principal("client id", "vault id");

        let service_principal = flatten_service_principal(&profile).unwrap();

        assert_eq!(service_principal.len(), 1, "did not find one service principal");
        assert_eq!(service_principal[0]["client_id"], json!("client id"));
        assert_eq!(service_principal[0]["vault_id"], json!("vault id"));
        assert!(!service_principal[0].contains_key("client_secret"));
    }

    #[test]
    fn test_flatten_unset_service_principal() {
        let profile = ServicePrincipalProfile::default();
        assert!(flatten_service_principal(&profile).is_err());
    }

    #[test]
    fn test_flatten_data_source_service_principal() {
        let profile = fixtures::mock_service_principal("client id", "id");

        let service_principal = flatten_data_source_service_principal(&profile).unwrap();

        assert_eq!(service_principal.len(), 1);
        assert_eq!(service_principal[0]["client_id"], json!("client id"));
        assert_eq!(service_principal[0].len(), 1, "only client_id is exposed");
    }

    #[test]
    fn test_flatten_unset_data_source_service_principal() {
        let profile = ServicePrincipalProfile::default();
        assert!(flatten_data_source_service_principal(&profile).is_err());
    }

    #[test]
    fn test_flatten_master_profile() {
        let profile = fixtures::mock_master_profile(1, "testPrefix", "Standard_D2_v2", "abcdefg", 0);

        let master_profile = flatten_master_profile(&profile, "southcentralus").unwrap();

        assert_eq!(master_profile.len(), 1, "did not find one master profile");
        assert_eq!(master_profile[0]["count"], json!(1));
        assert_eq!(master_profile[0]["fqdn"], json!("abcdefg"));
        assert!(
            !master_profile[0].contains_key("os_disk_size"),
            "OS disk size should not be set"
        );
    }

    #[test]
    fn test_flatten_master_profile_with_os_disk_size() {
        let profile = fixtures::mock_master_profile(1, "testPrefix", "Standard_D2_v2", "abcdefg", 30);

        let master_profile = flatten_master_profile(&profile, "southcentralus").unwrap();

        assert_eq!(master_profile[0]["count"], json!(1));
        assert_eq!(master_profile[0]["os_disk_size"], json!(30));
    }

    #[test]
    fn test_flatten_master_profile_derives_fqdn() {
        let profile = fixtures::mock_master_profile(3, "testPrefix", "Standard_D2_v2", "", 0);

        let master_profile = flatten_master_profile(&profile, "southcentralus").unwrap();

        assert_eq!(
            master_profile[0]["fqdn"],
            json!("testPrefix.southcentralus.cloudapp.azure.com")
        );
    }

    #[test]
    fn test_flatten_unset_master_profile() {
        let profile = MasterProfile::default();
        assert!(flatten_master_profile(&profile, "").is_err());
    }

    #[test]
    fn test_flatten_agent_pool_profiles() {
        let profile1 = fixtures::mock_agent_pool_profile("agentpool1", 1, "Standard_D2_v2", 0, false);
        let profile2 = fixtures::mock_agent_pool_profile("agentpool2", 1, "Standard_D2_v2", 200, false);

        let agent_pool_profiles = flatten_agent_pool_profiles(&[profile1, profile2]).unwrap();

        assert_eq!(agent_pool_profiles.len(), 2);
        assert_eq!(agent_pool_profiles[0]["count"], json!(1));
        assert!(
            !agent_pool_profiles[0].contains_key("os_disk_size"),
            "agent pool OS disk size should not be set"
        );
        assert_eq!(agent_pool_profiles[1]["name"], json!("agentpool2"));
        assert_eq!(agent_pool_profiles[1]["os_disk_size"], json!(200));
    }

    #[test]
    fn test_flatten_agent_pool_profiles_with_os_type() {
        let profile1 = fixtures::mock_agent_pool_profile("agentpool1", 1, "Standard_D2_v2", 0, false);
        let profile2 = fixtures::mock_agent_pool_profile("agentpool2", 1, "Standard_D2_v2", 0, true);

        let agent_pool_profiles = flatten_agent_pool_profiles(&[profile1, profile2]).unwrap();

        assert!(
            !agent_pool_profiles[0].contains_key("os_type"),
            "Linux pools omit os_type"
        );
        assert_eq!(agent_pool_profiles[1]["name"], json!("agentpool2"));
        assert_eq!(agent_pool_profiles[1]["os_type"], json!("Windows"));
    }

    #[test]
    fn test_flatten_agent_pool_profiles_with_explicit_zero_disk() {
        let mut profile = fixtures::mock_agent_pool_profile("agentpool1", 1, "Standard_D2_v2", 0, false);
        profile.os_disk_size_gb = Some(0);

        let agent_pool_profiles = flatten_agent_pool_profiles(&[profile]).unwrap();
        assert!(!agent_pool_profiles[0].contains_key("os_disk_size"));
    }

    #[test]
    fn test_flatten_unset_agent_pool_profiles() {
        let profiles = [AgentPoolProfile::default()];
        assert!(flatten_agent_pool_profiles(&profiles).is_err());
    }

    #[test]
    fn test_flatten_certificate_profile() {
        let profile = fixtures::mock_certificate_profile();

        let certificate_profile = flatten_certificate_profile(Some(&profile)).unwrap();

        assert_eq!(certificate_profile.len(), 1);
        assert_eq!(
            certificate_profile[0]["kube_config_private_key"],
            json!(profile.kube_config_private_key)
        );
        assert!(flatten_certificate_profile(None).unwrap().is_empty());

        let incomplete = CertificateProfile {
            ca_certificate: String::new(),
            ..profile
        };
        assert!(flatten_certificate_profile(Some(&incomplete)).is_err());
    }
}
