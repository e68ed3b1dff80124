//! Flat configuration → cluster specification.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::api::{
    AgentPoolProfile, CertificateProfile, KeyvaultSecretRef, LinuxProfile, MasterProfile, OsType,
    PublicKey, ServicePrincipalProfile, SshConfiguration, WindowsProfile,
};
use crate::error::Error;
use crate::resource::ResourceData;
use crate::schema::{
    keys, AgentPoolBlock, CertificateProfileBlock, LinuxProfileBlock, MasterProfileBlock,
    ServicePrincipalBlock, WindowsProfileBlock,
};

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

pub fn expand_linux_profile(d: &ResourceData) -> Result<LinuxProfile, Error> {
    let block: LinuxProfileBlock = d
        .get_block(keys::LINUX_PROFILE)?
        .ok_or_else(|| Error::validation("linux profile", "linux_profile is required"))?;

    let public_keys = block
        .ssh
        .into_iter()
        .flat_map(|ssh| ssh.public_key)
        .filter(|key| !key.key_data.is_empty())
        .map(|key| PublicKey {
            key_data: key.key_data,
        })
        .collect();

    let profile = LinuxProfile {
        admin_username: block.admin_username,
        ssh: SshConfiguration { public_keys },
    };
    profile.validate()?;
    Ok(profile)
}

/// `None` when no `windows_profile` block is configured.
pub fn expand_windows_profile(d: &ResourceData) -> Result<Option<WindowsProfile>, Error> {
    let Some(block) = d.get_block::<WindowsProfileBlock>(keys::WINDOWS_PROFILE)? else {
        return Ok(None);
    };

    let profile = WindowsProfile {
        admin_username: block.admin_username,
        admin_password: block.admin_password,
    };
    profile.validate()?;
    Ok(Some(profile))
}

pub fn expand_service_principal(d: &ResourceData) -> Result<ServicePrincipalProfile, Error> {
    let block: ServicePrincipalBlock = d
        .get_block(keys::SERVICE_PRINCIPAL)?
        .ok_or_else(|| Error::validation("service principal", "service_principal is required"))?;

    let vault_id = non_empty(block.vault_id);
    let secret_name = non_empty(block.secret_name);
    let keyvault_secret_ref = (vault_id.is_some() || secret_name.is_some()).then(|| {
        KeyvaultSecretRef {
            vault_id: vault_id.unwrap_or_default(),
            secret_name: secret_name.unwrap_or_default(),
            version: non_empty(block.secret_version),
        }
    });

    let profile = ServicePrincipalProfile {
        client_id: block.client_id,
        secret: non_empty(block.client_secret),
        keyvault_secret_ref,
    };
    profile.validate()?;
    Ok(profile)
}

pub fn expand_master_profile(d: &ResourceData) -> Result<MasterProfile, Error> {
    let block: MasterProfileBlock = d
        .get_block(keys::MASTER_PROFILE)?
        .ok_or_else(|| Error::validation("master profile", "master_profile is required"))?;

    let profile = MasterProfile {
        count: block.count,
        dns_prefix: block.dns_name_prefix,
        vm_size: block.vm_size,
        os_disk_size_gb: block.os_disk_size.filter(|gb| *gb > 0),
        fqdn: block.fqdn,
    };
    profile.validate()?;
    Ok(profile)
}

/// Expand worker pools in configured order. At least one pool is required.
pub fn expand_agent_pool_profiles(d: &ResourceData) -> Result<Vec<AgentPoolProfile>, Error> {
    let blocks: Vec<AgentPoolBlock> = d.get_blocks(keys::AGENT_POOL_PROFILES)?;
    if blocks.is_empty() {
        return Err(Error::validation(
            "agent pool profile",
            "at least one agent pool is required",
        ));
    }

    blocks
        .into_iter()
        .map(|block| {
            let os_type = match non_empty(block.os_type) {
                Some(os_type) => os_type.parse::<OsType>()?,
                None => OsType::default(),
            };
            let profile = AgentPoolProfile {
                name: block.name,
                count: block.count,
                vm_size: block.vm_size,
                os_disk_size_gb: block.os_disk_size.filter(|gb| *gb > 0),
                os_type,
                orchestrator_version: None,
            };
            profile.validate()?;
            Ok(profile)
        })
        .collect()
}

/// `None` when no `certificate_profile` block is configured. A configured
/// block must carry the CA, the client certificate and its key.
pub fn expand_certificate_profile(d: &ResourceData) -> Result<Option<CertificateProfile>, Error> {
    let Some(block) = d.get_block::<CertificateProfileBlock>(keys::CERTIFICATE_PROFILE)? else {
        return Ok(None);
    };

    let profile = CertificateProfile {
        ca_certificate: block.ca_certificate,
        kube_config_certificate: block.kube_config_certificate,
        kube_config_private_key: block.kube_config_private_key,
    };
    if !profile.is_complete() {
        return Err(Error::validation(
            "certificate profile",
            "ca_certificate, kube_config_certificate and kube_config_private_key are required",
        ));
    }
    Ok(Some(profile))
}

/// Resource tags; absent means empty.
pub fn expand_tags(d: &ResourceData) -> Result<BTreeMap<String, String>, Error> {
    match d.get(keys::TAGS) {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => Ok((key.clone(), s.clone())),
                other => Err(Error::validation(
                    "tags",
                    format!("value of '{key}' must be a string, found {other}"),
                )),
            })
            .collect(),
        Some(other) => Err(Error::validation(
            "tags",
            format!("expected a map, found {other}"),
        )),
    }
}
