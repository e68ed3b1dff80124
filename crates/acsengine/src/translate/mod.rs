//! Model Translator.
//!
//! Converts between the flat configuration a user writes and the structured
//! cluster specification. Flatteners validate the specification they are
//! given; expanders validate what they build. Neither touches the network.

mod expand;
mod flatten;

pub use expand::{
    expand_agent_pool_profiles, expand_certificate_profile, expand_linux_profile,
    expand_master_profile, expand_service_principal, expand_tags, expand_windows_profile,
};
pub use flatten::{
    flatten_agent_pool_profiles, flatten_certificate_profile,
    flatten_data_source_service_principal, flatten_linux_profile, flatten_master_profile,
    flatten_service_principal, flatten_windows_profile,
};

use tracing::debug;

use crate::api::{ContainerService, OrchestratorProfile, Properties, KUBERNETES};
use crate::error::Error;
use crate::resource::ResourceData;
use crate::schema::keys;

fn required_str(d: &ResourceData, key: &str) -> Result<String, Error> {
    d.get_str(key)
        .map(str::to_string)
        .ok_or_else(|| Error::validation("cluster", format!("{key} is required")))
}

/// Build a validated cluster specification from the flat configuration.
pub fn set_container_service(d: &ResourceData) -> Result<ContainerService, Error> {
    let cluster = ContainerService {
        id: d.id().to_string(),
        name: required_str(d, keys::NAME)?,
        location: required_str(d, keys::LOCATION)?,
        resource_group: required_str(d, keys::RESOURCE_GROUP)?,
        tags: expand_tags(d)?,
        properties: Properties {
            orchestrator_profile: OrchestratorProfile {
                orchestrator_type: KUBERNETES.to_string(),
                orchestrator_version: required_str(d, keys::KUBERNETES_VERSION)?,
            },
            master_profile: expand_master_profile(d)?,
            agent_pool_profiles: expand_agent_pool_profiles(d)?,
            linux_profile: expand_linux_profile(d)?,
            windows_profile: expand_windows_profile(d)?,
            service_principal_profile: expand_service_principal(d)?,
            certificate_profile: expand_certificate_profile(d)?,
        },
    };
    cluster.validate()?;

    debug!(
        cluster = %cluster.name,
        version = %cluster.orchestrator_version(),
        pools = cluster.properties.agent_pool_profiles.len(),
        "Expanded cluster specification"
    );
    Ok(cluster)
}

/// Write the attributes shared by the managed resource and the data source.
pub fn set_state_profiles(d: &mut ResourceData, cluster: &ContainerService) -> Result<(), Error> {
    let props = &cluster.properties;

    d.set(keys::NAME, &cluster.name)?;
    d.set(keys::LOCATION, &cluster.location)?;
    d.set(keys::RESOURCE_GROUP, &cluster.resource_group)?;
    d.set(keys::KUBERNETES_VERSION, cluster.orchestrator_version())?;
    d.set(
        keys::MASTER_PROFILE,
        flatten_master_profile(&props.master_profile, &cluster.location)?,
    )?;
    d.set(
        keys::AGENT_POOL_PROFILES,
        flatten_agent_pool_profiles(&props.agent_pool_profiles)?,
    )?;
    d.set(keys::TAGS, &cluster.tags)?;
    Ok(())
}

/// State of the managed cluster resource.
pub fn set_resource_state_profiles(
    d: &mut ResourceData,
    cluster: &ContainerService,
) -> Result<(), Error> {
    set_state_profiles(d, cluster)?;

    let props = &cluster.properties;
    d.set(keys::LINUX_PROFILE, flatten_linux_profile(&props.linux_profile)?)?;
    d.set(
        keys::WINDOWS_PROFILE,
        flatten_windows_profile(props.windows_profile.as_ref())?,
    )?;
    d.set(
        keys::SERVICE_PRINCIPAL,
        flatten_service_principal(&props.service_principal_profile)?,
    )?;
    d.set(
        keys::CERTIFICATE_PROFILE,
        flatten_certificate_profile(props.certificate_profile.as_ref())?,
    )?;
    Ok(())
}

/// State of the read-only data source. Only the identity's client id is exposed.
pub fn set_data_source_state_profiles(
    d: &mut ResourceData,
    cluster: &ContainerService,
) -> Result<(), Error> {
    set_state_profiles(d, cluster)?;

    let props = &cluster.properties;
    d.set(keys::LINUX_PROFILE, flatten_linux_profile(&props.linux_profile)?)?;
    d.set(
        keys::WINDOWS_PROFILE,
        flatten_windows_profile(props.windows_profile.as_ref())?,
    )?;
    d.set(
        keys::SERVICE_PRINCIPAL,
        flatten_data_source_service_principal(&props.service_principal_profile)?,
    )?;
    Ok(())
}
