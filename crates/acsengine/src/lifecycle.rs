//! Create, read, update and delete of the cluster resource.

use std::sync::Arc;

use acs_cloud::{Deployments, ResourceGroups, SecretStore, VirtualMachines};
use semver::Version;
use tracing::{error, info, warn};

use crate::api::ContainerService;
use crate::error::Error;
use crate::resource::{ResourceData, ResourceId};
use crate::store::{self, ClientSecret};
use crate::translate;
use crate::upgrade::{
    cluster_nodes, deployment_name, node_deployment_template, NodeTarget, UpgradeOrchestrator,
    UpgradeReport,
};

/// Resource operations for one subscription.
pub struct ClusterLifecycle {
    subscription_id: String,
    secrets: Arc<dyn SecretStore>,
    deployments: Arc<dyn Deployments>,
    vms: Arc<dyn VirtualMachines>,
    resource_groups: Arc<dyn ResourceGroups>,
    orchestrator: UpgradeOrchestrator,
}

impl ClusterLifecycle {
    pub fn new(
        subscription_id: impl Into<String>,
        secrets: Arc<dyn SecretStore>,
        deployments: Arc<dyn Deployments>,
        vms: Arc<dyn VirtualMachines>,
        resource_groups: Arc<dyn ResourceGroups>,
        orchestrator: UpgradeOrchestrator,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            secrets,
            deployments,
            vms,
            resource_groups,
            orchestrator,
        }
    }

    /// Deploy every node of the configured cluster and record the result.
    ///
    /// A complete certificate profile is required so the cluster can be
    /// reached for later upgrades.
    pub async fn create_cluster(&self, d: &mut ResourceData) -> Result<(), Error> {
        let mut cluster = translate::set_container_service(d)?;
        if !cluster
            .properties
            .certificate_profile
            .as_ref()
            .is_some_and(|certs| certs.is_complete())
        {
            return Err(Error::validation(
                "certificate profile",
                "certificate_profile is required to manage the cluster after creation",
            ));
        }
        let credential = store::resolve_client_secret(&cluster, self.secrets.as_ref()).await?;

        info!(
            cluster = %cluster.name,
            resource_group = %cluster.resource_group,
            version = %cluster.orchestrator_version(),
            "Creating cluster"
        );

        let version = cluster.orchestrator_version().to_string();
        for node in cluster_nodes(&cluster) {
            self.deploy_node(&cluster, &node, &version, &credential).await?;
        }

        let id = ResourceId::deployment(&self.subscription_id, &cluster.resource_group, &cluster.name);
        d.set_id(id.clone());
        cluster.id = id;

        store::set_state_api_model(d, &cluster)?;
        translate::set_resource_state_profiles(d, &cluster)?;

        info!(cluster = %cluster.name, id = %d.id(), "Cluster created");
        Ok(())
    }

    /// Apply configuration changes to the stored specification.
    ///
    /// Version changes run the upgrade orchestrator, pool `count` changes
    /// add or remove nodes and tags are merged. Any other profile change is
    /// rejected before anything is touched. Returns the upgrade report when
    /// an upgrade ran.
    pub async fn update_cluster(&self, d: &mut ResourceData) -> Result<Option<UpgradeReport>, Error> {
        let desired = translate::set_container_service(d)?;
        let stored = store::load_container_service_from_apimodel(d)?;

        let unsupported = unsupported_changes(&stored, &desired);
        if !unsupported.is_empty() {
            return Err(Error::validation(
                "cluster",
                format!("update cannot apply changes to {}", unsupported.join(", ")),
            ));
        }

        let report = if needs_upgrade(&stored, desired.orchestrator_version())? {
            Some(self.orchestrator.run(d, desired.orchestrator_version()).await?)
        } else {
            None
        };

        let mut stored = store::load_container_service_from_apimodel(d)?;
        if stored.tags != desired.tags {
            info!(cluster = %stored.name, "Updating tags");
            stored.tags.clone_from(&desired.tags);
        }

        let scaled = self.scale_pools(&mut stored, &desired).await;

        store::set_state_api_model(d, &stored)?;
        translate::set_resource_state_profiles(d, &stored)?;
        if let Err(e) = scaled {
            error!(cluster = %stored.name, error = %e, "Scaling failed, progress persisted");
            return Err(e);
        }
        Ok(report)
    }

    /// Tear down the cluster's resource group.
    pub async fn delete_cluster(&self, d: &mut ResourceData) -> Result<(), Error> {
        let id = ResourceId::parse(d.id())?;

        info!(resource_group = %id.resource_group, "Deleting cluster");
        self.resource_groups
            .delete_resource_group(&id.resource_group)
            .await
            .map_err(|e| Error::Infrastructure(format!("delete {}: {e}", id.resource_group)))?;

        d.set_id("");
        Ok(())
    }

    async fn deploy_node(
        &self,
        cluster: &ContainerService,
        node: &NodeTarget,
        version: &str,
        credential: &ClientSecret,
    ) -> Result<(), Error> {
        let template = node_deployment_template(cluster, node, version, credential)?;
        self.deployments
            .create_or_update_deployment(&cluster.resource_group, &deployment_name(node), &template)
            .await
            .map_err(|e| Error::Infrastructure(format!("deploy {}: {e}", node.name)))
    }

    /// Bring each pool's node count to the desired one. The recorded count
    /// follows every node added or removed, so a failure keeps progress.
    async fn scale_pools(
        &self,
        cluster: &mut ContainerService,
        desired: &ContainerService,
    ) -> Result<(), Error> {
        let changes: Vec<(String, u32, u32)> = desired
            .properties
            .agent_pool_profiles
            .iter()
            .filter_map(|want| {
                let have = cluster.agent_pool(&want.name)?;
                (have.count != want.count).then(|| (want.name.clone(), have.count, want.count))
            })
            .collect();
        if changes.is_empty() {
            return Ok(());
        }

        let credential = if changes.iter().any(|(_, from, to)| to > from) {
            Some(store::resolve_client_secret(cluster, self.secrets.as_ref()).await?)
        } else {
            None
        };

        for (pool, from, to) in changes {
            info!(cluster = %cluster.name, pool = %pool, from, to, "Scaling agent pool");

            let mut target = cluster.clone();
            if let Some(profile) = target.agent_pool_mut(&pool) {
                profile.count = from.max(to);
            }
            let nodes: Vec<NodeTarget> = cluster_nodes(&target)
                .into_iter()
                .filter(|node| node.pool == pool && node.index >= from.min(to))
                .collect();

            if let Some(credential) = credential.as_ref().filter(|_| to > from) {
                let version = cluster
                    .agent_pool(&pool)
                    .map(|profile| cluster.agent_pool_version(profile).to_string())
                    .unwrap_or_default();
                for node in &nodes {
                    self.deploy_node(cluster, node, &version, credential).await?;
                    set_pool_count(cluster, &pool, node.index + 1);
                }
            } else {
                for node in nodes.iter().rev() {
                    warn!(node = %node.name, "Removing node without drain");
                    self.vms
                        .delete_virtual_machine(&cluster.resource_group, &node.name)
                        .await
                        .map_err(|e| Error::Infrastructure(format!("delete {}: {e}", node.name)))?;
                    set_pool_count(cluster, &pool, node.index);
                }
            }
        }
        Ok(())
    }
}

fn set_pool_count(cluster: &mut ContainerService, pool: &str, count: u32) {
    if let Some(profile) = cluster.agent_pool_mut(pool) {
        profile.count = count;
    }
}

/// Refresh the managed resource's state from the stored specification.
///
/// A resource without any specification is marked gone by clearing its id.
pub fn read_cluster(d: &mut ResourceData) -> Result<(), Error> {
    match store::load_container_service_from_apimodel(d) {
        Ok(cluster) => translate::set_resource_state_profiles(d, &cluster),
        Err(e) if e.is_not_found() => {
            warn!(id = %d.id(), "Cluster specification not found, removing from state");
            d.set_id("");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Populate the read-only data source from the stored specification.
pub fn read_data_source(d: &mut ResourceData) -> Result<(), Error> {
    let cluster = store::load_container_service_from_apimodel(d)?;
    translate::set_data_source_state_profiles(d, &cluster)
}

/// Whether the control plane or any pool is behind `desired`.
fn needs_upgrade(stored: &ContainerService, desired: &str) -> Result<bool, Error> {
    let parse = |v: &str| {
        Version::parse(v.trim_start_matches('v')).map_err(|e| {
            Error::validation(
                "orchestrator profile",
                format!("'{v}' is not a semantic version: {e}"),
            )
        })
    };

    let desired = parse(desired)?;
    if parse(stored.orchestrator_version())? != desired {
        return Ok(true);
    }
    for pool in &stored.properties.agent_pool_profiles {
        if parse(stored.agent_pool_version(pool))? != desired {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Fields edited in `desired` that an update cannot apply in place.
///
/// Versions, tags and pool counts are applied by [`ClusterLifecycle::update_cluster`].
fn unsupported_changes(stored: &ContainerService, desired: &ContainerService) -> Vec<String> {
    let mut changes = Vec::new();
    let mut check = |field: &str, changed: bool| {
        if changed {
            changes.push(field.to_string());
        }
    };

    check("name", stored.name != desired.name);
    check("location", stored.location != desired.location);
    check("resource_group", stored.resource_group != desired.resource_group);

    let (have, want) = (&stored.properties, &desired.properties);
    let (master, wanted_master) = (&have.master_profile, &want.master_profile);
    check("master_profile.count", master.count != wanted_master.count);
    check("master_profile.dns_name_prefix", master.dns_prefix != wanted_master.dns_prefix);
    check("master_profile.vm_size", master.vm_size != wanted_master.vm_size);
    check(
        "master_profile.os_disk_size",
        master.os_disk_size() != wanted_master.os_disk_size(),
    );
    check("linux_profile", have.linux_profile != want.linux_profile);
    check("windows_profile", have.windows_profile != want.windows_profile);
    check(
        "service_principal",
        have.service_principal_profile != want.service_principal_profile,
    );
    check(
        "certificate_profile",
        want.certificate_profile.is_some() && have.certificate_profile != want.certificate_profile,
    );

    let names = |c: &ContainerService| -> Vec<String> {
        c.properties
            .agent_pool_profiles
            .iter()
            .map(|p| p.name.clone())
            .collect()
    };
    if names(stored) != names(desired) {
        check("agent_pool_profiles (pools added, removed or reordered)", true);
        return changes;
    }
    for (i, (pool, wanted)) in have
        .agent_pool_profiles
        .iter()
        .zip(&want.agent_pool_profiles)
        .enumerate()
    {
        check(&format!("agent_pool_profiles.{i}.vm_size"), pool.vm_size != wanted.vm_size);
        check(
            &format!("agent_pool_profiles.{i}.os_disk_size"),
            pool.os_disk_size() != wanted.os_disk_size(),
        );
        check(&format!("agent_pool_profiles.{i}.os_type"), pool.os_type != wanted.os_type);
    }
    changes
}
