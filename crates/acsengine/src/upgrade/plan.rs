//! Upgrade planning: which nodes move, in what order, under which names.

use std::time::Duration;

use semver::Version;
use sha1::{Digest, Sha1};

use crate::api::{ContainerService, OsType};
use crate::error::Error;
use crate::resource::ResourceId;

/// Pool label used for control-plane nodes.
pub const MASTER_POOL: &str = "master";

/// Control plane or worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Agent,
}

/// A single node VM to upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTarget {
    /// VM and Kubernetes node name.
    pub name: String,
    /// Owning pool, [`MASTER_POOL`] for the control plane.
    pub pool: String,
    pub role: NodeRole,
    /// Index within the pool.
    pub index: u32,
    pub os_type: OsType,
    pub vm_size: String,
    pub os_disk_size: Option<u32>,
}

/// What an upgrade run will touch.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub subscription_id: String,
    pub resource_group: String,
    pub target_version: String,
    /// Whether the control plane is behind the target.
    pub upgrade_control_plane: bool,
    /// Pools behind the target, in list order.
    pub pools_to_upgrade: Vec<String>,
    /// Eight-digit suffix shared by every node name in the cluster.
    pub name_suffix: String,
    pub step_timeout: Duration,
}

fn parse_version(what: &str, version: &str) -> Result<Version, Error> {
    Version::parse(version.trim_start_matches('v')).map_err(|e| {
        Error::validation(
            "orchestrator profile",
            format!("{what} '{version}' is not a semantic version: {e}"),
        )
    })
}

/// Node name suffix: eight decimal digits derived from the DNS prefix and
/// the first pool's name. Pools added or removed later keep existing node
/// names intact.
#[must_use]
pub fn name_suffix(cluster: &ContainerService) -> String {
    let mut hasher = Sha1::new();
    hasher.update(cluster.properties.master_profile.dns_prefix.as_bytes());
    if let Some(pool) = cluster.properties.agent_pool_profiles.first() {
        hasher.update(pool.name.as_bytes());
    }
    let digest = hasher.finalize();
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    format!("{:08}", value % 100_000_000)
}

/// Name of the `index`-th control-plane node.
#[must_use]
pub fn master_node_name(suffix: &str, index: u32) -> String {
    format!("k8s-master-{suffix}-{index}")
}

/// Name of the `index`-th node of a worker pool.
///
/// Windows computer names are limited to 15 characters, so Windows pools
/// use a compact form built from the pool's position in the cluster.
#[must_use]
pub fn agent_node_name(
    suffix: &str,
    pool: &str,
    pool_index: usize,
    os_type: OsType,
    index: u32,
) -> String {
    match os_type {
        OsType::Linux => format!("k8s-{pool}-{suffix}-{index}"),
        OsType::Windows => {
            let prefix = suffix.get(..4).unwrap_or(suffix);
            format!("{prefix}k8s{pool_index}{index:03}")
        }
    }
}

impl UpgradePlan {
    /// Plan an upgrade of `cluster` to `target_version`.
    ///
    /// Pools without a recorded version are pinned to the current
    /// control-plane version first, so progress can be tracked per pool.
    pub fn new(
        cluster: &mut ContainerService,
        resource_id: &str,
        target_version: &str,
        step_timeout: Duration,
    ) -> Result<Self, Error> {
        let id = ResourceId::parse(resource_id)?;
        let target = parse_version("target version", target_version)?;
        let current = parse_version("current version", cluster.orchestrator_version())?;
        if target < current {
            return Err(Error::validation(
                "orchestrator profile",
                format!("cannot downgrade from {current} to {target}"),
            ));
        }

        let control_plane_version = cluster.orchestrator_version().to_string();
        for pool in &mut cluster.properties.agent_pool_profiles {
            if pool.orchestrator_version.as_deref().map_or(true, str::is_empty) {
                pool.orchestrator_version = Some(control_plane_version.clone());
            }
        }

        let mut pools_to_upgrade = Vec::new();
        for pool in &cluster.properties.agent_pool_profiles {
            let version = parse_version("pool version", cluster.agent_pool_version(pool))?;
            if version > target {
                return Err(Error::validation(
                    format!("agent pool profile '{}'", pool.name),
                    format!("cannot downgrade from {version} to {target}"),
                ));
            }
            if version != target {
                pools_to_upgrade.push(pool.name.clone());
            }
        }

        Ok(Self {
            subscription_id: id.subscription_id,
            resource_group: id.resource_group,
            target_version: target_version.to_string(),
            upgrade_control_plane: current != target,
            pools_to_upgrade,
            name_suffix: name_suffix(cluster),
            step_timeout,
        })
    }

    /// Whether everything already runs the target version.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.upgrade_control_plane && self.pools_to_upgrade.is_empty()
    }

    /// Control-plane nodes in index order.
    #[must_use]
    pub fn master_nodes(&self, cluster: &ContainerService) -> Vec<NodeTarget> {
        master_targets(cluster, &self.name_suffix)
    }

    /// Nodes of a worker pool in index order.
    pub fn pool_nodes(&self, cluster: &ContainerService, pool: &str) -> Result<Vec<NodeTarget>, Error> {
        let (pool_index, _) = cluster
            .properties
            .agent_pool_profiles
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == pool)
            .ok_or_else(|| Error::not_found("agent pool", pool.to_string()))?;
        Ok(pool_targets(cluster, &self.name_suffix, pool_index))
    }
}

/// Every node of the cluster: control plane first, then pools in list order.
#[must_use]
pub fn cluster_nodes(cluster: &ContainerService) -> Vec<NodeTarget> {
    let suffix = name_suffix(cluster);
    let mut nodes = master_targets(cluster, &suffix);
    for pool_index in 0..cluster.properties.agent_pool_profiles.len() {
        nodes.extend(pool_targets(cluster, &suffix, pool_index));
    }
    nodes
}

fn master_targets(cluster: &ContainerService, suffix: &str) -> Vec<NodeTarget> {
    let master = &cluster.properties.master_profile;
    (0..master.count)
        .map(|index| NodeTarget {
            name: master_node_name(suffix, index),
            pool: MASTER_POOL.to_string(),
            role: NodeRole::Master,
            index,
            os_type: OsType::Linux,
            vm_size: master.vm_size.clone(),
            os_disk_size: master.os_disk_size(),
        })
        .collect()
}

fn pool_targets(cluster: &ContainerService, suffix: &str, pool_index: usize) -> Vec<NodeTarget> {
    let Some(profile) = cluster.properties.agent_pool_profiles.get(pool_index) else {
        return Vec::new();
    };
    (0..profile.count)
        .map(|index| NodeTarget {
            name: agent_node_name(suffix, &profile.name, pool_index, profile.os_type, index),
            pool: profile.name.clone(),
            role: NodeRole::Agent,
            index,
            os_type: profile.os_type,
            vm_size: profile.vm_size.clone(),
            os_disk_size: profile.os_disk_size(),
        })
        .collect()
}
