//! Upgrade Orchestrator.
//!
//! An upgrade runs through fixed stages:
//!
//! 1. **load** - read the persisted cluster specification
//! 2. **resolve_credentials** - read the identity's secret from Key Vault
//! 3. **prepare_upgrade_context** - build the [`UpgradePlan`]
//! 4. **fetch_cluster_access** - obtain a kubeconfig and connect
//! 5. **execute_upgrade** - replace nodes, control plane first
//! 6. **persist** - write the (possibly partial) result back and refresh
//!    the resource's flat attributes from it
//!
//! Failures before execute leave the persisted specification untouched.
//! Once execute starts, persist always runs so a later attempt resumes from
//! the pools that are still behind.

mod nodes;
mod plan;
mod template;

pub use nodes::{KubeNodeUpgrader, KubeRollout};
pub use plan::{
    agent_node_name, cluster_nodes, master_node_name, name_suffix, NodeRole, NodeTarget,
    UpgradePlan, MASTER_POOL,
};
pub use template::{deployment_name, node_deployment_template};

use std::sync::Arc;
use std::time::{Duration, Instant};

use acs_cloud::SecretStore;
use async_trait::async_trait;
use strum::Display;
use tracing::{error, info, warn};

use crate::api::ContainerService;
use crate::error::Error;
use crate::kubeconfig::ClusterAccess;
use crate::resource::ResourceData;
use crate::store::{self, ClientSecret};
use crate::translate;

/// A stage of an upgrade run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UpgradeStage {
    Load,
    ResolveCredentials,
    PrepareUpgradeContext,
    FetchClusterAccess,
    ExecuteUpgrade,
    Persist,
}

/// Connects to a cluster and hands out a node upgrader.
#[async_trait]
pub trait NodeRollout: Send + Sync {
    async fn connect(
        &self,
        kubeconfig: &[u8],
        cluster: &ContainerService,
        plan: &UpgradePlan,
        credential: &ClientSecret,
    ) -> Result<Box<dyn NodeUpgrader>, Error>;
}

/// Moves a single node to a new version.
#[async_trait]
pub trait NodeUpgrader: Send + Sync {
    /// Must be idempotent: a node already at `target_version` is left alone.
    async fn upgrade_node(&self, node: &NodeTarget, target_version: &str) -> Result<(), Error>;
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub cluster: String,
    pub target_version: String,
    pub control_plane_upgraded: bool,
    /// Pools moved to the target, in upgrade order.
    pub upgraded_pools: Vec<String>,
    pub nodes_upgraded: usize,
}

/// Drives an upgrade of one cluster resource.
pub struct UpgradeOrchestrator {
    secrets: Arc<dyn SecretStore>,
    access: Arc<dyn ClusterAccess>,
    rollout: Arc<dyn NodeRollout>,
    step_timeout: Duration,
}

impl UpgradeOrchestrator {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        access: Arc<dyn ClusterAccess>,
        rollout: Arc<dyn NodeRollout>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            secrets,
            access,
            rollout,
            step_timeout,
        }
    }

    /// Upgrade the cluster held in `d` to `target_version`.
    ///
    /// On failure the error is wrapped in the stage it was raised in.
    pub async fn run(
        &self,
        d: &mut ResourceData,
        target_version: &str,
    ) -> Result<UpgradeReport, Error> {
        let start = Instant::now();

        let mut cluster = store::load_container_service_from_apimodel(d)
            .and_then(|cluster| cluster.validate().map(|()| cluster))
            .map_err(|e| e.in_stage(UpgradeStage::Load))?;

        info!(
            cluster = %cluster.name,
            from = %cluster.orchestrator_version(),
            to = %target_version,
            "Starting cluster upgrade"
        );

        let credential = store::resolve_client_secret(&cluster, self.secrets.as_ref())
            .await
            .map_err(|e| e.in_stage(UpgradeStage::ResolveCredentials))?;

        let plan = UpgradePlan::new(&mut cluster, d.id(), target_version, self.step_timeout)
            .map_err(|e| e.in_stage(UpgradeStage::PrepareUpgradeContext))?;

        if plan.is_empty() {
            info!(cluster = %cluster.name, version = %target_version, "Cluster already at target version");
            return Ok(UpgradeReport {
                cluster: cluster.name,
                target_version: target_version.to_string(),
                ..UpgradeReport::default()
            });
        }

        info!(
            cluster = %cluster.name,
            control_plane = plan.upgrade_control_plane,
            pools = ?plan.pools_to_upgrade,
            "Prepared upgrade plan"
        );

        let kubeconfig = self
            .access
            .get_kube_config(&cluster, true)
            .await
            .map_err(|e| e.in_stage(UpgradeStage::FetchClusterAccess))?;
        let upgrader = self
            .rollout
            .connect(&kubeconfig, &cluster, &plan, &credential)
            .await
            .map_err(|e| e.in_stage(UpgradeStage::FetchClusterAccess))?;

        let outcome = self.execute(&plan, &mut cluster, upgrader.as_ref()).await;
        let persisted = store::set_state_api_model(d, &cluster)
            .and_then(|()| translate::set_resource_state_profiles(d, &cluster));

        match (outcome, persisted) {
            (Ok(report), Ok(())) => {
                info!(
                    cluster = %report.cluster,
                    version = %report.target_version,
                    nodes = report.nodes_upgraded,
                    elapsed_secs = start.elapsed().as_secs(),
                    "Cluster upgrade complete"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e.in_stage(UpgradeStage::Persist)),
            (Err(e), Ok(())) => {
                error!(cluster = %cluster.name, error = %e, "Cluster upgrade failed, progress persisted");
                Err(e.in_stage(UpgradeStage::ExecuteUpgrade))
            }
            (Err(e), Err(persist_error)) => {
                warn!(
                    cluster = %cluster.name,
                    error = %persist_error,
                    "Failed to persist partial upgrade progress"
                );
                Err(e.in_stage(UpgradeStage::ExecuteUpgrade))
            }
        }
    }

    async fn execute(
        &self,
        plan: &UpgradePlan,
        cluster: &mut ContainerService,
        upgrader: &dyn NodeUpgrader,
    ) -> Result<UpgradeReport, Error> {
        let target = plan.target_version.as_str();
        let mut report = UpgradeReport {
            cluster: cluster.name.clone(),
            target_version: target.to_string(),
            ..UpgradeReport::default()
        };

        if plan.upgrade_control_plane {
            for node in plan.master_nodes(cluster) {
                self.upgrade_node(plan, upgrader, &node).await?;
                report.nodes_upgraded += 1;
            }
            cluster.properties.orchestrator_profile.orchestrator_version = target.to_string();
            report.control_plane_upgraded = true;
            info!(cluster = %cluster.name, version = %target, "Control plane upgraded");
        }

        for pool in &plan.pools_to_upgrade {
            for node in plan.pool_nodes(cluster, pool)? {
                self.upgrade_node(plan, upgrader, &node).await?;
                report.nodes_upgraded += 1;
            }
            if let Some(profile) = cluster.agent_pool_mut(pool) {
                profile.orchestrator_version = Some(target.to_string());
            }
            report.upgraded_pools.push(pool.clone());
            info!(cluster = %cluster.name, pool = %pool, version = %target, "Agent pool upgraded");
        }

        Ok(report)
    }

    async fn upgrade_node(
        &self,
        plan: &UpgradePlan,
        upgrader: &dyn NodeUpgrader,
        node: &NodeTarget,
    ) -> Result<(), Error> {
        let step_error = |message: String| Error::UpgradeStep {
            pool: node.pool.clone(),
            node: node.name.clone(),
            message,
        };

        match tokio::time::timeout(
            plan.step_timeout,
            upgrader.upgrade_node(node, &plan.target_version),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(step_error(e.to_string())),
            Err(_) => Err(step_error(format!(
                "timed out after {}s",
                plan.step_timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(UpgradeStage::Load.to_string(), "load");
        assert_eq!(UpgradeStage::ResolveCredentials.to_string(), "resolve_credentials");
        assert_eq!(
            UpgradeStage::PrepareUpgradeContext.to_string(),
            "prepare_upgrade_context"
        );
        assert_eq!(UpgradeStage::FetchClusterAccess.to_string(), "fetch_cluster_access");
        assert_eq!(UpgradeStage::ExecuteUpgrade.to_string(), "execute_upgrade");
        assert_eq!(UpgradeStage::Persist.to_string(), "persist");
    }
}
