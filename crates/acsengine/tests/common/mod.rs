//! In-memory stand-ins for the cloud and cluster capabilities.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acs_cloud::{
    CloudError, DeploymentTemplate, Deployments, ResourceGroups, SecretStore, VirtualMachines,
};
use acsengine::api::ContainerService;
use acsengine::error::Error;
use acsengine::upgrade::{NodeRollout, NodeTarget, NodeUpgrader, UpgradePlan};
use acsengine::{ClientSecret, ClusterAccess, ResourceData, UpgradeOrchestrator};
use async_trait::async_trait;

/// Secrets keyed by `(vault_id, secret_name)`.
#[derive(Default)]
pub struct FakeSecretStore {
    secrets: HashMap<(String, String), String>,
}

impl FakeSecretStore {
    pub fn with_secret(mut self, vault_id: &str, name: &str, value: &str) -> Self {
        self.secrets
            .insert((vault_id.to_string(), name.to_string()), value.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get_secret(
        &self,
        vault_id: &str,
        secret_name: &str,
        _version: Option<&str>,
    ) -> Result<String, CloudError> {
        self.secrets
            .get(&(vault_id.to_string(), secret_name.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("secret {secret_name}")))
    }
}

/// Hands out a fixed kubeconfig, or fails.
#[derive(Default)]
pub struct FakeClusterAccess {
    pub fail: bool,
    pub refresh_requests: Mutex<Vec<bool>>,
}

#[async_trait]
impl ClusterAccess for FakeClusterAccess {
    async fn get_kube_config(
        &self,
        cluster: &ContainerService,
        refresh_certificates: bool,
    ) -> Result<Vec<u8>, Error> {
        self.refresh_requests
            .lock()
            .unwrap()
            .push(refresh_certificates);
        if self.fail {
            return Err(Error::Infrastructure("cluster unreachable".to_string()));
        }
        Ok(format!("server: https://{}", cluster.properties.master_profile.dns_prefix).into_bytes())
    }
}

/// Records upgraded nodes. Nodes of `failing_pool` fail, nodes of
/// `hanging_pool` never finish.
#[derive(Clone, Default)]
pub struct FakeRollout {
    pub failing_pool: Option<String>,
    pub hanging_pool: Option<String>,
    pub upgraded: Arc<Mutex<Vec<String>>>,
    pub credentials: Arc<Mutex<Vec<String>>>,
}

impl FakeRollout {
    pub fn failing(pool: &str) -> Self {
        Self {
            failing_pool: Some(pool.to_string()),
            ..Self::default()
        }
    }

    pub fn hanging(pool: &str) -> Self {
        Self {
            hanging_pool: Some(pool.to_string()),
            ..Self::default()
        }
    }

    pub fn upgraded(&self) -> Vec<String> {
        self.upgraded.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeRollout for FakeRollout {
    async fn connect(
        &self,
        _kubeconfig: &[u8],
        _cluster: &ContainerService,
        _plan: &UpgradePlan,
        credential: &ClientSecret,
    ) -> Result<Box<dyn NodeUpgrader>, Error> {
        self.credentials
            .lock()
            .unwrap()
            .push(credential.expose().to_string());
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl NodeUpgrader for FakeRollout {
    async fn upgrade_node(&self, node: &NodeTarget, _target_version: &str) -> Result<(), Error> {
        if self.hanging_pool.as_deref() == Some(node.pool.as_str()) {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        }
        if self.failing_pool.as_deref() == Some(node.pool.as_str()) {
            return Err(Error::Infrastructure(format!("{} did not rejoin", node.name)));
        }
        self.upgraded.lock().unwrap().push(node.name.clone());
        Ok(())
    }
}

/// Records deployments and resource group deletions.
#[derive(Default)]
pub struct RecordingArm {
    pub deployments: Mutex<Vec<(String, String, DeploymentTemplate)>>,
    pub deleted_vms: Mutex<Vec<String>>,
    pub deleted_groups: Mutex<Vec<String>>,
}

#[async_trait]
impl Deployments for RecordingArm {
    async fn create_or_update_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: &DeploymentTemplate,
    ) -> Result<(), CloudError> {
        self.deployments.lock().unwrap().push((
            resource_group.to_string(),
            deployment_name.to_string(),
            template.clone(),
        ));
        Ok(())
    }
}

#[async_trait]
impl VirtualMachines for RecordingArm {
    async fn delete_virtual_machine(
        &self,
        _resource_group: &str,
        vm_name: &str,
    ) -> Result<(), CloudError> {
        self.deleted_vms.lock().unwrap().push(vm_name.to_string());
        Ok(())
    }
}

#[async_trait]
impl ResourceGroups for RecordingArm {
    async fn delete_resource_group(&self, name: &str) -> Result<(), CloudError> {
        self.deleted_groups.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

pub fn orchestrator(
    secrets: FakeSecretStore,
    access: FakeClusterAccess,
    rollout: FakeRollout,
    step_timeout: Duration,
) -> UpgradeOrchestrator {
    UpgradeOrchestrator::new(
        Arc::new(secrets),
        Arc::new(access),
        Arc::new(rollout),
        step_timeout,
    )
}

/// Stored specification of `d`.
pub fn stored(d: &ResourceData) -> ContainerService {
    acsengine::store::load_container_service_from_apimodel(d).unwrap()
}
