//! Node replacement against a live cluster.

use std::sync::Arc;
use std::time::Duration;

use acs_cloud::{Deployments, VirtualMachines};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use tracing::{debug, info, warn};

use super::plan::{NodeTarget, UpgradePlan};
use super::template;
use super::{NodeRollout, NodeUpgrader};
use crate::api::ContainerService;
use crate::error::Error;
use crate::store::ClientSecret;

/// Annotation carried by static (mirror) pods.
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// How often a replaced node is checked for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

fn infrastructure(action: &str, node: &str, e: impl std::fmt::Display) -> Error {
    Error::Infrastructure(format!("{action} {node}: {e}"))
}

fn same_version(kubelet: &str, target: &str) -> bool {
    kubelet.trim_start_matches('v') == target.trim_start_matches('v')
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn kubelet_version(node: &Node) -> Option<&str> {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kubelet_version.as_str())
}

/// Whether `node` already runs `target` and is Ready.
fn is_upgraded(node: &Node, target: &str) -> bool {
    is_ready(node) && kubelet_version(node).is_some_and(|v| same_version(v, target))
}

/// Whether a pod is left in place during drain.
fn skip_eviction(pod: &Pod) -> bool {
    let daemonset = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "DaemonSet"));
    let mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    let finished = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
    daemonset || mirror || finished
}

/// Whether an eviction was refused because it would violate a
/// PodDisruptionBudget. The API server answers those with 429.
fn is_eviction_blocked(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 429)
}

/// Whether `current` is still the `evicted` pod bound to `node`. A pod
/// recreated under the same name has a new uid.
fn still_on_node(current: &Pod, evicted: &Pod, node: &str) -> bool {
    current.metadata.uid == evicted.metadata.uid
        && current
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .is_some_and(|n| n == node)
}

/// Builds [`KubeNodeUpgrader`]s from an administrative kubeconfig.
pub struct KubeRollout {
    deployments: Arc<dyn Deployments>,
    vms: Arc<dyn VirtualMachines>,
    poll_interval: Duration,
}

impl KubeRollout {
    pub fn new(deployments: Arc<dyn Deployments>, vms: Arc<dyn VirtualMachines>) -> Self {
        Self {
            deployments,
            vms,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl NodeRollout for KubeRollout {
    async fn connect(
        &self,
        kubeconfig: &[u8],
        cluster: &ContainerService,
        plan: &UpgradePlan,
        credential: &ClientSecret,
    ) -> Result<Box<dyn NodeUpgrader>, Error> {
        let text = std::str::from_utf8(kubeconfig)
            .map_err(|e| Error::Infrastructure(format!("kubeconfig is not UTF-8: {e}")))?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| Error::Infrastructure(format!("invalid kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::Infrastructure(format!("cannot load kubeconfig: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| Error::Infrastructure(format!("cannot create Kubernetes client: {e}")))?;

        info!(cluster = %cluster.name, "Connected to cluster API server");

        Ok(Box::new(KubeNodeUpgrader {
            nodes: Api::all(client.clone()),
            client,
            deployments: Arc::clone(&self.deployments),
            vms: Arc::clone(&self.vms),
            cluster: cluster.clone(),
            resource_group: plan.resource_group.clone(),
            credential: credential.clone(),
            poll_interval: self.poll_interval,
        }))
    }
}

/// Replaces one node at a time: cordon, drain, delete the VM, redeploy it at
/// the target version and wait for it to rejoin.
pub struct KubeNodeUpgrader {
    client: Client,
    nodes: Api<Node>,
    deployments: Arc<dyn Deployments>,
    vms: Arc<dyn VirtualMachines>,
    cluster: ContainerService,
    resource_group: String,
    credential: ClientSecret,
    poll_interval: Duration,
}

impl KubeNodeUpgrader {
    async fn cordon(&self, name: &str) -> Result<(), Error> {
        let patch = json!({ "spec": { "unschedulable": true } });
        match self
            .nodes
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                debug!(node = %name, "Cordoned node");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(infrastructure("cordon", name, e)),
        }
    }

    /// Evict every movable pod from `name` and wait until they have left.
    ///
    /// Evictions refused by a disruption budget are retried every poll
    /// interval; the step timeout bounds the whole drain.
    async fn drain(&self, name: &str) -> Result<(), Error> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={name}"));
        let list = pods
            .list(&params)
            .await
            .map_err(|e| infrastructure("list pods on", name, e))?;

        let mut pending: Vec<Pod> = list.items.into_iter().filter(|p| !skip_eviction(p)).collect();
        let mut evicted = Vec::new();
        loop {
            let mut blocked = Vec::new();
            for pod in pending {
                let (Some(pod_name), Some(namespace)) =
                    (pod.metadata.name.as_deref(), pod.metadata.namespace.as_deref())
                else {
                    continue;
                };
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                match api.evict(pod_name, &EvictParams::default()).await {
                    Ok(_) => evicted.push(pod),
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                    Err(e) if is_eviction_blocked(&e) => {
                        debug!(node = %name, pod = %pod_name, "Eviction blocked by disruption budget");
                        blocked.push(pod);
                    }
                    Err(e) => {
                        return Err(infrastructure(
                            "evict pod",
                            &format!("{namespace}/{pod_name} from {name}"),
                            e,
                        ))
                    }
                }
            }
            if blocked.is_empty() {
                break;
            }
            info!(node = %name, blocked = blocked.len(), "Evictions blocked, retrying");
            pending = blocked;
            tokio::time::sleep(self.poll_interval).await;
        }

        self.wait_pods_gone(name, &evicted).await;
        info!(node = %name, evicted = evicted.len(), "Drained node");
        Ok(())
    }

    async fn wait_pods_gone(&self, name: &str, evicted: &[Pod]) {
        let mut remaining: Vec<&Pod> = evicted.iter().collect();
        while !remaining.is_empty() {
            let mut still_running = Vec::new();
            for pod in remaining {
                let (Some(pod_name), Some(namespace)) =
                    (pod.metadata.name.as_deref(), pod.metadata.namespace.as_deref())
                else {
                    continue;
                };
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                match api.get_opt(pod_name).await {
                    Ok(Some(current)) if still_on_node(&current, pod, name) => still_running.push(pod),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(pod = %pod_name, error = %e, "Failed to query pod, retrying");
                        still_running.push(pod);
                    }
                }
            }
            if still_running.is_empty() {
                break;
            }
            debug!(node = %name, pods = still_running.len(), "Waiting for evicted pods to terminate");
            remaining = still_running;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_rejoined(&self, name: &str, target_version: &str) -> Result<(), Error> {
        loop {
            match self.nodes.get_opt(name).await {
                Ok(Some(node)) if is_upgraded(&node, target_version) => {
                    info!(node = %name, version = %target_version, "Node rejoined");
                    return Ok(());
                }
                Ok(_) => debug!(node = %name, "Waiting for node to rejoin"),
                Err(e) => warn!(node = %name, error = %e, "Failed to query node, retrying"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl NodeUpgrader for KubeNodeUpgrader {
    async fn upgrade_node(&self, node: &NodeTarget, target_version: &str) -> Result<(), Error> {
        let existing = self
            .nodes
            .get_opt(&node.name)
            .await
            .map_err(|e| infrastructure("look up node", &node.name, e))?;

        if existing.as_ref().is_some_and(|n| is_upgraded(n, target_version)) {
            info!(node = %node.name, version = %target_version, "Node already upgraded, skipping");
            return Ok(());
        }

        info!(
            node = %node.name,
            pool = %node.pool,
            version = %target_version,
            "Upgrading node"
        );

        if existing.is_some() {
            self.cordon(&node.name).await?;
            self.drain(&node.name).await?;
        }

        self.vms
            .delete_virtual_machine(&self.resource_group, &node.name)
            .await
            .map_err(|e| infrastructure("delete virtual machine", &node.name, e))?;

        let deployment =
            template::node_deployment_template(&self.cluster, node, target_version, &self.credential)?;
        let deployment_name = template::deployment_name(node);
        self.deployments
            .create_or_update_deployment(&self.resource_group, &deployment_name, &deployment)
            .await
            .map_err(|e| infrastructure("redeploy", &node.name, e))?;

        self.wait_rejoined(&node.name, target_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus, NodeSystemInfo, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn node(ready: bool, kubelet: &str) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..NodeCondition::default()
                }]),
                node_info: Some(NodeSystemInfo {
                    kubelet_version: kubelet.to_string(),
                    ..NodeSystemInfo::default()
                }),
                ..NodeStatus::default()
            }),
            ..Node::default()
        }
    }

    #[test]
    fn test_is_upgraded() {
        assert!(is_upgraded(&node(true, "v1.10.0"), "1.10.0"));
        assert!(is_upgraded(&node(true, "v1.10.0"), "v1.10.0"));
        assert!(!is_upgraded(&node(false, "v1.10.0"), "1.10.0"));
        assert!(!is_upgraded(&node(true, "v1.9.0"), "1.10.0"));
        assert!(!is_upgraded(&Node::default(), "1.10.0"));
    }

    #[test]
    fn test_skip_eviction() {
        let plain = Pod {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };
        assert!(!skip_eviction(&plain));

        let mut daemon = plain.clone();
        daemon.metadata.owner_references = Some(vec![OwnerReference {
            kind: "DaemonSet".to_string(),
            name: "kube-proxy".to_string(),
            ..OwnerReference::default()
        }]);
        assert!(skip_eviction(&daemon));

        let mut mirror = plain.clone();
        mirror.metadata.annotations = Some(BTreeMap::from([(
            MIRROR_POD_ANNOTATION.to_string(),
            "hash".to_string(),
        )]));
        assert!(skip_eviction(&mirror));

        let mut finished = plain;
        finished.status = Some(PodStatus {
            phase: Some("Succeeded".to_string()),
            ..PodStatus::default()
        });
        assert!(skip_eviction(&finished));
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from test"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_only_disruption_budget_refusals_are_retried() {
        assert!(is_eviction_blocked(&api_error(429, "TooManyRequests")));
        assert!(!is_eviction_blocked(&api_error(404, "NotFound")));
        assert!(!is_eviction_blocked(&api_error(500, "InternalError")));
        assert!(!is_eviction_blocked(&api_error(403, "Forbidden")));
    }

    #[test]
    fn test_still_on_node() {
        let pod = |uid: &str, node: &str| Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                uid: Some(uid.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..PodSpec::default()
            }),
            ..Pod::default()
        };
        let evicted = pod("a1", "k8s-agentpool1-1234-0");

        assert!(still_on_node(&evicted.clone(), &evicted, "k8s-agentpool1-1234-0"));
        // Recreated by its controller, possibly on the same node.
        assert!(!still_on_node(&pod("b2", "k8s-agentpool1-1234-0"), &evicted, "k8s-agentpool1-1234-0"));
        assert!(!still_on_node(&pod("a1", "k8s-agentpool1-1234-1"), &evicted, "k8s-agentpool1-1234-0"));
        assert!(!still_on_node(&Pod::default(), &evicted, "k8s-agentpool1-1234-0"));
    }
}
