//! Per-node ARM deployment templates.

use acs_cloud::DeploymentTemplate;
use chrono::Utc;
use serde_json::{json, Map, Value};

use super::plan::{NodeRole, NodeTarget};
use crate::api::{ContainerService, OsType};
use crate::error::Error;
use crate::store::ClientSecret;

const DEPLOYMENT_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2015-01-01/deploymentTemplate.json#";

const COMPUTE_API_VERSION: &str = "2023-09-01";

/// ARM caps deployment names at 64 characters.
const MAX_DEPLOYMENT_NAME: usize = 64;

/// Unique deployment name for redeploying `node`.
#[must_use]
pub fn deployment_name(node: &NodeTarget) -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let mut name = format!("{}-upgrade-{stamp}", node.name);
    name.truncate(MAX_DEPLOYMENT_NAME);
    name
}

fn os_profile(cluster: &ContainerService, node: &NodeTarget) -> Result<Value, Error> {
    match node.os_type {
        OsType::Linux => {
            let keys: Vec<Value> = cluster
                .properties
                .linux_profile
                .keys()
                .map(|key| {
                    json!({
                        "path": format!(
                            "/home/{}/.ssh/authorized_keys",
                            cluster.properties.linux_profile.admin_username
                        ),
                        "keyData": key,
                    })
                })
                .collect();
            Ok(json!({
                "computerName": node.name,
                "adminUsername": "[parameters('linuxAdminUsername')]",
                "linuxConfiguration": {
                    "disablePasswordAuthentication": true,
                    "ssh": { "publicKeys": keys },
                },
            }))
        }
        OsType::Windows => {
            if cluster.properties.windows_profile.is_none() {
                return Err(Error::validation(
                    "windows profile",
                    format!("node {} is Windows but the cluster has no windows profile", node.name),
                ));
            }
            Ok(json!({
                "computerName": node.name,
                "adminUsername": "[parameters('windowsAdminUsername')]",
                "adminPassword": "[parameters('windowsAdminPassword')]",
            }))
        }
    }
}

/// Deployment recreating a single node VM at `target_version`.
///
/// The client secret is only ever passed as a `secureString` parameter.
pub fn node_deployment_template(
    cluster: &ContainerService,
    node: &NodeTarget,
    target_version: &str,
    credential: &ClientSecret,
) -> Result<DeploymentTemplate, Error> {
    let props = &cluster.properties;

    let mut os_disk = json!({ "createOption": "FromImage", "caching": "ReadWrite" });
    if let Some(size) = node.os_disk_size {
        os_disk["diskSizeGB"] = json!(size);
    }

    let role = match node.role {
        NodeRole::Master => "master",
        NodeRole::Agent => "agent",
    };

    let vm = json!({
        "type": "Microsoft.Compute/virtualMachines",
        "apiVersion": COMPUTE_API_VERSION,
        "name": node.name,
        "location": cluster.location,
        "tags": {
            "orchestrator": format!("Kubernetes:{target_version}"),
            "poolName": node.pool,
            "role": role,
        },
        "properties": {
            "hardwareProfile": { "vmSize": node.vm_size },
            "osProfile": os_profile(cluster, node)?,
            "storageProfile": { "osDisk": os_disk },
            "networkProfile": {
                "networkInterfaces": [{
                    "id": format!(
                        "[resourceId('Microsoft.Network/networkInterfaces', '{}-nic-0')]",
                        node.name
                    ),
                }],
            },
        },
    });

    let mut parameter_types = Map::new();
    let mut parameters = Map::new();
    let mut add = |name: &str, kind: &str, value: Value| {
        parameter_types.insert(name.to_string(), json!({ "type": kind }));
        parameters.insert(name.to_string(), json!({ "value": value }));
    };

    add("orchestratorVersion", "string", json!(target_version));
    add(
        "servicePrincipalClientId",
        "string",
        json!(props.service_principal_profile.client_id),
    );
    add(
        "servicePrincipalClientSecret",
        "secureString",
        json!(credential.expose()),
    );
    match (node.os_type, props.windows_profile.as_ref()) {
        (OsType::Windows, Some(windows)) => {
            add("windowsAdminUsername", "string", json!(windows.admin_username));
            add("windowsAdminPassword", "secureString", json!(windows.admin_password));
        }
        _ => add(
            "linuxAdminUsername",
            "string",
            json!(props.linux_profile.admin_username),
        ),
    }

    Ok(DeploymentTemplate {
        template: json!({
            "$schema": DEPLOYMENT_SCHEMA,
            "contentVersion": "1.0.0.0",
            "parameters": parameter_types,
            "resources": [vm],
        }),
        parameters: Value::Object(parameters),
    })
}
