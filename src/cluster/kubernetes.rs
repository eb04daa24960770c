//! Kubernetes-backed cluster adapters
//!
//! Reads CSIDriver, CSINode and Node objects, and writes the operator status
//! on the ClusterCSIDriver resource.

use crate::crd::ClusterCSIDriver;
use crate::domain::ports::{
    ClusterStateReader, CsiDriverInfo, DriverPresence, NodeInfo, OperatorStatusClient,
    VersionedStatus, OWNERSHIP_ANNOTATION,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

/// Field manager used for status patches
const FIELD_MANAGER: &str = "vsphere-csi-operator";

// =============================================================================
// Cluster State
// =============================================================================

/// Reads driver presence and nodes from the API server
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Whether a CSIDriver object carries the operator's ownership annotation
fn is_operator_managed(driver: &CSIDriver) -> bool {
    driver
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(OWNERSHIP_ANNOTATION))
        .is_some_and(|v| v == "true")
}

#[async_trait]
impl ClusterStateReader for KubeClusterState {
    async fn driver_presence(&self, driver_name: &str) -> Result<DriverPresence> {
        let drivers: Api<CSIDriver> = Api::all(self.client.clone());
        let csi_driver = drivers.get_opt(driver_name).await?.map(|d| CsiDriverInfo {
            name: driver_name.to_string(),
            managed: is_operator_managed(&d),
        });

        let csi_nodes: Api<CSINode> = Api::all(self.client.clone());
        let registered_nodes = csi_nodes
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|n| n.spec.drivers.iter().any(|d| d.name == driver_name))
            .filter_map(|n| n.metadata.name)
            .collect::<Vec<_>>();

        debug!(
            driver = driver_name,
            driver_found = csi_driver.is_some(),
            registered_nodes = registered_nodes.len(),
            "read driver presence"
        );

        Ok(DriverPresence {
            csi_driver,
            registered_nodes,
        })
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;

        nodes
            .items
            .into_iter()
            .map(|node| {
                let name = node.metadata.name.ok_or_else(|| {
                    Error::ClusterState("node has no name".to_string())
                })?;
                Ok(NodeInfo {
                    name,
                    provider_id: node.spec.and_then(|s| s.provider_id),
                    labels: node.metadata.labels.unwrap_or_default(),
                })
            })
            .collect()
    }
}

// =============================================================================
// Operator Status
// =============================================================================

/// Reads and patches the status of one ClusterCSIDriver
pub struct KubeStatusClient {
    client: Client,
    name: String,
}

impl KubeStatusClient {
    pub fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }
}

/// Merge patch replacing the status, conditional on the version it was read at
fn status_patch(status: &VersionedStatus) -> serde_json::Value {
    let mut patch = serde_json::json!({
        "status": status.status
    });
    if let Some(resource_version) = &status.resource_version {
        patch["metadata"] = serde_json::json!({
            "resourceVersion": resource_version
        });
    }
    patch
}

/// Map a failed status patch; 409 means another writer got there first
fn status_write_error(name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 409 => {
            Error::StatusConflict(format!("ClusterCSIDriver/{}: {}", name, response.message))
        }
        other => Error::StatusUpdate(format!("ClusterCSIDriver/{}: {}", name, other)),
    }
}

#[async_trait]
impl OperatorStatusClient for KubeStatusClient {
    async fn get_status(&self) -> Result<VersionedStatus> {
        let api: Api<ClusterCSIDriver> = Api::all(self.client.clone());
        let instance = api.get_opt(&self.name).await?.ok_or_else(|| Error::ResourceNotFound {
            kind: "ClusterCSIDriver".into(),
            name: self.name.clone(),
        })?;
        Ok(VersionedStatus {
            resource_version: instance.metadata.resource_version,
            status: instance.status.unwrap_or_default(),
        })
    }

    async fn update_status(&self, status: &VersionedStatus) -> Result<()> {
        let api: Api<ClusterCSIDriver> = Api::all(self.client.clone());

        api.patch_status(
            &self.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch(status)),
        )
        .await
        .map_err(|e| status_write_error(&self.name, e))?;

        debug!(
            name = %self.name,
            resource_version = ?status.resource_version,
            conditions = status.status.conditions.len(),
            "patched operator status"
        );
        Ok(())
    }
}
