//! Domain Ports - Core trait definitions for the CSI driver operator
//!
//! These traits define the boundaries between the compatibility gating logic
//! and external systems: vCenter, the cluster API, the operand controllers
//! and the operator status object. Adapters implement these traits.

use crate::checks::CheckResult;
use crate::crd::OperatorStatus;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Annotation the operator puts on the CSIDriver object it creates
pub const OWNERSHIP_ANNOTATION: &str = "csi.openshift.io/managed";

/// Provider ID prefix of nodes backed by vSphere VMs
pub const VSPHERE_PROVIDER_PREFIX: &str = "vsphere://";

// =============================================================================
// Cluster Snapshot Types
// =============================================================================

/// A cluster node as seen by the compatibility checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Cloud provider ID (e.g. vsphere://4237...)
    pub provider_id: Option<String>,
    /// Node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, provider_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            provider_id,
            labels: BTreeMap::new(),
        }
    }

    /// UUID of the VM backing this node, when the node runs on vSphere
    pub fn vm_uuid(&self) -> Option<&str> {
        self.provider_id
            .as_deref()
            .and_then(|id| id.strip_prefix(VSPHERE_PROVIDER_PREFIX))
            .filter(|uuid| !uuid.is_empty())
    }
}

/// The CSIDriver object registered for the driver name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiDriverInfo {
    pub name: String,
    /// Whether the object carries the operator's ownership annotation
    pub managed: bool,
}

/// Facts about driver objects already present in the cluster.
///
/// Read fresh on every sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverPresence {
    /// CSIDriver object, if one exists
    pub csi_driver: Option<CsiDriverInfo>,
    /// Nodes whose CSINode object registers the driver
    #[serde(default)]
    pub registered_nodes: Vec<String>,
}

impl DriverPresence {
    /// An operator-owned driver is already installed
    pub fn is_installed(&self) -> bool {
        self.csi_driver.as_ref().is_some_and(|d| d.managed)
    }

    /// A CSIDriver object exists without the ownership annotation
    pub fn has_foreign_driver(&self) -> bool {
        self.csi_driver.as_ref().is_some_and(|d| !d.managed)
    }

    /// Nodes register the driver although the operator never installed it
    pub fn has_foreign_node_registrations(&self) -> bool {
        !self.registered_nodes.is_empty() && !self.is_installed()
    }
}

/// Read-only view of the cluster used by one sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub presence: DriverPresence,
    pub nodes: Vec<NodeInfo>,
}

// =============================================================================
// Platform Types
// =============================================================================

/// vCenter "about" information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub version: String,
    pub api_version: String,
    pub build: String,
}

/// Version of one ESXi host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostVersion {
    pub name: String,
    pub version: String,
}

// =============================================================================
// Platform Connection Port
// =============================================================================

/// An established connection to vCenter
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// vCenter host name
    fn host(&self) -> &str;

    /// vCenter product information
    async fn about(&self) -> Result<AboutInfo>;

    /// Versions of all ESXi hosts
    async fn host_versions(&self) -> Result<Vec<HostVersion>>;

    /// Virtual hardware version (e.g. `vmx-15`) of the VM backing a node
    async fn node_hardware_version(&self, node: &NodeInfo) -> Result<String>;
}

// =============================================================================
// Connection Provider Port
// =============================================================================

/// Result of one connection attempt
#[derive(Clone)]
pub struct ConnectionOutcome {
    /// Usable connection, `None` on failure
    pub connection: Option<PlatformConnectionRef>,
    /// Pass, or the failure that prevented connecting
    pub result: CheckResult,
    /// The provider will attempt again on its own
    pub will_retry_later: bool,
}

impl ConnectionOutcome {
    pub fn connected(connection: PlatformConnectionRef) -> Self {
        Self {
            connection: Some(connection),
            result: CheckResult::pass(),
            will_retry_later: false,
        }
    }

    pub fn failed(result: CheckResult) -> Self {
        Self {
            connection: None,
            result,
            will_retry_later: false,
        }
    }
}

impl std::fmt::Debug for ConnectionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOutcome")
            .field("connected", &self.connection.is_some())
            .field("result", &self.result)
            .field("will_retry_later", &self.will_retry_later)
            .finish()
    }
}

/// Port supplying vCenter connections. Performs no retries.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn obtain_connection(&self, cancel: &CancellationToken) -> ConnectionOutcome;
}

// =============================================================================
// Cluster State Port
// =============================================================================

/// Port for reading driver objects and nodes from the cluster
#[async_trait]
pub trait ClusterStateReader: Send + Sync {
    /// CSIDriver and CSINode facts for a driver name
    async fn driver_presence(&self, driver_name: &str) -> Result<DriverPresence>;

    /// All cluster nodes
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
}

// =============================================================================
// Operator Status Port
// =============================================================================

/// Operator status together with the object version it was read at
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionedStatus {
    pub status: OperatorStatus,
    /// Version a write is conditional on; `None` writes unconditionally
    pub resource_version: Option<String>,
}

/// Port for the shared operator status object.
///
/// Other controllers write conditions to the same status, so writes are
/// conditional on the version that was read.
#[async_trait]
pub trait OperatorStatusClient: Send + Sync {
    async fn get_status(&self) -> Result<VersionedStatus>;

    /// Replace the status. Fails with [`Error::StatusConflict`] when the
    /// object changed after `status.resource_version` was read.
    ///
    /// [`Error::StatusConflict`]: crate::error::Error::StatusConflict
    async fn update_status(&self, status: &VersionedStatus) -> Result<()>;
}

// =============================================================================
// Operand Port
// =============================================================================

/// Port for the controllers that deploy the driver pods
#[async_trait]
pub trait OperandController: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type PlatformConnectionRef = Arc<dyn PlatformConnection>;
pub type ConnectionProviderRef = Arc<dyn ConnectionProvider>;
pub type ClusterStateReaderRef = Arc<dyn ClusterStateReader>;
pub type OperatorStatusClientRef = Arc<dyn OperatorStatusClient>;
pub type OperandControllerRef = Arc<dyn OperandController>;
