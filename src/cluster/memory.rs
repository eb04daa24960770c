//! In-memory cluster adapters
//!
//! Used in standalone mode and tests. State can be changed between syncs.

use crate::crd::OperatorStatus;
use crate::domain::ports::{
    ClusterStateReader, DriverPresence, NodeInfo, OperatorStatusClient, VersionedStatus,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cluster State
// =============================================================================

/// In-memory driver presence and node list
#[derive(Default)]
pub struct InMemoryClusterState {
    presence: RwLock<DriverPresence>,
    nodes: RwLock<Vec<NodeInfo>>,
    failure: RwLock<Option<String>>,
}

impl InMemoryClusterState {
    pub fn new(presence: DriverPresence, nodes: Vec<NodeInfo>) -> Self {
        Self {
            presence: RwLock::new(presence),
            nodes: RwLock::new(nodes),
            failure: RwLock::new(None),
        }
    }

    pub fn set_presence(&self, presence: DriverPresence) {
        *self.presence.write() = presence;
    }

    /// Make every read fail, or succeed again with `None`
    pub fn set_failure(&self, failure: Option<String>) {
        *self.failure.write() = failure;
    }

    fn ensure_available(&self) -> Result<()> {
        match self.failure.read().as_ref() {
            Some(msg) => Err(Error::ClusterState(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterStateReader for InMemoryClusterState {
    async fn driver_presence(&self, driver_name: &str) -> Result<DriverPresence> {
        self.ensure_available()?;
        let mut presence = self.presence.read().clone();
        if presence
            .csi_driver
            .as_ref()
            .is_some_and(|d| d.name != driver_name)
        {
            presence.csi_driver = None;
        }
        Ok(presence)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.ensure_available()?;
        Ok(self.nodes.read().clone())
    }
}

// =============================================================================
// Operator Status
// =============================================================================

#[derive(Default)]
struct StoredStatus {
    status: OperatorStatus,
    version: u64,
}

/// In-memory operator status with a resource version bumped on every write
#[derive(Default)]
pub struct InMemoryStatusClient {
    stored: RwLock<StoredStatus>,
    updates: AtomicU64,
}

impl InMemoryStatusClient {
    pub fn new(status: OperatorStatus) -> Self {
        Self {
            stored: RwLock::new(StoredStatus { status, version: 1 }),
            updates: AtomicU64::new(0),
        }
    }

    /// Current status
    pub fn snapshot(&self) -> OperatorStatus {
        self.stored.read().status.clone()
    }

    /// Change the status outside this client's writes, as another
    /// controller sharing the object would
    pub fn modify(&self, f: impl FnOnce(&mut OperatorStatus)) {
        let mut stored = self.stored.write();
        f(&mut stored.status);
        stored.version += 1;
    }

    /// Number of status writes so far
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OperatorStatusClient for InMemoryStatusClient {
    async fn get_status(&self) -> Result<VersionedStatus> {
        let stored = self.stored.read();
        Ok(VersionedStatus {
            status: stored.status.clone(),
            resource_version: Some(stored.version.to_string()),
        })
    }

    async fn update_status(&self, status: &VersionedStatus) -> Result<()> {
        let mut stored = self.stored.write();
        let current = stored.version.to_string();
        if let Some(read_at) = &status.resource_version {
            if *read_at != current {
                return Err(Error::StatusConflict(format!(
                    "status read at version {}, now at {}",
                    read_at, current
                )));
            }
        }
        stored.status = status.status.clone();
        stored.version += 1;
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
