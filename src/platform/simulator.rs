//! Simulated vCenter
//!
//! In-memory implementation of [`PlatformConnection`] used in standalone
//! mode, benches and tests. Every attribute can be changed at runtime so a
//! test can upgrade a VM between two syncs.

use crate::domain::ports::{AboutInfo, HostVersion, NodeInfo, PlatformConnection};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

// =============================================================================
// Simulated vCenter
// =============================================================================

/// In-memory vCenter
pub struct SimulatedVCenter {
    host: String,
    about: RwLock<AboutInfo>,
    hosts: RwLock<Vec<HostVersion>>,
    /// Hardware version by VM UUID
    vms: DashMap<String, String>,
    /// Hardware version reported for VMs not in `vms`
    default_hardware_version: Option<String>,
    /// When set, every API call fails with this message
    api_failure: RwLock<Option<String>>,
}

impl SimulatedVCenter {
    pub fn builder() -> SimulatedVCenterBuilder {
        SimulatedVCenterBuilder::default()
    }

    pub fn set_vcenter_version(&self, version: impl Into<String>) {
        let version = version.into();
        let mut about = self.about.write();
        about.api_version = version.clone();
        about.version = version;
    }

    pub fn set_host_version(&self, name: &str, version: impl Into<String>) {
        let version = version.into();
        let mut hosts = self.hosts.write();
        match hosts.iter_mut().find(|h| h.name == name) {
            Some(host) => host.version = version,
            None => hosts.push(HostVersion {
                name: name.to_string(),
                version,
            }),
        }
    }

    pub fn set_hardware_version(&self, vm_uuid: impl Into<String>, version: impl Into<String>) {
        self.vms.insert(vm_uuid.into(), version.into());
    }

    /// Make every subsequent API call fail, or succeed again with `None`
    pub fn set_api_failure(&self, failure: Option<String>) {
        *self.api_failure.write() = failure;
    }

    fn ensure_available(&self) -> Result<()> {
        match self.api_failure.read().as_ref() {
            Some(msg) => Err(Error::VCenterApi(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformConnection for SimulatedVCenter {
    fn host(&self) -> &str {
        &self.host
    }

    async fn about(&self) -> Result<AboutInfo> {
        self.ensure_available()?;
        Ok(self.about.read().clone())
    }

    async fn host_versions(&self) -> Result<Vec<HostVersion>> {
        self.ensure_available()?;
        Ok(self.hosts.read().clone())
    }

    async fn node_hardware_version(&self, node: &NodeInfo) -> Result<String> {
        self.ensure_available()?;
        let uuid = node.vm_uuid().ok_or_else(|| Error::VmNotFound {
            node: node.name.clone(),
        })?;
        self.vms
            .get(uuid)
            .map(|entry| entry.value().clone())
            .or_else(|| self.default_hardware_version.clone())
            .ok_or_else(|| Error::VmNotFound {
                node: node.name.clone(),
            })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SimulatedVCenter`]
#[derive(Debug, Clone)]
pub struct SimulatedVCenterBuilder {
    host: String,
    version: String,
    build: String,
    hosts: Vec<HostVersion>,
    vms: Vec<(String, String)>,
    default_hardware_version: Option<String>,
}

impl Default for SimulatedVCenterBuilder {
    fn default() -> Self {
        Self {
            host: "vcenter.local".to_string(),
            version: "7.0.2".to_string(),
            build: "17694817".to_string(),
            hosts: Vec::new(),
            vms: Vec::new(),
            default_hardware_version: None,
        }
    }
}

impl SimulatedVCenterBuilder {
    pub fn host_name(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn vcenter_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add an ESXi host
    pub fn host(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.hosts.push(HostVersion {
            name: name.into(),
            version: version.into(),
        });
        self
    }

    /// Add a VM by UUID
    pub fn vm(mut self, uuid: impl Into<String>, hardware_version: impl Into<String>) -> Self {
        self.vms.push((uuid.into(), hardware_version.into()));
        self
    }

    /// Hardware version reported for any VM not added with [`Self::vm`]
    pub fn default_hardware_version(mut self, hardware_version: impl Into<String>) -> Self {
        self.default_hardware_version = Some(hardware_version.into());
        self
    }

    pub fn build(self) -> Arc<SimulatedVCenter> {
        let vms = DashMap::new();
        for (uuid, version) in self.vms {
            vms.insert(uuid, version);
        }

        Arc::new(SimulatedVCenter {
            host: self.host,
            about: RwLock::new(AboutInfo {
                version: self.version.clone(),
                api_version: self.version,
                build: self.build,
            }),
            hosts: RwLock::new(self.hosts),
            vms,
            default_hardware_version: self.default_hardware_version,
            api_failure: RwLock::new(None),
        })
    }
}
