//! Compatibility Checks
//!
//! The ordered set of checks gating installation and upgrade of the vSphere
//! CSI driver:
//! - Connection: vCenter must be reachable
//! - vCenter version: vCenter must meet the driver minimum
//! - ESXi version: every host must meet the driver minimum
//! - Existing driver: no foreign CSI driver may be installed
//! - Node hardware: every node VM must meet the minimum hardware version
//!
//! Checks never panic. Every fault, including failed platform or cluster
//! reads, is converted into a [`CheckResult`] for the caller to handle.

pub mod connection;
pub mod esxi;
pub mod existing_driver;
pub mod node_hardware;
pub mod result;
pub mod vcenter;
pub mod version;

pub use connection::ConnectionCheck;
pub use esxi::EsxiVersionCheck;
pub use existing_driver::ExistingDriverCheck;
pub use node_hardware::NodeHardwareCheck;
pub use result::{CheckAction, CheckResult, CheckStatus};
pub use vcenter::VCenterVersionCheck;
pub use version::{HardwareVersion, ProductVersion};

use crate::domain::ports::{ClusterSnapshot, PlatformConnectionRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// CSI driver name registered in CSIDriver/CSINode objects
pub const DEFAULT_DRIVER_NAME: &str = "csi.vsphere.vmware.com";

// =============================================================================
// Driver Requirements
// =============================================================================

/// Minimum environment the driver supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DriverRequirements {
    /// CSI driver name
    pub driver_name: String,
    /// Minimum vCenter version
    pub minimum_vcenter_version: ProductVersion,
    /// Minimum ESXi host version
    pub minimum_esxi_version: ProductVersion,
    /// Minimum VM hardware version
    pub minimum_hardware_version: HardwareVersion,
}

impl Default for DriverRequirements {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            minimum_vcenter_version: ProductVersion::new(6, 7, 3),
            minimum_esxi_version: ProductVersion::new(6, 7, 3),
            minimum_hardware_version: HardwareVersion(15),
        }
    }
}

// =============================================================================
// Check Arguments
// =============================================================================

/// Inputs shared by all checks of one sync
#[derive(Clone)]
pub struct CheckArgs {
    /// vCenter connection, `None` when connecting failed
    pub connection: Option<PlatformConnectionRef>,
    /// Outcome of the connection attempt
    pub connection_result: CheckResult,
    /// Cluster state read at the start of the sync
    pub snapshot: ClusterSnapshot,
    /// Driver minimums
    pub requirements: DriverRequirements,
}

impl CheckArgs {
    /// The connection, or the failure to report when there is none
    pub fn connection(&self) -> std::result::Result<&PlatformConnectionRef, CheckResult> {
        match &self.connection {
            Some(conn) => Ok(conn),
            None if !self.connection_result.is_pass() => Err(self.connection_result.clone()),
            None => Err(CheckResult::connection_failed("no vCenter connection available")),
        }
    }
}

// =============================================================================
// Check Port
// =============================================================================

/// A single compatibility check
#[async_trait]
pub trait EnvironmentCheck: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Evaluate the check
    async fn check(&self, args: &CheckArgs) -> CheckResult;

    /// A failure of this check makes every later check meaningless
    fn is_gating(&self) -> bool {
        false
    }
}

// =============================================================================
// Check Set
// =============================================================================

/// Ordered collection of checks
pub struct CheckSet {
    checks: Vec<Box<dyn EnvironmentCheck>>,
}

impl Default for CheckSet {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ConnectionCheck),
            Box::new(VCenterVersionCheck),
            Box::new(EsxiVersionCheck),
            Box::new(ExistingDriverCheck),
            Box::new(NodeHardwareCheck),
        ])
    }
}

impl CheckSet {
    pub fn new(checks: Vec<Box<dyn EnvironmentCheck>>) -> Self {
        Self { checks }
    }

    /// Names of the checks, in run order
    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check in order and aggregate the results.
    ///
    /// A failing gating check ends the run; its result is the aggregate.
    pub async fn run(&self, args: &CheckArgs) -> CheckResult {
        let mut results = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            let result = check.check(args).await;
            debug!(
                check = check.name(),
                action = %result.action,
                status = %result.status,
                "environment check completed"
            );

            if check.is_gating() && !result.is_pass() {
                debug!(check = check.name(), "gating check failed, skipping remaining checks");
                return result;
            }
            results.push(result);
        }

        CheckResult::aggregate(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedVCenter;
    use std::sync::Arc;

    fn args_with(vcenter: Arc<SimulatedVCenter>, snapshot: ClusterSnapshot) -> CheckArgs {
        CheckArgs {
            connection: Some(vcenter),
            connection_result: CheckResult::pass(),
            snapshot,
            requirements: DriverRequirements::default(),
        }
    }

    #[test]
    fn test_default_order() {
        let set = CheckSet::default();
        assert_eq!(
            set.names(),
            vec!["connection", "vcenter_version", "esxi_version", "existing_driver", "node_hardware"]
        );
    }

    #[tokio::test]
    async fn test_connection_failure_short_circuits() {
        let args = CheckArgs {
            connection: None,
            connection_result: CheckResult::connection_failed("connection refused"),
            snapshot: ClusterSnapshot::default(),
            requirements: DriverRequirements::default(),
        };

        let result = CheckSet::default().run(&args).await;
        assert_eq!(result, args.connection_result);
    }

    #[tokio::test]
    async fn test_all_good() {
        let vcenter = SimulatedVCenter::builder()
            .vcenter_version("7.0.2")
            .host("esxi-0", "7.0.2")
            .vm("uuid-0", "vmx-15")
            .build();
        let snapshot = ClusterSnapshot {
            presence: Default::default(),
            nodes: vec![crate::domain::NodeInfo::new("node-0", Some("vsphere://uuid-0".into()))],
        };

        let result = CheckSet::default().run(&args_with(vcenter, snapshot)).await;
        assert!(result.is_pass());
    }

    #[tokio::test]
    async fn test_worst_result_wins() {
        let vcenter = SimulatedVCenter::builder()
            .vcenter_version("6.5.0")
            .host("esxi-0", "7.0.2")
            .build();
        let snapshot = ClusterSnapshot {
            presence: crate::domain::DriverPresence {
                csi_driver: Some(crate::domain::CsiDriverInfo {
                    name: DEFAULT_DRIVER_NAME.into(),
                    managed: false,
                }),
                registered_nodes: vec![],
            },
            nodes: vec![],
        };

        let result = CheckSet::default().run(&args_with(vcenter, snapshot)).await;
        assert_eq!(result.action, CheckAction::BlockInstall);
        assert_eq!(result.status, CheckStatus::ExistingDriverFound);
    }
}
