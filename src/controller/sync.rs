//! vSphere controller sync
//!
//! One sync reads the cluster, obtains a vCenter connection, asks the
//! environment checker for a verdict and applies it to the operator status,
//! the error metric and the operand.

use super::conditions::{add_upgradeable_block_condition, on_failure_status, set_available_condition};
use super::environment::EnvironmentChecker;
use super::metrics::ErrorMetricRecorder;
use crate::checks::{CheckArgs, CheckResult, DriverRequirements};
use crate::crd::ConditionStatus;
use crate::domain::ports::{
    ClusterSnapshot, ClusterStateReader, ClusterStateReaderRef, ConnectionProvider,
    ConnectionProviderRef, OperandController, OperandControllerRef, OperatorStatusClient,
    OperatorStatusClientRef,
};
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default controller name, prefix of the conditions it owns
pub const DEFAULT_CONTROLLER_NAME: &str = "VMwareVSphereController";

/// Reads and writes of the status before a conflict is returned to the caller
const STATUS_WRITE_ATTEMPTS: u32 = 3;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Prefix of the condition types written by this controller
    pub name: String,
    /// Driver minimums handed to the checks
    pub requirements: DriverRequirements,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTROLLER_NAME.to_string(),
            requirements: DriverRequirements::default(),
        }
    }
}

/// Adapters the controller talks to
#[derive(Clone)]
pub struct ControllerPorts {
    pub cluster: ClusterStateReaderRef,
    pub connections: ConnectionProviderRef,
    pub checker: Arc<dyn EnvironmentChecker>,
    pub status: OperatorStatusClientRef,
    pub operand: OperandControllerRef,
    pub metrics: Arc<ErrorMetricRecorder>,
}

// =============================================================================
// Controller
// =============================================================================

/// Gates the vSphere CSI driver operand on environment compatibility
pub struct VSphereController {
    config: ControllerConfig,
    ports: ControllerPorts,
}

impl VSphereController {
    pub fn new(config: ControllerConfig, ports: ControllerPorts) -> Self {
        Self { config, ports }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run one sync.
    ///
    /// Returns an error when the cluster cannot be read, when the sync is
    /// cancelled, when the status cannot be written, or when a hard check
    /// failure must degrade an already installed driver.
    #[instrument(skip(self, cancel), fields(controller = %self.config.name))]
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<()> {
        let driver_name = &self.config.requirements.driver_name;
        let presence = self.ports.cluster.driver_presence(driver_name).await?;
        let nodes = self.ports.cluster.list_nodes().await?;
        let installed = presence.is_installed();

        let connection = self.ports.connections.obtain_connection(cancel).await;
        if !connection.result.is_pass() {
            debug!(
                status = %connection.result.status,
                will_retry_later = connection.will_retry_later,
                "no vCenter connection"
            );
        }
        let args = CheckArgs {
            connection: connection.connection,
            connection_result: connection.result,
            snapshot: ClusterSnapshot { presence, nodes },
            requirements: self.config.requirements.clone(),
        };

        let outcome = self.ports.checker.check(cancel, &args).await;
        if cancel.is_cancelled() {
            debug!("sync cancelled before applying the check result");
            return Err(Error::Cancelled);
        }

        let result = outcome.result;
        if result.is_hard_failure() && installed {
            error!(
                status = %result.status,
                reason = %result.reason,
                "environment check failed with the driver installed"
            );
            self.ensure_operand(true).await?;
            return Err(Error::CheckFailed {
                status: result.status,
                reason: result.reason,
                requeue_after: outcome.requeue_after,
            });
        }

        if !outcome.ran {
            debug!("environment check did not run, keeping current state");
            return Ok(());
        }

        if outcome.changed {
            info!(
                action = %result.action,
                status = %result.status,
                reason = %result.reason,
                next_check_secs = outcome.requeue_after.as_secs(),
                "environment check result changed"
            );
        }

        // The cached result counts as applied only once every effect landed
        if let Err(e) = self.apply(&result).await {
            warn!(error = %e, "failed to apply environment check result");
            self.ports.checker.invalidate();
            return Err(e);
        }

        Ok(())
    }

    async fn apply(&self, result: &CheckResult) -> Result<()> {
        self.apply_conditions(result).await?;
        self.ports.metrics.record(result);
        self.ensure_operand(result.is_pass()).await
    }

    /// Write Available and Upgradeable, rereading the status when another
    /// writer changed it in between
    async fn apply_conditions(&self, result: &CheckResult) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.write_conditions(result).await {
                Err(Error::StatusConflict(msg)) if attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!(attempt, conflict = %msg, "operator status changed, rereading");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One read-modify-write of the two owned conditions, skipped when
    /// nothing changed
    async fn write_conditions(&self, result: &CheckResult) -> Result<()> {
        let mut read = self.ports.status.get_status().await?;
        let status = &mut read.status;

        let (_, available_modified) =
            set_available_condition(&self.config.name, status, ConditionStatus::True);
        let (upgradeable, upgradeable_modified) = add_upgradeable_block_condition(
            result,
            &self.config.name,
            status,
            on_failure_status(result),
        );

        if available_modified || upgradeable_modified {
            self.ports.status.update_status(&read).await?;
            info!(
                upgradeable = %upgradeable.status,
                reason = %upgradeable.reason,
                "operator conditions updated"
            );
        }
        Ok(())
    }

    async fn ensure_operand(&self, running: bool) -> Result<()> {
        let operand = &self.ports.operand;
        match (running, operand.is_running()) {
            (true, false) => operand.start().await,
            (false, true) => operand.stop().await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckSet, CheckStatus, DEFAULT_DRIVER_NAME};
    use crate::cluster::{InMemoryClusterState, InMemoryStatusClient};
    use crate::controller::environment::{CheckerConfig, CompositeChecker, SkippingChecker};
    use crate::controller::metrics::ErrorCondition;
    use crate::controller::operand::OperandSwitch;
    use crate::crd::{OperatorCondition, OperatorStatus};
    use crate::domain::ports::{CsiDriverInfo, DriverPresence, NodeInfo, VersionedStatus};
    use crate::platform::{SimulatedVCenter, StaticConnectionProvider};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const UPGRADEABLE: &str = "VMwareVSphereControllerUpgradeable";
    const AVAILABLE: &str = "VMwareVSphereControllerAvailable";

    struct Setup {
        vcenter_version: &'static str,
        hardware_version: &'static str,
        presence: DriverPresence,
        connection_failure: Option<&'static str>,
        skip_checks: bool,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                vcenter_version: "7.0.2",
                hardware_version: "vmx-15",
                presence: DriverPresence::default(),
                connection_failure: None,
                skip_checks: false,
            }
        }
    }

    struct Harness {
        controller: VSphereController,
        vcenter: Arc<SimulatedVCenter>,
        composite: Option<Arc<CompositeChecker>>,
        cluster: Arc<InMemoryClusterState>,
        status: Arc<InMemoryStatusClient>,
        operand: Arc<OperandSwitch>,
        metrics: Arc<ErrorMetricRecorder>,
    }

    impl Harness {
        fn new(setup: Setup) -> Self {
            Self::with_status(setup, |status| status as OperatorStatusClientRef)
        }

        /// Build with the status client wrapped, e.g. to inject failures
        fn with_status(
            setup: Setup,
            wrap: impl FnOnce(Arc<InMemoryStatusClient>) -> OperatorStatusClientRef,
        ) -> Self {
            let vcenter = SimulatedVCenter::builder()
                .vcenter_version(setup.vcenter_version)
                .host("esxi-0", "7.0.2")
                .vm("uuid-0", setup.hardware_version)
                .vm("uuid-1", setup.hardware_version)
                .build();
            let provider = StaticConnectionProvider::new(vcenter.clone());
            provider.set_failure(setup.connection_failure.map(String::from));

            let nodes = vec![
                NodeInfo::new("node-0", Some("vsphere://uuid-0".into())),
                NodeInfo::new("node-1", Some("vsphere://uuid-1".into())),
            ];
            let cluster = Arc::new(InMemoryClusterState::new(setup.presence, nodes));
            let status = Arc::new(InMemoryStatusClient::new(OperatorStatus::default()));
            let operand = Arc::new(OperandSwitch::new());
            let metrics = Arc::new(ErrorMetricRecorder::new().unwrap());

            let composite = (!setup.skip_checks)
                .then(|| Arc::new(CompositeChecker::new(CheckSet::default(), CheckerConfig::default())));
            let checker: Arc<dyn EnvironmentChecker> = match &composite {
                Some(composite) => composite.clone() as Arc<dyn EnvironmentChecker>,
                None => Arc::new(SkippingChecker),
            };

            let ports = ControllerPorts {
                cluster: cluster.clone(),
                connections: Arc::new(provider),
                checker,
                status: wrap(status.clone()),
                operand: operand.clone(),
                metrics: metrics.clone(),
            };

            Self {
                controller: VSphereController::new(ControllerConfig::default(), ports),
                vcenter,
                composite,
                cluster,
                status,
                operand,
                metrics,
            }
        }

        fn condition(&self, condition_type: &str) -> Option<OperatorCondition> {
            self.status.snapshot().find_condition(condition_type).cloned()
        }

        fn upgradeable(&self) -> ConditionStatus {
            self.condition(UPGRADEABLE).map(|c| c.status).unwrap()
        }

        fn force_recheck(&self) {
            self.composite.as_ref().unwrap().force_recheck();
        }
    }

    /// Status client whose first write fails
    struct FailFirstWrite {
        inner: Arc<InMemoryStatusClient>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl OperatorStatusClient for FailFirstWrite {
        async fn get_status(&self) -> Result<VersionedStatus> {
            self.inner.get_status().await
        }

        async fn update_status(&self, status: &VersionedStatus) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(Error::StatusUpdate("apiserver unavailable".into()));
            }
            self.inner.update_status(status).await
        }
    }

    /// Status client where another controller writes its own condition
    /// right after each of the first `remaining` reads
    struct ConcurrentWriter {
        inner: Arc<InMemoryStatusClient>,
        remaining: AtomicUsize,
    }

    const FOREIGN: &str = "OtherControllerDegraded";

    #[async_trait]
    impl OperatorStatusClient for ConcurrentWriter {
        async fn get_status(&self) -> Result<VersionedStatus> {
            let read = self.inner.get_status().await?;
            if self.remaining.load(Ordering::SeqCst) > 0 {
                self.remaining.fetch_sub(1, Ordering::SeqCst);
                self.inner.modify(|status| {
                    if status.find_condition(FOREIGN).is_none() {
                        status
                            .conditions
                            .push(OperatorCondition::new(FOREIGN, ConditionStatus::False));
                    } else if let Some(c) = status.find_condition_mut(FOREIGN) {
                        c.reason = format!("{}x", c.reason);
                    }
                });
            }
            Ok(read)
        }

        async fn update_status(&self, status: &VersionedStatus) -> Result<()> {
            self.inner.update_status(status).await
        }
    }

    fn installed() -> DriverPresence {
        DriverPresence {
            csi_driver: Some(CsiDriverInfo {
                name: DEFAULT_DRIVER_NAME.into(),
                managed: true,
            }),
            registered_nodes: vec!["node-0".into()],
        }
    }

    fn foreign_driver() -> DriverPresence {
        DriverPresence {
            csi_driver: Some(CsiDriverInfo {
                name: DEFAULT_DRIVER_NAME.into(),
                managed: false,
            }),
            registered_nodes: vec![],
        }
    }

    fn foreign_registration() -> DriverPresence {
        DriverPresence {
            csi_driver: None,
            registered_nodes: vec!["node-1".into()],
        }
    }

    #[tokio::test]
    async fn test_all_good_starts_operand() {
        let h = Harness::new(Setup::default());

        h.controller.sync(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.condition(AVAILABLE).unwrap().status, ConditionStatus::True);
        assert_eq!(h.upgradeable(), ConditionStatus::True);
        assert!(h.operand.is_running());
        assert!(h.metrics.label_sets().is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_without_driver() {
        let h = Harness::new(Setup {
            connection_failure: Some("connection refused"),
            ..Default::default()
        });

        h.controller.sync(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.upgradeable(), ConditionStatus::Unknown);
        assert_eq!(
            h.metrics
                .get(ErrorCondition::UpgradeUnknown, CheckStatus::VSphereConnectionFailed),
            Some(1.0)
        );
        assert!(!h.operand.is_running());
    }

    #[tokio::test]
    async fn test_connection_failure_with_driver_degrades() {
        let h = Harness::new(Setup {
            connection_failure: Some("connection refused"),
            presence: installed(),
            ..Default::default()
        });

        let err = h.controller.sync(&CancellationToken::new()).await.unwrap_err();

        assert_matches!(
            err,
            Error::CheckFailed {
                status: CheckStatus::VSphereConnectionFailed,
                ..
            }
        );
        assert!(h.operand.is_running());
    }

    #[tokio::test]
    async fn test_old_vcenter_blocks_upgrade() {
        let h = Harness::new(Setup {
            vcenter_version: "6.5.0",
            ..Default::default()
        });

        h.controller.sync(&CancellationToken::new()).await.unwrap();

        let condition = h.condition(UPGRADEABLE).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "check_deprecated_vcenter");
        assert_eq!(condition.message, "found older vcenter version 6.5.0, expected is 6.7.3");
        assert_eq!(
            h.metrics
                .get(ErrorCondition::UpgradeBlocked, CheckStatus::DeprecatedVCenter),
            Some(1.0)
        );
        assert!(!h.operand.is_running());
    }

    #[tokio::test]
    async fn test_old_vcenter_with_driver_degrades() {
        let h = Harness::new(Setup {
            vcenter_version: "6.5.0",
            presence: installed(),
            ..Default::default()
        });

        let err = h.controller.sync(&CancellationToken::new()).await.unwrap_err();

        assert_matches!(
            err,
            Error::CheckFailed {
                status: CheckStatus::DeprecatedVCenter,
                ..
            }
        );
        assert!(h.operand.is_running());
    }

    #[tokio::test]
    async fn test_degrade_persists_while_cached() {
        let h = Harness::new(Setup {
            vcenter_version: "6.5.0",
            presence: installed(),
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        assert!(h.controller.sync(&cancel).await.is_err());
        // Second sync is served from the cache and still degrades
        assert!(h.controller.sync(&cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_foreign_csi_driver_blocks_install() {
        let h = Harness::new(Setup {
            presence: foreign_driver(),
            ..Default::default()
        });

        h.controller.sync(&CancellationToken::new()).await.unwrap();

        let condition = h.condition(UPGRADEABLE).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, "existing_driver_found");
        assert_eq!(
            h.metrics
                .get(ErrorCondition::InstallBlocked, CheckStatus::ExistingDriverFound),
            Some(1.0)
        );
        assert!(!h.operand.is_running());
    }

    #[tokio::test]
    async fn test_foreign_csi_node_blocks_install() {
        let h = Harness::new(Setup {
            presence: foreign_registration(),
            ..Default::default()
        });

        h.controller.sync(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.upgradeable(), ConditionStatus::True);
        assert_eq!(
            h.metrics
                .get(ErrorCondition::InstallBlocked, CheckStatus::ExistingDriverFound),
            Some(1.0)
        );
        assert!(!h.operand.is_running());
    }

    #[tokio::test]
    async fn test_hardware_upgraded_after_recheck() {
        let h = Harness::new(Setup {
            hardware_version: "vmx-13",
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        h.controller.sync(&cancel).await.unwrap();
        assert_eq!(h.upgradeable(), ConditionStatus::False);
        assert_eq!(h.condition(UPGRADEABLE).unwrap().reason, "node_hardware_version_too_old");
        assert!(!h.operand.is_running());

        h.vcenter.set_hardware_version("uuid-0", "vmx-15");
        h.vcenter.set_hardware_version("uuid-1", "vmx-15");

        // Not due yet, the cached failure stays in effect
        h.controller.sync(&cancel).await.unwrap();
        assert_eq!(h.upgradeable(), ConditionStatus::False);
        assert_eq!(
            h.metrics
                .get(ErrorCondition::UpgradeBlocked, CheckStatus::DeprecatedHwVersion),
            Some(1.0)
        );
        assert!(!h.operand.is_running());

        h.force_recheck();
        h.controller.sync(&cancel).await.unwrap();
        assert_eq!(h.condition(AVAILABLE).unwrap().status, ConditionStatus::True);
        assert_eq!(h.upgradeable(), ConditionStatus::True);
        assert!(h.operand.is_running());
        assert!(h.metrics.label_sets().is_empty());
    }

    #[tokio::test]
    async fn test_regression_stops_operand() {
        let h = Harness::new(Setup::default());
        let cancel = CancellationToken::new();

        h.controller.sync(&cancel).await.unwrap();
        assert!(h.operand.is_running());

        h.vcenter.set_vcenter_version("6.5.0");
        h.force_recheck();
        h.controller.sync(&cancel).await.unwrap();

        assert_eq!(h.upgradeable(), ConditionStatus::False);
        assert!(!h.operand.is_running());
    }

    #[tokio::test]
    async fn test_skipped_check_changes_nothing() {
        let h = Harness::new(Setup {
            skip_checks: true,
            ..Default::default()
        });
        h.metrics
            .set(ErrorCondition::InstallBlocked, CheckStatus::ExistingDriverFound);

        h.controller.sync(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            h.metrics
                .get(ErrorCondition::InstallBlocked, CheckStatus::ExistingDriverFound),
            Some(1.0)
        );
        assert!(!h.operand.is_running());
        assert_eq!(h.status.update_count(), 0);
    }

    #[tokio::test]
    async fn test_status_written_only_on_change() {
        let h = Harness::new(Setup::default());
        let cancel = CancellationToken::new();

        h.controller.sync(&cancel).await.unwrap();
        assert_eq!(h.status.update_count(), 1);

        h.force_recheck();
        h.controller.sync(&cancel).await.unwrap();
        assert_eq!(h.status.update_count(), 1);
        assert_eq!(h.operand.start_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_sync_writes_nothing() {
        let h = Harness::new(Setup::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.controller.sync(&cancel).await.unwrap_err();

        assert_matches!(err, Error::Cancelled);
        assert_eq!(h.status.update_count(), 0);
        assert!(!h.operand.is_running());
        assert!(h.composite.as_ref().unwrap().last_result().is_none());
    }

    #[tokio::test]
    async fn test_cluster_read_failure() {
        let h = Harness::new(Setup::default());
        h.cluster.set_failure(Some("apiserver unavailable".into()));

        let err = h.controller.sync(&CancellationToken::new()).await.unwrap_err();

        assert_matches!(err, Error::ClusterState(_));
        assert_eq!(h.status.update_count(), 0);
    }

    #[tokio::test]
    async fn test_cached_result_ignores_cluster_changes() {
        let h = Harness::new(Setup {
            presence: foreign_driver(),
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        h.controller.sync(&cancel).await.unwrap();
        assert_eq!(h.status.update_count(), 1);

        // The foreign driver goes away, but the next check is not due
        h.cluster.set_presence(DriverPresence::default());
        h.controller.sync(&cancel).await.unwrap();

        assert_eq!(h.condition(UPGRADEABLE).unwrap().reason, "existing_driver_found");
        assert_eq!(
            h.metrics
                .get(ErrorCondition::InstallBlocked, CheckStatus::ExistingDriverFound),
            Some(1.0)
        );
        assert_eq!(h.metrics.label_sets().len(), 1);
        assert_eq!(h.status.update_count(), 1);
        assert!(!h.operand.is_running());

        h.force_recheck();
        h.controller.sync(&cancel).await.unwrap();

        assert_eq!(h.condition(UPGRADEABLE).unwrap().reason, "pass");
        assert!(h.metrics.label_sets().is_empty());
        assert_eq!(h.status.update_count(), 2);
        assert!(h.operand.is_running());
    }

    #[tokio::test]
    async fn test_failed_status_write_reapplied_on_retry() {
        let h = Harness::with_status(Setup::default(), |inner| {
            Arc::new(FailFirstWrite {
                inner,
                failed: AtomicBool::new(false),
            })
        });
        let cancel = CancellationToken::new();

        let err = h.controller.sync(&cancel).await.unwrap_err();
        assert_matches!(err, Error::StatusUpdate(_));
        assert!(h.condition(UPGRADEABLE).is_none());
        assert!(!h.operand.is_running());
        assert!(h.composite.as_ref().unwrap().last_result().is_none());

        h.controller.sync(&cancel).await.unwrap();

        assert_eq!(h.condition(AVAILABLE).unwrap().status, ConditionStatus::True);
        assert_eq!(h.upgradeable(), ConditionStatus::True);
        assert!(h.operand.is_running());
        assert!(h.metrics.label_sets().is_empty());
        assert_eq!(h.status.update_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_condition_preserved() {
        let h = Harness::with_status(Setup::default(), |inner| {
            Arc::new(ConcurrentWriter {
                inner,
                remaining: AtomicUsize::new(1),
            })
        });

        h.controller.sync(&CancellationToken::new()).await.unwrap();

        let status = h.status.snapshot();
        assert!(status.find_condition(FOREIGN).is_some());
        assert!(status.find_condition(AVAILABLE).is_some());
        assert_eq!(h.upgradeable(), ConditionStatus::True);
        assert_eq!(h.status.update_count(), 1);
        assert!(h.operand.is_running());
    }

    #[tokio::test]
    async fn test_persistent_conflict_fails_sync() {
        let h = Harness::with_status(Setup::default(), |inner| {
            Arc::new(ConcurrentWriter {
                inner,
                remaining: AtomicUsize::new(STATUS_WRITE_ATTEMPTS as usize),
            })
        });
        let cancel = CancellationToken::new();

        let err = h.controller.sync(&cancel).await.unwrap_err();
        assert_matches!(err, Error::StatusConflict(_));
        assert_eq!(h.status.update_count(), 0);
        assert!(!h.operand.is_running());

        // Writers settle, the result is checked and written again
        h.controller.sync(&cancel).await.unwrap();
        assert!(h.status.snapshot().find_condition(FOREIGN).is_some());
        assert_eq!(h.upgradeable(), ConditionStatus::True);
        assert!(h.operand.is_running());
    }
}
