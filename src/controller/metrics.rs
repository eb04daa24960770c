//! Installation error metric
//!
//! A single gauge recording why the driver install or upgrade is held
//! back. Each recorder owns its registry so tests get isolated instances.

use crate::checks::{CheckAction, CheckResult, CheckStatus};
use crate::error::{Error, Result};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

/// Metric name
pub const INSTALL_ERROR_METRIC: &str = "vsphere_csi_driver_error";

/// Metric help text
const INSTALL_ERROR_HELP: &str = "vSphere driver installation error";

const LABEL_CONDITION: &str = "condition";
const LABEL_FAILURE_REASON: &str = "failure_reason";

// =============================================================================
// Error Condition
// =============================================================================

/// Value of the `condition` label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCondition {
    InstallBlocked,
    UpgradeBlocked,
    UpgradeUnknown,
}

impl ErrorCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCondition::InstallBlocked => "install_blocked",
            ErrorCondition::UpgradeBlocked => "upgrade_blocked",
            ErrorCondition::UpgradeUnknown => "upgrade_unknown",
        }
    }

    /// Label for a check result, `None` on Pass
    pub fn from_result(result: &CheckResult) -> Option<Self> {
        match result.action {
            CheckAction::Pass => None,
            CheckAction::BlockInstall => Some(ErrorCondition::InstallBlocked),
            CheckAction::BlockUpgrade if result.status.is_indeterminate() => {
                Some(ErrorCondition::UpgradeUnknown)
            }
            CheckAction::BlockUpgrade => Some(ErrorCondition::UpgradeBlocked),
        }
    }
}

impl std::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Recorder
// =============================================================================

/// Owns the `vsphere_csi_driver_error` gauge and the registry exposing it
pub struct ErrorMetricRecorder {
    registry: Registry,
    gauge: GaugeVec,
}

impl ErrorMetricRecorder {
    /// Create a recorder with its own registry
    pub fn new() -> Result<Self> {
        let gauge = GaugeVec::new(
            Opts::new(INSTALL_ERROR_METRIC, INSTALL_ERROR_HELP),
            &[LABEL_CONDITION, LABEL_FAILURE_REASON],
        )?;
        let registry = Registry::new();
        registry.register(Box::new(gauge.clone()))?;

        Ok(Self { registry, gauge })
    }

    /// Registry to expose on the metrics endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Remove every label set
    pub fn reset(&self) {
        self.gauge.reset();
    }

    /// Set one label set to 1
    pub fn set(&self, condition: ErrorCondition, failure_reason: CheckStatus) {
        self.gauge
            .with_label_values(&[condition.as_str(), failure_reason.as_str()])
            .set(1.0);
    }

    /// Replace the metric with the outcome of a fresh check.
    ///
    /// Pass leaves no label set; any other result leaves exactly one.
    pub fn record(&self, result: &CheckResult) {
        self.reset();
        if let Some(condition) = ErrorCondition::from_result(result) {
            debug!(%condition, failure_reason = %result.status, "recording install error metric");
            self.set(condition, result.status);
        }
    }

    /// Current label sets as `(condition, failure_reason, value)`
    pub fn label_sets(&self) -> Vec<(String, String, f64)> {
        let mut sets = Vec::new();
        for family in self.registry.gather() {
            if family.get_name() != INSTALL_ERROR_METRIC {
                continue;
            }
            for metric in family.get_metric() {
                let label = |name: &str| {
                    metric
                        .get_label()
                        .iter()
                        .find(|l| l.get_name() == name)
                        .map(|l| l.get_value().to_string())
                        .unwrap_or_default()
                };
                sets.push((
                    label(LABEL_CONDITION),
                    label(LABEL_FAILURE_REASON),
                    metric.get_gauge().get_value(),
                ));
            }
        }
        sets
    }

    /// Value of one label set, `None` if it is not present
    pub fn get(&self, condition: ErrorCondition, failure_reason: CheckStatus) -> Option<f64> {
        self.label_sets()
            .into_iter()
            .find(|(c, r, _)| c == condition.as_str() && r == failure_reason.as_str())
            .map(|(_, _, v)| v)
    }

    /// Text exposition of the registry
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
    }
}
