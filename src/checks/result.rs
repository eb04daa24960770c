//! Check Results
//!
//! The immutable outcome of one compatibility check, and the aggregation
//! rule that folds a check set into a single worst-case result.

use serde::{Deserialize, Serialize};

// =============================================================================
// Check Action
// =============================================================================

/// What a check result allows the operator to do.
///
/// Variants are ordered by severity: `Pass < BlockUpgrade < BlockInstall`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum CheckAction {
    /// No restriction
    #[default]
    Pass,
    /// Upgrades are withheld, an existing install may keep running
    BlockUpgrade,
    /// A fresh installation must not proceed
    BlockInstall,
}

impl CheckAction {
    /// Whether this action withholds upgrades
    pub fn blocks_upgrade(&self) -> bool {
        matches!(self, CheckAction::BlockUpgrade)
    }
}

impl std::fmt::Display for CheckAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckAction::Pass => write!(f, "pass"),
            CheckAction::BlockUpgrade => write!(f, "block_upgrade"),
            CheckAction::BlockInstall => write!(f, "block_install"),
        }
    }
}

// =============================================================================
// Check Status
// =============================================================================

/// Named failure class. Doubles as the condition reason and the
/// `failure_reason` metric label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    #[default]
    Pass,
    VSphereConnectionFailed,
    DeprecatedVCenter,
    DeprecatedEsxiVersion,
    DeprecatedHwVersion,
    ExistingDriverFound,
    VCenterApiError,
    ClusterApiError,
    CheckCancelled,
}

impl CheckStatus {
    /// Label used in conditions and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::VSphereConnectionFailed => "vsphere_connection_failed",
            CheckStatus::DeprecatedVCenter => "check_deprecated_vcenter",
            CheckStatus::DeprecatedEsxiVersion => "check_deprecated_esxi_version",
            CheckStatus::DeprecatedHwVersion => "node_hardware_version_too_old",
            CheckStatus::ExistingDriverFound => "existing_driver_found",
            CheckStatus::VCenterApiError => "vcenter_api_error",
            CheckStatus::ClusterApiError => "cluster_api_error",
            CheckStatus::CheckCancelled => "check_cancelled",
        }
    }

    /// Whether the upgrade state cannot be determined rather than known-bad
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            CheckStatus::VSphereConnectionFailed
                | CheckStatus::VCenterApiError
                | CheckStatus::CheckCancelled
        )
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Check Result
// =============================================================================

/// Outcome of one compatibility check, or of a whole check set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    /// Set only when the failure must surface as a sync error once an
    /// operator-owned driver is installed
    pub error: Option<String>,
    /// Restriction imposed by this result
    pub action: CheckAction,
    /// Failure class
    pub status: CheckStatus,
    /// Human readable explanation
    pub reason: String,
}

impl CheckResult {
    /// A passing result
    pub fn pass() -> Self {
        Self::default()
    }

    /// A hard failure that withholds upgrades
    pub fn block_upgrade(status: CheckStatus, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            error: Some(reason.clone()),
            action: CheckAction::BlockUpgrade,
            status,
            reason,
        }
    }

    /// A soft failure that prevents a fresh install but never degrades an
    /// existing one
    pub fn block_install(status: CheckStatus, reason: impl Into<String>) -> Self {
        Self {
            error: None,
            action: CheckAction::BlockInstall,
            status,
            reason: reason.into(),
        }
    }

    /// Connection to vCenter could not be established
    pub fn connection_failed(err: impl std::fmt::Display) -> Self {
        Self::block_upgrade(
            CheckStatus::VSphereConnectionFailed,
            format!("Failed to connect to vSphere: {}", err),
        )
    }

    /// A vCenter call made by a check failed
    pub fn vcenter_api_error(err: impl std::fmt::Display) -> Self {
        Self::block_upgrade(
            CheckStatus::VCenterApiError,
            format!("vCenter API error: {}", err),
        )
    }

    /// A cluster read made by a check failed
    pub fn cluster_api_error(err: impl std::fmt::Display) -> Self {
        Self::block_upgrade(
            CheckStatus::ClusterApiError,
            format!("cluster API error: {}", err),
        )
    }

    /// The check run was cancelled before completing
    pub fn cancelled() -> Self {
        Self::block_upgrade(
            CheckStatus::CheckCancelled,
            "environment check cancelled before completion",
        )
    }

    pub fn is_pass(&self) -> bool {
        self.action == CheckAction::Pass
    }

    /// Whether this result must degrade an already installed driver
    pub fn is_hard_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Equality on the fields surfaced in conditions
    pub fn same_outcome(&self, other: &CheckResult) -> bool {
        self.status == other.status && self.reason == other.reason
    }

    /// Fold results into the most severe one.
    ///
    /// The first result reaching the highest severity wins. An empty
    /// iterator aggregates to Pass.
    pub fn aggregate<I>(results: I) -> CheckResult
    where
        I: IntoIterator<Item = CheckResult>,
    {
        let mut worst = CheckResult::pass();
        for result in results {
            if result.action > worst.action {
                worst = result;
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_ordering() {
        assert!(CheckAction::Pass < CheckAction::BlockUpgrade);
        assert!(CheckAction::BlockUpgrade < CheckAction::BlockInstall);
        assert!(CheckAction::BlockUpgrade.blocks_upgrade());
        assert!(!CheckAction::BlockInstall.blocks_upgrade());
        assert!(!CheckAction::Pass.blocks_upgrade());
    }

    #[test]
    fn test_aggregate_empty_and_pass_only() {
        assert!(CheckResult::aggregate(Vec::new()).is_pass());

        let all_pass = vec![CheckResult::pass(), CheckResult::pass()];
        let aggregated = CheckResult::aggregate(all_pass);
        assert!(aggregated.is_pass());
        assert_eq!(aggregated.status, CheckStatus::Pass);
        assert!(!aggregated.is_hard_failure());
    }

    #[test]
    fn test_aggregate_picks_most_severe() {
        let results = vec![
            CheckResult::pass(),
            CheckResult::block_upgrade(CheckStatus::DeprecatedVCenter, "old vcenter"),
            CheckResult::block_install(CheckStatus::ExistingDriverFound, "foreign driver"),
            CheckResult::block_upgrade(CheckStatus::DeprecatedHwVersion, "old hw"),
        ];
        let aggregated = CheckResult::aggregate(results);
        assert_eq!(aggregated.action, CheckAction::BlockInstall);
        assert_eq!(aggregated.status, CheckStatus::ExistingDriverFound);
    }

    #[test]
    fn test_aggregate_ties_keep_first() {
        let results = vec![
            CheckResult::block_upgrade(CheckStatus::DeprecatedVCenter, "old vcenter"),
            CheckResult::block_upgrade(CheckStatus::DeprecatedHwVersion, "old hw"),
        ];
        let aggregated = CheckResult::aggregate(results);
        assert_eq!(aggregated.status, CheckStatus::DeprecatedVCenter);
    }

    #[test]
    fn test_block_install_is_not_hard_failure() {
        let result = CheckResult::block_install(CheckStatus::ExistingDriverFound, "found");
        assert!(!result.is_hard_failure());
        assert!(!result.is_pass());
    }

    #[test]
    fn test_same_outcome_ignores_error_text() {
        let a = CheckResult::block_upgrade(CheckStatus::DeprecatedVCenter, "old");
        let mut b = a.clone();
        b.error = Some("different".into());
        assert!(a.same_outcome(&b));

        let c = CheckResult::block_upgrade(CheckStatus::DeprecatedVCenter, "older");
        assert!(!a.same_outcome(&c));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(
            CheckStatus::VSphereConnectionFailed.to_string(),
            "vsphere_connection_failed"
        );
        assert_eq!(CheckStatus::DeprecatedVCenter.as_str(), "check_deprecated_vcenter");
        assert_eq!(CheckStatus::ExistingDriverFound.as_str(), "existing_driver_found");
        assert!(CheckStatus::VSphereConnectionFailed.is_indeterminate());
        assert!(!CheckStatus::DeprecatedHwVersion.is_indeterminate());
    }
}
