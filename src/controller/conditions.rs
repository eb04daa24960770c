//! Operator condition reconciliation
//!
//! Conditions are keyed by `<controller name><suffix>`. Writes are
//! idempotent: a condition whose status and reason already match is left
//! untouched so the status object is only persisted on real changes.

use crate::checks::CheckResult;
use crate::crd::{
    ConditionStatus, OperatorCondition, OperatorStatus, CONDITION_AVAILABLE, CONDITION_UPGRADEABLE,
};
use chrono::Utc;

/// Full type of the Upgradeable condition owned by a controller
pub fn upgradeable_condition_type(controller_name: &str) -> String {
    format!("{}{}", controller_name, CONDITION_UPGRADEABLE)
}

/// Full type of the Available condition owned by a controller
pub fn available_condition_type(controller_name: &str) -> String {
    format!("{}{}", controller_name, CONDITION_AVAILABLE)
}

/// Upgradeable status to report for a result that withholds upgrades.
///
/// Failures that leave compatibility undecided report Unknown, the rest
/// report False.
pub fn on_failure_status(result: &CheckResult) -> ConditionStatus {
    if result.status.is_indeterminate() {
        ConditionStatus::Unknown
    } else {
        ConditionStatus::False
    }
}

/// Set the controller's Upgradeable condition from a check result.
///
/// Returns the condition now present in `status` and whether it changed.
pub fn add_upgradeable_block_condition(
    result: &CheckResult,
    controller_name: &str,
    status: &mut OperatorStatus,
    on_failure: ConditionStatus,
) -> (OperatorCondition, bool) {
    let condition_status = if result.action.blocks_upgrade() {
        on_failure
    } else {
        ConditionStatus::True
    };

    let desired = OperatorCondition::new(upgradeable_condition_type(controller_name), condition_status)
        .with_reason(result.status.as_str())
        .with_message(result.reason.clone());

    apply_condition(status, desired)
}

/// Set the controller's Available condition
pub fn set_available_condition(
    controller_name: &str,
    status: &mut OperatorStatus,
    condition_status: ConditionStatus,
) -> (OperatorCondition, bool) {
    let desired = OperatorCondition::new(available_condition_type(controller_name), condition_status)
        .with_reason("AsExpected");

    apply_condition(status, desired)
}

fn apply_condition(status: &mut OperatorStatus, mut desired: OperatorCondition) -> (OperatorCondition, bool) {
    let now = Utc::now();

    match status.find_condition_mut(&desired.condition_type) {
        Some(existing) => {
            if existing.status == desired.status && existing.reason == desired.reason {
                return (existing.clone(), false);
            }

            desired.last_transition_time = if existing.status == desired.status {
                existing.last_transition_time
            } else {
                Some(now)
            };
            *existing = desired.clone();
            (desired, true)
        }
        None => {
            desired.last_transition_time = Some(now);
            status.conditions.push(desired.clone());
            (desired, true)
        }
    }
}
