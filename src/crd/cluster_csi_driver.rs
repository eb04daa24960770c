//! ClusterCSIDriver CRD
//!
//! The operator's own resource. Its status carries the operator conditions
//! the compatibility gate writes.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type suffix for availability
pub const CONDITION_AVAILABLE: &str = "Available";

/// Condition type suffix for upgradeability
pub const CONDITION_UPGRADEABLE: &str = "Upgradeable";

// =============================================================================
// ClusterCSIDriver CRD
// =============================================================================

/// ClusterCSIDriver configures a CSI driver managed by the operator.
///
/// The spec is owned by other controllers of the operator; this crate only
/// reads and writes the status.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "ClusterCSIDriver",
    plural = "clustercsidrivers",
    status = "OperatorStatus",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
pub struct ClusterCSIDriverSpec {}

// =============================================================================
// Status
// =============================================================================

/// Operator status shared by all controllers of the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    /// Conditions, in insertion order
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,

    /// Generation last acted on
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl OperatorStatus {
    /// Find a condition by its full type
    pub fn find_condition(&self, condition_type: &str) -> Option<&OperatorCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Find a condition by its full type, mutably
    pub fn find_condition_mut(&mut self, condition_type: &str) -> Option<&mut OperatorCondition> {
        self.conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Status of a condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A single operator condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    /// Condition type, prefixed by the owning controller name
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl OperatorCondition {
    pub fn new(condition_type: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: String::new(),
            message: String::new(),
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
