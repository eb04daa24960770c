//! vSphere Controller
//!
//! Gates the CSI driver operand on environment compatibility:
//! - `environment`: cached, scheduled evaluation of the check set
//! - `conditions`: idempotent Available/Upgradeable condition writes
//! - `metrics`: the installation error gauge
//! - `operand`: start/stop switch for the driver operand
//! - `sync`: one reconciliation pass tying the above together

pub mod conditions;
pub mod environment;
pub mod metrics;
pub mod operand;
pub mod sync;

pub use conditions::{
    add_upgradeable_block_condition, available_condition_type, on_failure_status,
    set_available_condition, upgradeable_condition_type,
};
pub use environment::{CheckOutcome, CheckerConfig, CompositeChecker, EnvironmentChecker, SkippingChecker};
pub use metrics::{ErrorCondition, ErrorMetricRecorder, INSTALL_ERROR_METRIC};
pub use operand::OperandSwitch;
pub use sync::{ControllerConfig, ControllerPorts, VSphereController, DEFAULT_CONTROLLER_NAME};
