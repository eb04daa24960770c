//! vSphere CSI Driver Operator - Compatibility Gate
//!
//! Decides whether the vSphere CSI driver may be installed or upgraded on a
//! cluster, and reports that decision through operator conditions and a
//! Prometheus metric.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          VSphereController::sync                      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌────────────────────┐  │
//! │  │ ClusterState     │  │ Connection       │  │ Environment        │  │
//! │  │ Reader           │  │ Provider         │  │ Checker (cached)   │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  └─────────┬──────────┘  │
//! │           └─────────────────────┼──────────────────────┘             │
//! │                                 │                                    │
//! │                     ┌───────────┴───────────┐                        │
//! │                     │       CheckSet        │                        │
//! │                     │ connection → vcenter  │                        │
//! │                     │ → esxi → driver → hw  │                        │
//! │                     └───────────┬───────────┘                        │
//! │                                 │ CheckResult                        │
//! ├─────────────────────────────────┼────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌────────┴─────────┐  ┌────────────────────┐  │
//! │  │ Operator         │  │ Error Metric     │  │ Operand            │  │
//! │  │ Conditions       │  │ Recorder         │  │ Controller         │  │
//! │  └──────────────────┘  └──────────────────┘  └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`checks`]: Individual compatibility checks and result aggregation
//! - [`controller`]: Cached checker, condition reconciliation, metrics, sync
//! - [`cluster`]: Kubernetes and in-memory cluster adapters
//! - [`platform`]: vCenter connection providers and the simulator
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Port traits shared by the layers
//! - [`config`]: Operator configuration file
//! - [`error`]: Error types and handling

pub mod checks;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod platform;

// Re-export commonly used types
pub use checks::{
    CheckAction, CheckArgs, CheckResult, CheckSet, CheckStatus, DriverRequirements,
    EnvironmentCheck, HardwareVersion, ProductVersion,
};

pub use cluster::{InMemoryClusterState, InMemoryStatusClient, KubeClusterState, KubeStatusClient};

pub use config::OperatorConfig;

pub use controller::{
    CheckOutcome, CheckerConfig, CompositeChecker, ControllerConfig, ControllerPorts,
    EnvironmentChecker, ErrorCondition, ErrorMetricRecorder, OperandSwitch, SkippingChecker,
    VSphereController,
};

pub use crd::{ClusterCSIDriver, ConditionStatus, OperatorCondition, OperatorStatus};

pub use domain::ports::{
    ClusterSnapshot, ClusterStateReader, ConnectionOutcome, ConnectionProvider, DriverPresence,
    NodeInfo, OperandController, OperatorStatusClient, PlatformConnection, VersionedStatus,
};

pub use error::{Error, ErrorAction, Result};

pub use platform::{SimulatedVCenter, StaticConnectionProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
