//! Operator configuration
//!
//! Optional YAML file deserialised into [`OperatorConfig`]. Every field has
//! a default so a partial file, or none at all, is valid. Command line and
//! environment values are applied on top by the binary.

use crate::checks::DriverRequirements;
use crate::controller::{CheckerConfig, ControllerConfig, DEFAULT_CONTROLLER_NAME};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Name of the ClusterCSIDriver object holding the operator status
pub const DEFAULT_CLUSTER_CSI_DRIVER: &str = "csi.vsphere.vmware.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Prefix of the condition types written by the controller
    pub controller_name: String,

    /// ClusterCSIDriver object to write conditions to
    pub cluster_csi_driver: String,

    /// Driver minimums
    pub requirements: DriverRequirements,

    /// Seconds between checks while the environment passes
    pub recheck_interval_secs: u64,

    /// Seconds before the first recheck after a failure
    pub failure_initial_delay_secs: u64,

    /// Seconds between periodic syncs
    pub resync_interval_secs: u64,

    /// Never run the checks and leave state untouched
    pub skip_checks: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            cluster_csi_driver: DEFAULT_CLUSTER_CSI_DRIVER.to_string(),
            requirements: DriverRequirements::default(),
            recheck_interval_secs: 3600,
            failure_initial_delay_secs: 60,
            resync_interval_secs: 60,
            skip_checks: false,
        }
    }
}

impl OperatorConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: OperatorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        info!(path = %path.display(), "loaded operator configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller_name.is_empty() {
            return Err(Error::Configuration("controllerName must not be empty".into()));
        }
        if self.requirements.driver_name.is_empty() {
            return Err(Error::Configuration("requirements.driverName must not be empty".into()));
        }
        if self.recheck_interval_secs == 0 || self.resync_interval_secs == 0 {
            return Err(Error::Configuration(
                "recheck and resync intervals must be positive".into(),
            ));
        }
        if self.failure_initial_delay_secs == 0 || self.failure_initial_delay_secs > self.recheck_interval_secs {
            return Err(Error::Configuration(format!(
                "failureInitialDelaySecs must be between 1 and recheckIntervalSecs ({})",
                self.recheck_interval_secs
            )));
        }
        Ok(())
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            recheck_interval: Duration::from_secs(self.recheck_interval_secs),
            failure_initial_delay: Duration::from_secs(self.failure_initial_delay_secs),
            ..Default::default()
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            name: self.controller_name.clone(),
            requirements: self.requirements.clone(),
        }
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}
