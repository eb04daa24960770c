//! Existing driver check
//!
//! A CSI driver for vSphere installed by someone other than the operator
//! must be removed before the operator installs its own.

use super::{CheckArgs, CheckResult, CheckStatus, EnvironmentCheck};
use async_trait::async_trait;
use tracing::warn;

/// Blocks installation when a foreign driver or node registration exists
pub struct ExistingDriverCheck;

#[async_trait]
impl EnvironmentCheck for ExistingDriverCheck {
    fn name(&self) -> &'static str {
        "existing_driver"
    }

    async fn check(&self, args: &CheckArgs) -> CheckResult {
        let presence = &args.snapshot.presence;
        let driver_name = &args.requirements.driver_name;

        if presence.has_foreign_driver() {
            warn!(driver = %driver_name, "found CSIDriver not installed by the operator");
            return CheckResult::block_install(
                CheckStatus::ExistingDriverFound,
                format!(
                    "found existing unsupported {} driver, remove it before installing the operator managed driver",
                    driver_name
                ),
            );
        }

        if presence.has_foreign_node_registrations() {
            warn!(
                driver = %driver_name,
                nodes = ?presence.registered_nodes,
                "found CSINode registrations not installed by the operator"
            );
            return CheckResult::block_install(
                CheckStatus::ExistingDriverFound,
                format!(
                    "found existing unsupported {} driver registered on nodes {}",
                    driver_name,
                    presence.registered_nodes.join(", ")
                ),
            );
        }

        CheckResult::pass()
    }
}
