//! Node hardware version check
//!
//! The driver requires every node VM to run at least a minimum virtual
//! hardware version.

use super::{CheckArgs, CheckResult, CheckStatus, EnvironmentCheck, HardwareVersion};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Blocks upgrades when any node VM has an old hardware version
pub struct NodeHardwareCheck;

#[async_trait]
impl EnvironmentCheck for NodeHardwareCheck {
    fn name(&self) -> &'static str {
        "node_hardware"
    }

    async fn check(&self, args: &CheckArgs) -> CheckResult {
        let conn = match args.connection() {
            Ok(conn) => conn,
            Err(failure) => return failure,
        };

        let minimum = args.requirements.minimum_hardware_version;
        let mut outdated = Vec::new();

        for node in &args.snapshot.nodes {
            let raw = match conn.node_hardware_version(node).await {
                Ok(raw) => raw,
                Err(e) => return CheckResult::vcenter_api_error(e),
            };

            let version: HardwareVersion = match raw.parse() {
                Ok(v) => v,
                Err(e) => {
                    return CheckResult::vcenter_api_error(format!(
                        "failed to parse hardware version of node {}: {}",
                        node.name, e
                    ))
                }
            };

            debug!(node = %node.name, %version, "read node hardware version");
            if version < minimum {
                outdated.push(format!("{} ({})", node.name, version));
            }
        }

        if outdated.is_empty() {
            return CheckResult::pass();
        }

        warn!(nodes = ?outdated, %minimum, "node hardware versions below driver minimum");
        CheckResult::block_upgrade(
            CheckStatus::DeprecatedHwVersion,
            format!(
                "the node hardware version of {} is lower than the minimum required version {}",
                outdated.join(", "),
                minimum
            ),
        )
    }
}
