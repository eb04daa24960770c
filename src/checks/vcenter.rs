//! vCenter version check

use super::{CheckArgs, CheckResult, CheckStatus, EnvironmentCheck, ProductVersion};
use async_trait::async_trait;
use tracing::warn;

/// Blocks upgrades when vCenter is older than the driver minimum
pub struct VCenterVersionCheck;

#[async_trait]
impl EnvironmentCheck for VCenterVersionCheck {
    fn name(&self) -> &'static str {
        "vcenter_version"
    }

    async fn check(&self, args: &CheckArgs) -> CheckResult {
        let conn = match args.connection() {
            Ok(conn) => conn,
            Err(failure) => return failure,
        };

        let about = match conn.about().await {
            Ok(about) => about,
            Err(e) => return CheckResult::vcenter_api_error(e),
        };

        let version: ProductVersion = match about.version.parse() {
            Ok(v) => v,
            Err(e) => {
                return CheckResult::vcenter_api_error(format!(
                    "failed to parse vCenter version {:?}: {}",
                    about.version, e
                ))
            }
        };

        let minimum = args.requirements.minimum_vcenter_version;
        if version < minimum {
            warn!(host = conn.host(), %version, %minimum, "vCenter version below driver minimum");
            return CheckResult::block_upgrade(
                CheckStatus::DeprecatedVCenter,
                format!(
                    "found older vcenter version {}, expected is {}",
                    version, minimum
                ),
            );
        }

        CheckResult::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckAction, DriverRequirements};
    use crate::domain::ClusterSnapshot;
    use crate::platform::SimulatedVCenter;

    fn args_for(version: &str) -> CheckArgs {
        CheckArgs {
            connection: Some(SimulatedVCenter::builder().vcenter_version(version).build()),
            connection_result: CheckResult::pass(),
            snapshot: ClusterSnapshot::default(),
            requirements: DriverRequirements::default(),
        }
    }

    #[tokio::test]
    async fn test_supported_version_passes() {
        assert!(VCenterVersionCheck.check(&args_for("7.0.2")).await.is_pass());
        assert!(VCenterVersionCheck.check(&args_for("6.7.3")).await.is_pass());
    }

    #[tokio::test]
    async fn test_old_version_blocks_upgrade() {
        let result = VCenterVersionCheck.check(&args_for("6.5.0")).await;
        assert_eq!(result.action, CheckAction::BlockUpgrade);
        assert_eq!(result.status, CheckStatus::DeprecatedVCenter);
        assert!(result.reason.contains("expected is 6.7.3"));
        assert!(result.is_hard_failure());
    }

    #[tokio::test]
    async fn test_unparsable_version_is_api_error() {
        let result = VCenterVersionCheck.check(&args_for("seven")).await;
        assert_eq!(result.status, CheckStatus::VCenterApiError);
        assert_eq!(result.action, CheckAction::BlockUpgrade);
    }
}
