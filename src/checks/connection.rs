//! Connection check
//!
//! Surfaces the connection provider's outcome as the first, gating check.

use super::{CheckArgs, CheckResult, EnvironmentCheck};
use async_trait::async_trait;

/// Fails when no vCenter connection could be established
pub struct ConnectionCheck;

#[async_trait]
impl EnvironmentCheck for ConnectionCheck {
    fn name(&self) -> &'static str {
        "connection"
    }

    async fn check(&self, args: &CheckArgs) -> CheckResult {
        match args.connection() {
            Ok(_) => CheckResult::pass(),
            Err(failure) => failure,
        }
    }

    fn is_gating(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckAction, CheckStatus, DriverRequirements};
    use crate::domain::ClusterSnapshot;

    #[tokio::test]
    async fn test_missing_connection_without_failure_still_fails() {
        let args = CheckArgs {
            connection: None,
            connection_result: CheckResult::pass(),
            snapshot: ClusterSnapshot::default(),
            requirements: DriverRequirements::default(),
        };

        let result = ConnectionCheck.check(&args).await;
        assert_eq!(result.action, CheckAction::BlockUpgrade);
        assert_eq!(result.status, CheckStatus::VSphereConnectionFailed);
        assert!(result.is_hard_failure());
    }

    #[tokio::test]
    async fn test_provider_failure_passed_through() {
        let failure = CheckResult::connection_failed("x509: certificate signed by unknown authority");
        let args = CheckArgs {
            connection: None,
            connection_result: failure.clone(),
            snapshot: ClusterSnapshot::default(),
            requirements: DriverRequirements::default(),
        };

        assert_eq!(ConnectionCheck.check(&args).await, failure);
    }
}
