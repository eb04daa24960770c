//! ESXi host version check

use super::{CheckArgs, CheckResult, CheckStatus, EnvironmentCheck, ProductVersion};
use async_trait::async_trait;
use tracing::warn;

/// Blocks upgrades when any ESXi host is older than the driver minimum
pub struct EsxiVersionCheck;

#[async_trait]
impl EnvironmentCheck for EsxiVersionCheck {
    fn name(&self) -> &'static str {
        "esxi_version"
    }

    async fn check(&self, args: &CheckArgs) -> CheckResult {
        let conn = match args.connection() {
            Ok(conn) => conn,
            Err(failure) => return failure,
        };

        let hosts = match conn.host_versions().await {
            Ok(hosts) => hosts,
            Err(e) => return CheckResult::vcenter_api_error(e),
        };

        let minimum = args.requirements.minimum_esxi_version;
        let mut outdated = Vec::new();
        for host in &hosts {
            match host.version.parse::<ProductVersion>() {
                Ok(version) if version < minimum => {
                    outdated.push(format!("{} ({})", host.name, version));
                }
                Ok(_) => {}
                Err(e) => {
                    return CheckResult::vcenter_api_error(format!(
                        "failed to parse ESXi version of host {}: {}",
                        host.name, e
                    ))
                }
            }
        }

        if outdated.is_empty() {
            return CheckResult::pass();
        }

        warn!(hosts = ?outdated, %minimum, "ESXi hosts below driver minimum");
        CheckResult::block_upgrade(
            CheckStatus::DeprecatedEsxiVersion,
            format!(
                "found older ESXi version on hosts {}, minimum required version is {}",
                outdated.join(", "),
                minimum
            ),
        )
    }
}
