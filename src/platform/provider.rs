//! Static connection provider
//!
//! Hands out a pre-built connection, or a configured failure. The failure
//! can be switched at runtime to simulate vCenter outages.

use crate::checks::CheckResult;
use crate::domain::ports::{ConnectionOutcome, ConnectionProvider, PlatformConnectionRef};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Connection provider backed by a fixed connection
pub struct StaticConnectionProvider {
    connection: Option<PlatformConnectionRef>,
    failure: RwLock<Option<String>>,
}

impl StaticConnectionProvider {
    /// Always hands out `connection`
    pub fn new(connection: PlatformConnectionRef) -> Self {
        Self {
            connection: Some(connection),
            failure: RwLock::new(None),
        }
    }

    /// Always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            connection: None,
            failure: RwLock::new(Some(message.into())),
        }
    }

    /// Make subsequent attempts fail, or succeed again with `None`
    pub fn set_failure(&self, failure: Option<String>) {
        *self.failure.write() = failure;
    }
}

#[async_trait]
impl ConnectionProvider for StaticConnectionProvider {
    async fn obtain_connection(&self, cancel: &CancellationToken) -> ConnectionOutcome {
        if cancel.is_cancelled() {
            return ConnectionOutcome::failed(CheckResult::cancelled());
        }

        if let Some(message) = self.failure.read().clone() {
            warn!(error = %message, "failed to connect to vCenter");
            return ConnectionOutcome::failed(CheckResult::connection_failed(message));
        }

        match &self.connection {
            Some(conn) => {
                debug!(host = conn.host(), "using vCenter connection");
                ConnectionOutcome::connected(conn.clone())
            }
            None => ConnectionOutcome::failed(CheckResult::connection_failed(
                "no vCenter connection configured",
            )),
        }
    }
}
