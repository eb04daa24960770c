//! Error types for the vSphere CSI Driver Operator
//!
//! Provides structured error types for the sync loop, the cluster and
//! platform ports, and configuration loading.

use std::time::Duration;
use thiserror::Error;

use crate::checks::CheckStatus;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Cluster state unavailable: {0}")]
    ClusterState(String),

    #[error("Operator status update failed: {0}")]
    StatusUpdate(String),

    /// The status object changed after it was read
    #[error("Operator status changed concurrently: {0}")]
    StatusConflict(String),

    // =========================================================================
    // Platform Errors
    // =========================================================================
    #[error("vCenter API error: {0}")]
    VCenterApi(String),

    #[error("Virtual machine not found for node {node}")]
    VmNotFound { node: String },

    #[error("Version parse error: {0}")]
    VersionParse(String),

    // =========================================================================
    // Sync Errors
    // =========================================================================
    /// A hard check failure observed while an operator-owned driver is
    /// installed. The framework surfaces it as Degraded.
    #[error("Environment check {status} failed: {reason}")]
    CheckFailed {
        status: CheckStatus,
        reason: String,
        requeue_after: Duration,
    },

    #[error("Sync cancelled")]
    Cancelled,

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::ClusterState(_)
            | Error::StatusUpdate(_)
            | Error::StatusConflict(_)
            | Error::VCenterApi(_) => ErrorAction::RequeueWithBackoff,

            // Degraded install - recheck when the environment checker is due
            Error::CheckFailed { requeue_after, .. } => ErrorAction::RequeueAfter(*requeue_after),

            // The next trigger will run a fresh sync
            Error::Cancelled => ErrorAction::NoRequeue,

            // Configuration errors - don't retry automatically
            Error::Configuration(_) | Error::VersionParse(_) | Error::YamlParse(_) => {
                ErrorAction::NoRequeue
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error should mark the operator Degraded
    pub fn is_degrading(&self) -> bool {
        !matches!(self, Error::Cancelled)
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
