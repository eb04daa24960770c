//! Operand switch
//!
//! Tracks whether the driver operand controllers have been started. The
//! gate only ever flips this switch; deploying the driver pods belongs to
//! the operand controllers themselves.

use crate::domain::ports::OperandController;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Operand controller that records start/stop transitions
#[derive(Debug, Default)]
pub struct OperandSwitch {
    running: AtomicBool,
    starts: AtomicU64,
}

impl OperandSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stopped-to-running transitions
    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperandController for OperandSwitch {
    async fn start(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            info!("starting driver operand controllers");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("stopping driver operand controllers");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
