//! Platform Adapters
//!
//! Provides the vCenter side of the compatibility checks:
//! - Simulated vCenter (standalone mode and tests)
//! - Static connection provider

pub mod provider;
pub mod simulator;

pub use provider::*;
pub use simulator::*;
