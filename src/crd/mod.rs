//! Custom Resource Definitions for the CSI driver operator
//!
//! - ClusterCSIDriver: the operator resource whose status carries conditions

pub mod cluster_csi_driver;

pub use cluster_csi_driver::*;
