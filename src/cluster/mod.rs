//! Cluster Adapters
//!
//! Implementations of the cluster-facing ports:
//! - Kubernetes API (CSIDriver, CSINode, Node, ClusterCSIDriver status)
//! - In-memory (standalone mode and tests)

pub mod kubernetes;
pub mod memory;

pub use kubernetes::*;
pub use memory::*;
