//! Hierarchical locks.
//!
//! Threads are grouped into clusters by a
//! [`ThreadRegistry`](crate::registry::ThreadRegistry), modelling the sockets
//! or NUMA nodes of a machine. These locks favour handing the lock over to a
//! thread of the same cluster as the current holder, trading fairness for
//! fewer cross-cluster cache transfers.

mod hbo;
mod hclh;

pub use hbo::HboLock;
pub use hclh::{HclhLock, HclhNode, MAX_CLUSTERS};
