//! Anti-entropy reconciliation and the symmetric replica state machine.
//!
//! Multicast delivery is lossy and unordered, so dissemination alone
//! leaves gaps. On a timer, an elected node asks the group for digest
//! summaries, compares them against its own store, pulls what it is
//! missing and re-broadcasts what the others lack. Every node runs the
//! identical logic; there is no leader.

pub mod cluster;
pub mod digest;
pub mod reconcile;
pub mod replica;

pub use cluster::{GroupLink, LinkConfig, SimCluster};
pub use digest::{build_digest, diff_digest, DigestDelta};
pub use reconcile::Reconciler;
pub use replica::{CacheReplica, ReplicaConfig};
