//! Version stamps and the per-node logical clock.
//!
//! Every mutation carries a `VersionStamp`: a Lamport-style counter paired
//! with the id of the node that issued the write. Stamps are totally
//! ordered (counter first, origin id second), so any two concurrent writes
//! to the same key resolve to the same winner on every node regardless of
//! delivery order.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a cache node.
///
/// ULIDs are lexicographically sortable, which gives the deterministic
/// origin-id tie-break a well-defined total order across the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Generate a fresh random node id.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Build a node id from raw parts. Mainly useful for deterministic
    /// simulation, where node ids must be reproducible across runs.
    pub fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(Ulid::from_parts(timestamp_ms, random))
    }
}

impl From<Ulid> for NodeId {
    fn from(id: Ulid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A totally ordered write stamp: `(counter, origin)`.
///
/// Derived `Ord` compares `counter` first and falls back to the origin id,
/// so equal counters from different writers still have a single winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionStamp {
    pub counter: u64,
    pub origin: NodeId,
}

impl VersionStamp {
    pub fn new(counter: u64, origin: NodeId) -> Self {
        Self { counter, origin }
    }

    /// Strictly-greater comparison used by the apply rules: an incoming
    /// write replaces the held one only if it supersedes it.
    pub fn supersedes(&self, other: &VersionStamp) -> bool {
        self > other
    }
}

impl std::fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.counter, self.origin)
    }
}

/// Per-node monotonic counter with Lamport semantics.
///
/// `witness` ratchets the counter up to any remotely observed value, so the
/// next local `tick` is guaranteed to supersede everything this node has
/// seen on the wire.
#[derive(Clone, Debug, Default)]
pub struct VersionClock {
    counter: u64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock and return the new counter value.
    pub fn tick(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Observe a remote counter value without producing a new stamp.
    pub fn witness(&mut self, remote: u64) {
        if remote > self.counter {
            self.counter = remote;
        }
    }

    pub fn current(&self) -> u64 {
        self.counter
    }
}
