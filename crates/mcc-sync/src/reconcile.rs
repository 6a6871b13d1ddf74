//! Reconciliation round logic.
//!
//! Rounds are numbered by a shared timer cadence. To bound digest traffic
//! only one slot initiates per round: a node asks for digests when its id
//! hashes onto the current round modulo the cluster size. A round still
//! awaiting digests when the next tick fires is abandoned, not queued, so
//! reconciliation can never wedge behind one lost reply.

use crate::digest::{build_digest, diff_digest};
use mcc_core::{CacheStore, NodeId};
use mcc_gossip::{CoherenceMessage, DigestEntry};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

pub struct Reconciler {
    node: NodeId,
    digest_cap: usize,
    round: u64,
    in_flight: Option<u64>,
}

impl Reconciler {
    pub fn new(node: NodeId, digest_cap: usize) -> Self {
        Self {
            node,
            digest_cap,
            round: 0,
            in_flight: None,
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// Timer tick. Returns a digest request when this node is the
    /// initiator for the new round and no round is pending.
    pub fn tick(&mut self, cluster_size: usize) -> Option<CoherenceMessage> {
        self.round += 1;
        if self.in_flight.take().is_some() {
            debug!(round = self.round, "previous reconciliation round still open, skipping");
            return None;
        }
        if !self.is_initiator(self.round, cluster_size) {
            return None;
        }
        self.in_flight = Some(self.round);
        Some(CoherenceMessage::DigestRequest { round: self.round })
    }

    /// Answer a peer's digest request with a summary addressed to it.
    pub fn serve_digest(
        &self,
        store: &CacheStore,
        requester: NodeId,
        round: u64,
    ) -> CoherenceMessage {
        CoherenceMessage::Digest {
            round,
            to: requester,
            entries: build_digest(store, self.digest_cap),
        }
    }

    /// Compare a received digest against the local store. Returns the
    /// repair traffic to broadcast: one targeted pull for missing/newer
    /// keys plus re-broadcasts for keys the sender is behind on.
    pub fn on_digest(
        &mut self,
        store: &CacheStore,
        from: NodeId,
        round: u64,
        entries: &[DigestEntry],
    ) -> Vec<CoherenceMessage> {
        if self.in_flight == Some(round) {
            self.in_flight = None;
        }
        let delta = diff_digest(store, entries);
        if delta.is_empty() {
            return Vec::new();
        }
        debug!(
            peer = %from,
            round,
            pulls = delta.pull.len(),
            heals = delta.heal.len(),
            "digest divergence detected"
        );
        let mut repairs = Vec::new();
        if !delta.pull.is_empty() {
            repairs.push(CoherenceMessage::Pull {
                to: from,
                keys: delta.pull,
            });
        }
        for key in &delta.heal {
            repairs.extend(self.rebroadcast(store, key));
        }
        repairs
    }

    /// Serve a pull by re-broadcasting the requested keys.
    pub fn on_pull(&self, store: &CacheStore, keys: &[Vec<u8>]) -> Vec<CoherenceMessage> {
        keys.iter()
            .filter_map(|key| self.rebroadcast(store, key))
            .collect()
    }

    /// Re-emit whatever the store holds for a key: the live value as a
    /// write, a tombstone as a delete, nothing when the key is gone.
    fn rebroadcast(&self, store: &CacheStore, key: &[u8]) -> Option<CoherenceMessage> {
        let version = store.version_of(key)?;
        match store.peek(key) {
            Some(value) => Some(CoherenceMessage::put(key.to_vec(), value.to_vec(), version)),
            None => Some(CoherenceMessage::Delete {
                key: key.to_vec(),
                version,
            }),
        }
    }

    fn is_initiator(&self, round: u64, cluster_size: usize) -> bool {
        let stride = cluster_size.max(1) as u64;
        let mut hasher = DefaultHasher::new();
        self.node.hash(&mut hasher);
        hasher.finish() % stride == round % stride
    }
}
