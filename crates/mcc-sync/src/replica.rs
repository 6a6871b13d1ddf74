//! The complete per-node cache state machine.
//!
//! One `CacheReplica` owns the store, the membership tracker, the
//! dissemination engine and the reconciler for a node, and is the single
//! mutation-serialization point: every local call and every received
//! datagram goes through `&mut self`, so version races cannot interleave.
//! The runtime wraps it in a mutex and wires it to a socket; tests drive
//! many replicas directly in one process.

use crate::reconcile::Reconciler;
use mcc_core::{CacheStore, EntrySnapshot, NodeId, StoreConfig, StoreError, VersionStamp};
use mcc_gossip::{
    CoherenceMessage, CoherenceMode, DisseminationEngine, Envelope, RxOutcome, SyncInbound,
    WireError,
};
use mcc_member::{LivenessWindows, MembershipTracker, PeerState};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Knobs for one replica, independent of any transport.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    pub store: StoreConfig,
    pub windows: LivenessWindows,
    pub mode: CoherenceMode,
    /// Capacity of the recent-message dedup window.
    pub dedup_window: usize,
    /// Maximum entries per digest datagram.
    pub digest_cap: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            windows: LivenessWindows::default(),
            mode: CoherenceMode::default(),
            dedup_window: 1024,
            digest_cap: 128,
        }
    }
}

pub struct CacheReplica {
    store: CacheStore,
    members: MembershipTracker,
    engine: DisseminationEngine,
    recon: Reconciler,
}

impl CacheReplica {
    pub fn new(node: NodeId, config: ReplicaConfig) -> Self {
        Self {
            store: CacheStore::new(node, config.store),
            members: MembershipTracker::new(node, config.windows),
            engine: DisseminationEngine::new(node, config.mode, config.dedup_window),
            recon: Reconciler::new(node, config.digest_cap),
        }
    }

    pub fn node(&self) -> NodeId {
        self.engine.node()
    }

    /// Local read; never touches the network.
    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.get(key).map(|v| v.to_vec())
    }

    /// Local write: applied immediately, returns the envelope to
    /// broadcast so peers converge.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(VersionStamp, Envelope), StoreError> {
        let version = self.store.put(key, value.clone())?;
        let env = self
            .engine
            .seal(CoherenceMessage::put(key.to_vec(), value, version));
        trace!(key = ?String::from_utf8_lossy(key), %version, "local put");
        Ok((version, env))
    }

    /// Local delete: tombstones immediately, returns the envelope to
    /// broadcast. `None` means the key was not found.
    pub fn delete(&mut self, key: &[u8], now: Instant) -> Option<(VersionStamp, Envelope)> {
        let version = self.store.delete(key, now)?;
        let env = self.engine.seal(CoherenceMessage::Delete {
            key: key.to_vec(),
            version,
        });
        trace!(key = ?String::from_utf8_lossy(key), %version, "local delete");
        Some((version, env))
    }

    pub fn heartbeat(&mut self) -> Envelope {
        self.engine.seal(CoherenceMessage::Heartbeat)
    }

    /// Orderly departure announcement, broadcast best-effort on shutdown.
    pub fn goodbye(&mut self) -> Envelope {
        self.engine.seal(CoherenceMessage::Bye)
    }

    /// Liveness sweep; returns the transitions taken.
    pub fn sweep(&mut self, now: Instant) -> Vec<(NodeId, PeerState)> {
        self.members.sweep(now)
    }

    pub fn purge_tombstones(&mut self, now: Instant) -> usize {
        self.store.purge_tombstones(now)
    }

    /// Reconciliation timer tick; the cluster size for initiator election
    /// is everything we have ever heard plus ourselves.
    pub fn sync_tick(&mut self) -> Option<Envelope> {
        let cluster_size = self.members.known_count() + 1;
        self.recon
            .tick(cluster_size)
            .map(|msg| self.engine.seal(msg))
    }

    /// Feed one raw datagram through the receive path. Returns any
    /// envelopes the replica wants broadcast in response (digest serves,
    /// pulls, heals).
    pub fn handle_datagram(&mut self, bytes: &[u8], now: Instant) -> Result<Vec<Envelope>, WireError> {
        let env = Envelope::decode(bytes)?;
        let outcome = self
            .engine
            .on_envelope(env, &mut self.store, &mut self.members, now);
        let replies = match outcome {
            RxOutcome::Applied { ref key, version } => {
                debug!(key = ?String::from_utf8_lossy(key), %version, "applied remote mutation");
                Vec::new()
            }
            RxOutcome::Sync(SyncInbound::DigestRequest { from, round }) => {
                vec![self.recon.serve_digest(&self.store, from, round)]
            }
            RxOutcome::Sync(SyncInbound::Digest { from, round, entries }) => {
                self.recon.on_digest(&self.store, from, round, &entries)
            }
            RxOutcome::Sync(SyncInbound::Pull { keys, .. }) => self.recon.on_pull(&self.store, &keys),
            _ => Vec::new(),
        };
        Ok(replies.into_iter().map(|msg| self.engine.seal(msg)).collect())
    }

    pub fn live_peers(&self) -> Vec<NodeId> {
        self.members.live_peers()
    }

    pub fn peer_state(&self, id: NodeId) -> Option<PeerState> {
        self.members.state_of(id)
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Ordered view of the whole store, for dumps and convergence checks.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, EntrySnapshot> {
        self.store.snapshot()
    }
}
