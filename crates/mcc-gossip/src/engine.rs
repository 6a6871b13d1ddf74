//! The dissemination engine: seals outgoing messages and applies peer
//! traffic to the local store under the deterministic conflict rule.
//!
//! Broadcast is fire-and-forget; nothing here waits for acknowledgment.
//! The receive path runs in a fixed order: refresh membership, suppress
//! duplicates, then apply. Stale writes are an expected outcome, not an
//! error.

use crate::dedup::DedupWindow;
use crate::message::{CoherenceMessage, DigestEntry, Envelope};
use mcc_core::{CacheStore, NodeId, VersionStamp};
use mcc_member::MembershipTracker;
use std::time::Instant;
use tracing::{debug, warn};

/// How a remote write affects the local store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoherenceMode {
    /// Apply remote writes locally (the group converges on values).
    #[default]
    Replicate,
    /// Evict the local entry instead, forcing callers to re-fetch.
    Invalidate,
}

impl std::str::FromStr for CoherenceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replicate" => Ok(Self::Replicate),
            "invalidate" => Ok(Self::Invalidate),
            other => Err(format!("unknown coherence mode: {other}")),
        }
    }
}

/// Reconciliation traffic surfaced to the caller; the engine itself does
/// not run rounds.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncInbound {
    DigestRequest { from: NodeId, round: u64 },
    Digest {
        from: NodeId,
        round: u64,
        entries: Vec<DigestEntry>,
    },
    Pull { from: NodeId, keys: Vec<Vec<u8>> },
}

/// Outcome of one received envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum RxOutcome {
    /// Our own broadcast looped back; never re-applied.
    SelfEcho,
    /// Suppressed by the recent-message window.
    Duplicate,
    /// Carried a version not greater than the held one; discarded.
    Stale,
    /// Payload failed checksum verification; dropped.
    BadChecksum,
    /// A write or delete changed the store.
    Applied { key: Vec<u8>, version: VersionStamp },
    /// Invalidation mode evicted the local entry.
    Invalidated { key: Vec<u8> },
    /// Liveness-only traffic.
    Heartbeat,
    /// The origin announced departure.
    PeerLeft,
    /// Reconciliation traffic addressed to another node.
    NotAddressed,
    /// Reconciliation traffic for the caller to act on.
    Sync(SyncInbound),
}

pub struct DisseminationEngine {
    node: NodeId,
    seq: u64,
    window: DedupWindow,
    mode: CoherenceMode,
}

impl DisseminationEngine {
    pub fn new(node: NodeId, mode: CoherenceMode, window_cap: usize) -> Self {
        Self {
            node,
            seq: 0,
            window: DedupWindow::new(window_cap),
            mode,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn mode(&self) -> CoherenceMode {
        self.mode
    }

    /// Wrap a message in an envelope with the next sequence number.
    pub fn seal(&mut self, message: CoherenceMessage) -> Envelope {
        self.seq += 1;
        Envelope {
            origin: self.node,
            seq: self.seq,
            message,
        }
    }

    /// Process one received envelope against the local state.
    pub fn on_envelope(
        &mut self,
        env: Envelope,
        store: &mut CacheStore,
        members: &mut MembershipTracker,
        now: Instant,
    ) -> RxOutcome {
        if env.origin == self.node {
            return RxOutcome::SelfEcho;
        }
        // Any packet proves the origin is alive, duplicates included.
        members.observe(env.origin, now);
        if !self.window.record(env.origin, env.seq) {
            debug!(origin = %env.origin, seq = env.seq, "duplicate suppressed");
            return RxOutcome::Duplicate;
        }

        match env.message {
            CoherenceMessage::Heartbeat => RxOutcome::Heartbeat,
            CoherenceMessage::Bye => {
                members.mark_left(env.origin);
                RxOutcome::PeerLeft
            }
            CoherenceMessage::Put {
                key,
                value,
                version,
                checksum,
            } => {
                if !checksum.matches(&value) {
                    warn!(origin = %env.origin, seq = env.seq, "checksum mismatch, dropping write");
                    return RxOutcome::BadChecksum;
                }
                match self.mode {
                    CoherenceMode::Replicate => {
                        if store.apply_remote_put(&key, value, version) {
                            RxOutcome::Applied { key, version }
                        } else {
                            RxOutcome::Stale
                        }
                    }
                    CoherenceMode::Invalidate => {
                        store.evict_entry(&key);
                        RxOutcome::Invalidated { key }
                    }
                }
            }
            CoherenceMessage::Delete { key, version } => {
                if store.apply_remote_delete(&key, version, now) {
                    RxOutcome::Applied { key, version }
                } else {
                    RxOutcome::Stale
                }
            }
            CoherenceMessage::DigestRequest { round } => RxOutcome::Sync(SyncInbound::DigestRequest {
                from: env.origin,
                round,
            }),
            CoherenceMessage::Digest { round, to, entries } => {
                if to != self.node {
                    return RxOutcome::NotAddressed;
                }
                RxOutcome::Sync(SyncInbound::Digest {
                    from: env.origin,
                    round,
                    entries,
                })
            }
            CoherenceMessage::Pull { to, keys } => {
                if to != self.node {
                    return RxOutcome::NotAddressed;
                }
                RxOutcome::Sync(SyncInbound::Pull {
                    from: env.origin,
                    keys,
                })
            }
        }
    }
}
