//! The per-node membership tracker.

use mcc_core::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Liveness state of a known peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Alive,
    Suspect,
    Dead,
}

/// What the tracker knows about one peer.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub id: NodeId,
    pub last_seen: Instant,
    pub state: PeerState,
}

/// Staleness thresholds for the liveness sweep.
#[derive(Clone, Copy, Debug)]
pub struct LivenessWindows {
    /// Silence beyond this demotes `Alive` to `Suspect`.
    pub suspect_after: Duration,
    /// Silence beyond this demotes `Suspect` to `Dead`.
    pub dead_after: Duration,
}

impl Default for LivenessWindows {
    fn default() -> Self {
        Self {
            suspect_after: Duration::from_secs(2),
            dead_after: Duration::from_secs(6),
        }
    }
}

/// Tracks every peer this node has ever heard from.
///
/// Mutated only from the packet-receive path (`observe`, `mark_left`) and
/// the periodic sweep; nothing else writes to the mapping.
pub struct MembershipTracker {
    local: NodeId,
    windows: LivenessWindows,
    peers: HashMap<NodeId, PeerRecord>,
}

impl MembershipTracker {
    pub fn new(local: NodeId, windows: LivenessWindows) -> Self {
        Self {
            local,
            windows,
            peers: HashMap::new(),
        }
    }

    pub fn local(&self) -> NodeId {
        self.local
    }

    /// Register that a packet from `origin` arrived at `now`.
    ///
    /// A first contact creates the record; any contact revives a suspect
    /// or dead peer. The local node is never tracked as its own peer.
    pub fn observe(&mut self, origin: NodeId, now: Instant) {
        if origin == self.local {
            return;
        }
        match self.peers.get_mut(&origin) {
            Some(record) => {
                if record.state != PeerState::Alive {
                    info!(peer = %origin, from = ?record.state, "peer is alive again");
                }
                record.state = PeerState::Alive;
                record.last_seen = now;
            }
            None => {
                info!(peer = %origin, "discovered new peer");
                self.peers.insert(
                    origin,
                    PeerRecord {
                        id: origin,
                        last_seen: now,
                        state: PeerState::Alive,
                    },
                );
            }
        }
    }

    /// An orderly goodbye moves the peer straight to `Dead`.
    pub fn mark_left(&mut self, origin: NodeId) {
        if let Some(record) = self.peers.get_mut(&origin) {
            if record.state != PeerState::Dead {
                info!(peer = %origin, "peer left the group");
                record.state = PeerState::Dead;
            }
        }
    }

    /// Demote peers whose records have gone stale. Returns the transitions
    /// taken this pass, for the caller's log sink.
    pub fn sweep(&mut self, now: Instant) -> Vec<(NodeId, PeerState)> {
        let mut transitions = Vec::new();
        for record in self.peers.values_mut() {
            let silent_for = now.duration_since(record.last_seen);
            let next = match record.state {
                PeerState::Alive if silent_for >= self.windows.suspect_after => PeerState::Suspect,
                PeerState::Suspect if silent_for >= self.windows.dead_after => PeerState::Dead,
                _ => continue,
            };
            debug!(peer = %record.id, ?silent_for, ?next, "liveness demotion");
            record.state = next;
            transitions.push((record.id, next));
        }
        transitions
    }

    /// Peers currently believed alive. Informational: multicast delivery is
    /// unconditional, so this gates nothing.
    pub fn live_peers(&self) -> Vec<NodeId> {
        self.peers
            .values()
            .filter(|r| r.state == PeerState::Alive)
            .map(|r| r.id)
            .collect()
    }

    pub fn state_of(&self, id: NodeId) -> Option<PeerState> {
        self.peers.get(&id).map(|r| r.state)
    }

    /// Every known peer, dead ones included (diagnostics).
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn known_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u128) -> NodeId {
        NodeId::from_parts(0, n)
    }

    fn tracker() -> MembershipTracker {
        MembershipTracker::new(
            node(0),
            LivenessWindows {
                suspect_after: Duration::from_millis(100),
                dead_after: Duration::from_millis(300),
            },
        )
    }

    #[test]
    fn test_first_contact_creates_alive_record() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(node(1), now);
        assert_eq!(t.state_of(node(1)), Some(PeerState::Alive));
        assert_eq!(t.live_peers(), vec![node(1)]);
    }

    #[test]
    fn test_local_node_is_not_tracked() {
        let mut t = tracker();
        t.observe(node(0), Instant::now());
        assert_eq!(t.known_count(), 0);
    }

    #[test]
    fn test_silence_demotes_then_kills() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(node(1), now);

        let later = now + Duration::from_millis(150);
        let transitions = t.sweep(later);
        assert_eq!(transitions, vec![(node(1), PeerState::Suspect)]);

        let much_later = now + Duration::from_millis(400);
        let transitions = t.sweep(much_later);
        assert_eq!(transitions, vec![(node(1), PeerState::Dead)]);

        // Dead records stay visible.
        assert_eq!(t.known_count(), 1);
        assert!(t.live_peers().is_empty());
    }

    #[test]
    fn test_fresh_packet_revives_dead_peer() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(node(1), now);
        t.sweep(now + Duration::from_millis(400));
        assert_eq!(t.state_of(node(1)), Some(PeerState::Dead));

        t.observe(node(1), now + Duration::from_millis(500));
        assert_eq!(t.state_of(node(1)), Some(PeerState::Alive));
    }

    #[test]
    fn test_goodbye_skips_suspect() {
        let mut t = tracker();
        t.observe(node(1), Instant::now());
        t.mark_left(node(1));
        assert_eq!(t.state_of(node(1)), Some(PeerState::Dead));
    }

    #[test]
    fn test_sweep_is_quiet_for_fresh_peers() {
        let mut t = tracker();
        let now = Instant::now();
        t.observe(node(1), now);
        t.observe(node(2), now);
        assert!(t.sweep(now + Duration::from_millis(50)).is_empty());
        assert_eq!(t.live_peers().len(), 2);
    }
}
