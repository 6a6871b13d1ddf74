//! Cluster membership inferred from multicast traffic.
//!
//! There is no membership service and no join handshake: a peer exists
//! because we heard from it. Any received packet refreshes its record to
//! `Alive`; a periodic sweep demotes silent peers to `Suspect` and then
//! `Dead` on timeout. Records are never removed, so a node returning after
//! an outage is recognized rather than rediscovered.

pub mod tracker;

pub use tracker::{LivenessWindows, MembershipTracker, PeerRecord, PeerState};
