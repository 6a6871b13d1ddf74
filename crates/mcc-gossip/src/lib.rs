//! The multicast coherence protocol: message types, the duplicate-
//! suppression window and the engine that applies peer traffic to the
//! local store.
//!
//! Everything here is transport-agnostic: the engine consumes decoded
//! envelopes and returns outcomes; sockets and timers live elsewhere.

pub mod dedup;
pub mod engine;
pub mod message;

pub use dedup::DedupWindow;
pub use engine::{CoherenceMode, DisseminationEngine, RxOutcome, SyncInbound};
pub use message::{CoherenceMessage, DigestEntry, Envelope, ValueDigest, WireError};
