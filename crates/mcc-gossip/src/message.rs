//! Wire format of the coherence traffic.
//!
//! Every datagram is one bincode-encoded [`Envelope`]: the originating
//! node, a per-origin sequence number (the dedup key) and the message
//! itself. Messages are transient; nothing here is ever persisted.

use mcc_core::{NodeId, VersionStamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("datagram codec: {0}")]
    Codec(#[from] bincode::Error),
}

/// SHA-256 of a value's bytes, carried alongside replicated writes so a
/// receiver can reject torn or corrupted datagrams. Not an integrity
/// mechanism against adversaries; the transport is trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDigest([u8; 32]);

impl ValueDigest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn matches(&self, bytes: &[u8]) -> bool {
        *self == Self::of(bytes)
    }
}

/// One `(key, version)` line of a store summary, exchanged during
/// reconciliation rounds instead of full values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub key: Vec<u8>,
    pub version: VersionStamp,
    pub tombstone: bool,
}

/// The coherence message set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CoherenceMessage {
    /// Replicate a write.
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        version: VersionStamp,
        checksum: ValueDigest,
    },
    /// Replicate a delete (tombstone install).
    Delete { key: Vec<u8>, version: VersionStamp },
    /// Liveness beacon; no payload.
    Heartbeat,
    /// Orderly departure announcement.
    Bye,
    /// Ask the group for store summaries.
    DigestRequest { round: u64 },
    /// Store summary addressed to the requester of `round`.
    Digest {
        round: u64,
        to: NodeId,
        entries: Vec<DigestEntry>,
    },
    /// Ask one peer to re-broadcast the listed keys.
    Pull { to: NodeId, keys: Vec<Vec<u8>> },
}

impl CoherenceMessage {
    /// Build a `Put`, computing the value checksum.
    pub fn put(key: Vec<u8>, value: Vec<u8>, version: VersionStamp) -> Self {
        let checksum = ValueDigest::of(&value);
        Self::Put {
            key,
            value,
            version,
            checksum,
        }
    }

    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "PUT",
            Self::Delete { .. } => "DELETE",
            Self::Heartbeat => "HEARTBEAT",
            Self::Bye => "BYE",
            Self::DigestRequest { .. } => "DIGEST-REQUEST",
            Self::Digest { .. } => "DIGEST",
            Self::Pull { .. } => "PULL",
        }
    }
}

/// The unit that actually rides a datagram.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: NodeId,
    pub seq: u64,
    pub message: CoherenceMessage,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_codec() {
        let origin = NodeId::from_parts(0, 1);
        let env = Envelope {
            origin,
            seq: 7,
            message: CoherenceMessage::put(
                b"key".to_vec(),
                b"value".to_vec(),
                VersionStamp::new(3, origin),
            ),
        };
        let bytes = env.encode().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(&[0xff; 3]).is_err());
    }

    #[test]
    fn test_value_digest_detects_corruption() {
        let digest = ValueDigest::of(b"payload");
        assert!(digest.matches(b"payload"));
        assert!(!digest.matches(b"payloaX"));
    }
}
