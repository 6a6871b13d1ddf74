//! Store digests and their comparison.
//!
//! A digest is a compact `(key, version, tombstone)` summary of a node's
//! store, cheap enough to ride a single datagram. Comparing a received
//! digest against the local store classifies every divergent key as
//! either "pull it from the sender" or "heal the group by re-broadcast".

use mcc_core::CacheStore;
use mcc_gossip::DigestEntry;
use std::collections::HashSet;

/// Summarize the local store, capped at `cap` entries to bound datagram
/// size. A capped digest under-reports; the next rounds cover the rest.
pub fn build_digest(store: &CacheStore, cap: usize) -> Vec<DigestEntry> {
    store
        .iter_entries()
        .take(cap)
        .map(|(key, entry)| DigestEntry {
            key: key.to_vec(),
            version: entry.version,
            tombstone: entry.tombstone,
        })
        .collect()
}

/// Divergence between a local store and a peer's digest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestDelta {
    /// Keys the peer holds newer (or we lack entirely): fetch from it.
    pub pull: Vec<Vec<u8>>,
    /// Keys we hold newer (or the peer lacks): re-broadcast to the group.
    pub heal: Vec<Vec<u8>>,
}

impl DigestDelta {
    pub fn is_empty(&self) -> bool {
        self.pull.is_empty() && self.heal.is_empty()
    }
}

pub fn diff_digest(store: &CacheStore, remote: &[DigestEntry]) -> DigestDelta {
    let mut delta = DigestDelta::default();
    let mut remote_keys: HashSet<&[u8]> = HashSet::with_capacity(remote.len());

    for entry in remote {
        remote_keys.insert(entry.key.as_slice());
        match store.version_of(&entry.key) {
            None => delta.pull.push(entry.key.clone()),
            Some(local) => {
                if entry.version.supersedes(&local) {
                    delta.pull.push(entry.key.clone());
                } else if local.supersedes(&entry.version) {
                    delta.heal.push(entry.key.clone());
                }
            }
        }
    }

    // Keys the peer's digest never mentioned. With a capped digest this
    // can over-heal; the extra broadcasts are absorbed as stale.
    for (key, _) in store.iter_entries() {
        if !remote_keys.contains(key) {
            delta.heal.push(key.to_vec());
        }
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcc_core::{NodeId, StoreConfig, VersionStamp};
    use std::time::Instant;

    fn node(n: u128) -> NodeId {
        NodeId::from_parts(0, n)
    }

    fn store_with(keys: &[(&[u8], u64)]) -> CacheStore {
        let mut s = CacheStore::new(node(1), StoreConfig::default());
        for (key, counter) in keys {
            s.apply_remote_put(key, b"v".to_vec(), VersionStamp::new(*counter, node(9)));
        }
        s
    }

    #[test]
    fn test_digest_reflects_tombstones() {
        let mut s = store_with(&[(b"a", 1)]);
        s.delete(b"a", Instant::now());
        let digest = build_digest(&s, 16);
        assert_eq!(digest.len(), 1);
        assert!(digest[0].tombstone);
    }

    #[test]
    fn test_digest_respects_cap() {
        let s = store_with(&[(b"a", 1), (b"b", 2), (b"c", 3)]);
        assert_eq!(build_digest(&s, 2).len(), 2);
    }

    #[test]
    fn test_diff_classifies_both_directions() {
        let s = store_with(&[(b"same", 5), (b"ours-newer", 9), (b"ours-only", 2)]);
        let remote = vec![
            DigestEntry {
                key: b"same".to_vec(),
                version: VersionStamp::new(5, node(9)),
                tombstone: false,
            },
            DigestEntry {
                key: b"ours-newer".to_vec(),
                version: VersionStamp::new(3, node(9)),
                tombstone: false,
            },
            DigestEntry {
                key: b"theirs-only".to_vec(),
                version: VersionStamp::new(4, node(9)),
                tombstone: false,
            },
        ];
        let delta = diff_digest(&s, &remote);
        assert_eq!(delta.pull, vec![b"theirs-only".to_vec()]);
        let mut heal = delta.heal.clone();
        heal.sort();
        assert_eq!(heal, vec![b"ours-newer".to_vec(), b"ours-only".to_vec()]);
    }

    #[test]
    fn test_identical_stores_diff_empty() {
        let s = store_with(&[(b"a", 1), (b"b", 2)]);
        let digest = build_digest(&s, 16);
        assert!(diff_digest(&s, &digest).is_empty());
    }
}
