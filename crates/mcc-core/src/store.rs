//! The bounded local key-value store.
//!
//! Owns all entries on its node. Local `put`/`delete` always succeed
//! without touching the network: they stamp the mutation from the node's
//! logical clock and return immediately. Remote mutations arrive through
//! `apply_remote_put` / `apply_remote_delete`, which enforce the strict
//! last-writer-wins rule instead of blindly overwriting.
//!
//! Capacity is a hard bound on the number of held entries (tombstones
//! included). When an insertion would exceed it, one victim is evicted
//! first: tombstones go before live entries, then the configured
//! replacement policy picks among the live ones.

use crate::entry::Entry;
use crate::version::{NodeId, VersionClock, VersionStamp};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Replacement policy for a full store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least-recently-used: reads and writes both refresh recency.
    #[default]
    Lru,
    /// First-in-first-out: only insertion order counts.
    Fifo,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "fifo" => Ok(Self::Fifo),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

/// Store tuning knobs.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Maximum number of entries held at any instant.
    pub capacity: usize,
    pub policy: EvictionPolicy,
    /// Per-value byte ceiling; a value must fit in one datagram.
    pub max_value_bytes: usize,
    /// How long a tombstone is retained before it may be purged.
    pub tombstone_grace: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 2048,
            policy: EvictionPolicy::Lru,
            max_value_bytes: 64 * 1024,
            tombstone_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("value of {size} bytes exceeds the per-entry limit of {limit}")]
    ValueTooLarge { size: usize, limit: usize },
}

/// Point-in-time view of one entry, used by digests, dumps and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub value: Vec<u8>,
    pub version: VersionStamp,
    pub tombstone: bool,
}

/// The bounded per-node store.
///
/// Recency is tracked with a lazily maintained queue: every touch pushes
/// `(key, stamp)` and records the stamp on the entry; eviction pops from
/// the front, skipping records whose stamp no longer matches the entry.
pub struct CacheStore {
    node: NodeId,
    clock: VersionClock,
    config: StoreConfig,
    entries: HashMap<Vec<u8>, Entry>,
    recency: VecDeque<(Vec<u8>, u64)>,
    pinned: HashSet<Vec<u8>>,
    tick: u64,
}

impl CacheStore {
    pub fn new(node: NodeId, config: StoreConfig) -> Self {
        Self {
            node,
            clock: VersionClock::new(),
            config,
            entries: HashMap::new(),
            recency: VecDeque::new(),
            pinned: HashSet::new(),
            tick: 0,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Total held entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a live value, refreshing its recency.
    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        self.tick += 1;
        let tick = self.tick;
        let touch_lru = self.config.policy == EvictionPolicy::Lru;
        let entry = self.entries.get_mut(key)?;
        if entry.tombstone {
            return None;
        }
        if touch_lru {
            entry.touch = tick;
            self.note_touch(key, tick);
        }
        self.entries.get(key).map(|e| e.value.as_slice())
    }

    /// Look up a live value without disturbing recency.
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries
            .get(key)
            .filter(|e| !e.tombstone)
            .map(|e| e.value.as_slice())
    }

    /// True if the key holds a live (non-tombstone) entry.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.get(key).map(|e| !e.tombstone).unwrap_or(false)
    }

    /// Version currently held for a key, tombstones included.
    pub fn version_of(&self, key: &[u8]) -> Option<VersionStamp> {
        self.entries.get(key).map(|e| e.version)
    }

    /// Insert or overwrite a key locally, stamping a fresh version.
    ///
    /// Evicts one victim first when a new key would exceed capacity;
    /// eviction never fails and never blocks.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<VersionStamp, StoreError> {
        if value.len() > self.config.max_value_bytes {
            return Err(StoreError::ValueTooLarge {
                size: value.len(),
                limit: self.config.max_value_bytes,
            });
        }
        let version = VersionStamp::new(self.clock.tick(), self.node);
        self.admit(key);
        self.tick += 1;
        let tick = self.tick;
        self.entries
            .insert(key.to_vec(), Entry::live(value, version, tick));
        self.note_touch(key, tick);
        Ok(version)
    }

    /// Tombstone a live key locally. Returns the stamp of the delete, or
    /// `None` when the key is absent (the not-found condition).
    pub fn delete(&mut self, key: &[u8], now: Instant) -> Option<VersionStamp> {
        // Stamp only once we know the key is live; a miss must not tick.
        if !self.contains(key) {
            return None;
        }
        let version = VersionStamp::new(self.clock.tick(), self.node);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.bury(version, now);
        }
        Some(version)
    }

    /// Apply a replicated write under strict last-writer-wins.
    ///
    /// Returns `true` when the store changed; a stale or equal stamp is
    /// silently discarded. A newer write does resurrect a tombstoned key.
    pub fn apply_remote_put(
        &mut self,
        key: &[u8],
        value: Vec<u8>,
        version: VersionStamp,
    ) -> bool {
        self.clock.witness(version.counter);
        if let Some(held) = self.entries.get(key) {
            if !version.supersedes(&held.version) {
                return false;
            }
        }
        self.admit(key);
        self.tick += 1;
        let tick = self.tick;
        self.entries
            .insert(key.to_vec(), Entry::live(value, version, tick));
        self.note_touch(key, tick);
        true
    }

    /// Apply a replicated delete: install a tombstone when the incoming
    /// stamp supersedes whatever is held (or the key is unknown, so an
    /// older in-flight write cannot resurrect it later).
    pub fn apply_remote_delete(&mut self, key: &[u8], version: VersionStamp, now: Instant) -> bool {
        self.clock.witness(version.counter);
        match self.entries.get_mut(key) {
            Some(held) => {
                if !version.supersedes(&held.version) {
                    return false;
                }
                held.bury(version, now);
                true
            }
            None => {
                self.admit(key);
                self.tick += 1;
                let tick = self.tick;
                self.entries
                    .insert(key.to_vec(), Entry::dead(version, tick, now));
                true
            }
        }
    }

    /// Drop an entry outright, version and all. Used by the invalidation
    /// coherence mode, where a remote write evicts instead of replicating.
    pub fn evict_entry(&mut self, key: &[u8]) -> bool {
        self.pinned.remove(key);
        self.entries.remove(key).is_some()
    }

    /// Remove tombstones whose grace period has elapsed.
    pub fn purge_tombstones(&mut self, now: Instant) -> usize {
        let grace = self.config.tombstone_grace;
        let before = self.entries.len();
        self.entries.retain(|_, e| match (e.tombstone, e.deleted_at) {
            (true, Some(at)) => now.duration_since(at) < grace,
            _ => true,
        });
        before - self.entries.len()
    }

    /// Shield a key from eviction.
    pub fn pin(&mut self, key: &[u8]) {
        self.pinned.insert(key.to_vec());
    }

    pub fn unpin(&mut self, key: &[u8]) {
        self.pinned.remove(key);
    }

    /// Iterate over all held entries (tombstones included).
    pub fn iter_entries(&self) -> impl Iterator<Item = (&[u8], &Entry)> {
        self.entries.iter().map(|(k, e)| (k.as_slice(), e))
    }

    /// Ordered snapshot of the whole store, for dumps and convergence checks.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, EntrySnapshot> {
        self.entries
            .iter()
            .map(|(k, e)| {
                (
                    k.clone(),
                    EntrySnapshot {
                        value: e.value.clone(),
                        version: e.version,
                        tombstone: e.tombstone,
                    },
                )
            })
            .collect()
    }

    /// Record a touch in the recency queue. The queue is lazy (stale
    /// records are skipped at eviction time), so it is compacted once it
    /// grows well past the live entry count.
    fn note_touch(&mut self, key: &[u8], tick: u64) {
        self.recency.push_back((key.to_vec(), tick));
        let bound = (self.entries.len() * 2).max(self.config.capacity.max(16) * 2);
        if self.recency.len() > bound {
            let entries = &self.entries;
            self.recency
                .retain(|(k, stamp)| entries.get(k).map(|e| e.touch == *stamp).unwrap_or(false));
        }
    }

    /// Make room for a key that is not yet held.
    fn admit(&mut self, key: &[u8]) {
        if self.entries.contains_key(key) {
            return;
        }
        // A zero capacity is clamped to one so admission always terminates.
        while self.entries.len() >= self.config.capacity.max(1) {
            self.evict_one();
        }
    }

    /// Choose and remove one victim. Tombstones are sacrificed first; live
    /// entries then follow the configured policy order.
    fn evict_one(&mut self) {
        // Oldest tombstone first: it carries no caller-visible data.
        if let Some(key) = self
            .entries
            .iter()
            .filter(|(_, e)| e.tombstone)
            .min_by_key(|(_, e)| e.touch)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&key);
            return;
        }
        // Walk the recency queue past stale and pinned records.
        while let Some((key, stamp)) = self.recency.pop_front() {
            let current = match self.entries.get(&key) {
                Some(e) => e.touch,
                None => continue,
            };
            if current != stamp || self.pinned.contains(&key) {
                continue;
            }
            self.entries.remove(&key);
            return;
        }
        // Queue exhausted (everything pinned or stale): fall back to the
        // oldest entry overall so eviction still cannot fail.
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.touch)
            .map(|(k, _)| k.clone())
        {
            self.pinned.remove(&key);
            self.entries.remove(&key);
        }
    }
}
