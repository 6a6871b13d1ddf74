//! Property-based tests for the store's convergence-bearing rules.
//!
//! The replicated apply path must behave like a join on the per-key
//! version order:
//!  - Order independence: any permutation of the same remote writes
//!    leaves every key at the same (value, version, tombstone).
//!  - Idempotence: replaying a write never changes the outcome.
//!  - Monotonicity: the held version for a key never decreases.

use mcc_core::store::{CacheStore, StoreConfig};
use mcc_core::version::{NodeId, VersionStamp};
use proptest::prelude::*;
use std::time::Instant;

#[derive(Clone, Debug)]
enum RemoteOp {
    Put { key: u8, value: Vec<u8>, version: VersionStamp },
    Delete { key: u8, version: VersionStamp },
}

fn remote_op_strategy() -> impl Strategy<Value = RemoteOp> {
    // Few keys and small counters on purpose: collisions and ties are the
    // interesting cases.
    let stamp = (1u64..8, 0u128..4)
        .prop_map(|(counter, origin)| VersionStamp::new(counter, NodeId::from_parts(0, origin)));
    prop_oneof![
        (0u8..4, prop::collection::vec(any::<u8>(), 0..4), stamp.clone())
            .prop_map(|(key, value, version)| RemoteOp::Put { key, value, version }),
        (0u8..4, stamp).prop_map(|(key, version)| RemoteOp::Delete { key, version }),
    ]
}

fn fresh_store() -> CacheStore {
    CacheStore::new(
        NodeId::from_parts(0, 99),
        StoreConfig {
            capacity: 64,
            ..Default::default()
        },
    )
}

/// A stamp is issued exactly once in the real system (the clock ticks per
/// mutation), so drop any generated op that reuses one.
fn dedup_stamps(ops: Vec<RemoteOp>) -> Vec<RemoteOp> {
    let mut seen = std::collections::HashSet::new();
    ops.into_iter()
        .filter(|op| {
            let stamp = match op {
                RemoteOp::Put { version, .. } | RemoteOp::Delete { version, .. } => *version,
            };
            seen.insert(stamp)
        })
        .collect()
}

fn apply_all(store: &mut CacheStore, ops: &[RemoteOp], now: Instant) {
    for op in ops {
        match op {
            RemoteOp::Put { key, value, version } => {
                store.apply_remote_put(&[*key], value.clone(), *version);
            }
            RemoteOp::Delete { key, version } => {
                store.apply_remote_delete(&[*key], *version, now);
            }
        }
    }
}

proptest! {
    #[test]
    fn apply_is_order_independent(
        ops in prop::collection::vec(remote_op_strategy(), 1..24),
        seed in any::<u64>(),
    ) {
        let ops = dedup_stamps(ops);
        let now = Instant::now();
        let mut forward = fresh_store();
        apply_all(&mut forward, &ops, now);

        // A deterministic shuffle derived from the seed.
        let mut shuffled = ops.clone();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }
        let mut permuted = fresh_store();
        apply_all(&mut permuted, &shuffled, now);

        prop_assert_eq!(forward.snapshot(), permuted.snapshot());
    }

    #[test]
    fn apply_is_idempotent(
        ops in prop::collection::vec(remote_op_strategy(), 1..16),
    ) {
        let ops = dedup_stamps(ops);
        let now = Instant::now();
        let mut once = fresh_store();
        apply_all(&mut once, &ops, now);

        let mut twice = fresh_store();
        apply_all(&mut twice, &ops, now);
        apply_all(&mut twice, &ops, now);

        prop_assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn held_versions_never_decrease(
        ops in prop::collection::vec(remote_op_strategy(), 1..24),
    ) {
        let now = Instant::now();
        let mut store = fresh_store();
        for op in &ops {
            let key = match op {
                RemoteOp::Put { key, .. } | RemoteOp::Delete { key, .. } => vec![*key],
            };
            let before = store.version_of(&key);
            match op {
                RemoteOp::Put { value, version, .. } => {
                    store.apply_remote_put(&key, value.clone(), *version);
                }
                RemoteOp::Delete { version, .. } => {
                    store.apply_remote_delete(&key, *version, now);
                }
            }
            let after = store.version_of(&key);
            if let (Some(b), Some(a)) = (before, after) {
                prop_assert!(a >= b, "version went backwards: {} -> {}", b, a);
            }
        }
    }
}
