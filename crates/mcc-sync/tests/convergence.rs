//! Cluster convergence under loss, duplication and reordering.
//!
//! These tests run whole replicas against the simulated multicast group
//! and assert the end state, not the traffic: after dissemination plus
//! reconciliation, every store must agree on (key, value, version,
//! tombstone) for every key.

use mcc_core::NodeId;
use mcc_member::PeerState;
use mcc_sync::cluster::{LinkConfig, SimCluster};
use mcc_sync::replica::{CacheReplica, ReplicaConfig};
use std::time::{Duration, Instant};

#[test]
fn test_convergence_perfect_network() {
    let mut cluster = SimCluster::new(3, LinkConfig::default());
    let now = Instant::now();

    cluster.put(0, b"a", b"from-0");
    cluster.put(1, b"b", b"from-1");
    cluster.put(2, b"c", b"from-2");
    cluster.drain(now);

    assert!(cluster.is_converged());
    for i in 0..3 {
        assert_eq!(cluster.replica_mut(i).get(b"a"), Some(b"from-0".to_vec()));
        assert_eq!(cluster.replica_mut(i).get(b"b"), Some(b"from-1".to_vec()));
        assert_eq!(cluster.replica_mut(i).get(b"c"), Some(b"from-2".to_vec()));
    }
}

#[test]
fn test_same_key_last_writer_wins_everywhere() {
    let mut cluster = SimCluster::new(3, LinkConfig::default());
    let now = Instant::now();

    cluster.put(0, b"k", b"first");
    cluster.drain(now);
    // Replica 1 witnessed the first write, so its own write supersedes.
    cluster.put(1, b"k", b"second");
    cluster.drain(now);

    assert!(cluster.is_converged());
    for i in 0..3 {
        assert_eq!(cluster.replica_mut(i).get(b"k"), Some(b"second".to_vec()));
    }
}

#[test]
fn test_dropped_write_healed_by_reconciliation() {
    let mut cluster = SimCluster::new(3, LinkConfig::default());
    let now = Instant::now();

    // The first write reaches everyone.
    cluster.put(0, b"x", b"1");
    cluster.drain(now);

    // The superseding write is lost on the wire.
    cluster.link_mut().set_config(LinkConfig::lossy(1.0));
    cluster.put(1, b"x", b"2");
    cluster.drain(now);
    cluster.link_mut().set_config(LinkConfig::default());

    // Divergent: replica 1 has "2", the others still "1".
    assert!(!cluster.is_converged());

    let mut rounds = 0;
    while !cluster.is_converged() && rounds < 10 {
        cluster.reconcile_round(now);
        rounds += 1;
    }
    assert!(cluster.is_converged(), "no convergence after {rounds} rounds");
    for i in 0..3 {
        assert_eq!(cluster.replica_mut(i).get(b"x"), Some(b"2".to_vec()));
    }
}

#[test]
fn test_convergence_with_duplication() {
    let mut cluster = SimCluster::new(3, LinkConfig::with_dups(0.8));
    let now = Instant::now();

    for i in 0..3 {
        cluster.put(i, format!("key-{i}").as_bytes(), b"v");
    }
    cluster.drain(now);

    // Heavy duplication changes nothing: dedup plus LWW absorb it.
    assert!(cluster.is_converged());
    let snapshot = cluster.replica(0).snapshot();
    assert_eq!(snapshot.len(), 3);
}

#[test]
fn test_convergence_chaotic_network() {
    let mut cluster = SimCluster::new(5, LinkConfig::chaotic());
    let now = Instant::now();

    for i in 0..5 {
        for j in 0..4 {
            cluster.put(i, format!("key-{i}-{j}").as_bytes(), b"payload");
        }
    }
    cluster.drain(now);

    let mut rounds = 0;
    while !cluster.is_converged() && rounds < 100 {
        cluster.link_mut().retransmit_lost();
        cluster.reconcile_round(now);
        rounds += 1;
    }
    assert!(cluster.is_converged(), "no convergence after {rounds} rounds");
    assert_eq!(cluster.replica(0).snapshot().len(), 20);
}

#[test]
fn test_convergence_under_loss_without_retransmission() {
    // Anti-entropy alone must repair what the lossy link drops.
    let mut cluster = SimCluster::new(4, LinkConfig::lossy(0.25));
    let now = Instant::now();

    for i in 0..4 {
        cluster.put(i, format!("key-{i}").as_bytes(), b"v");
    }
    cluster.drain(now);

    let mut rounds = 0;
    while !cluster.is_converged() && rounds < 200 {
        cluster.reconcile_round(now);
        rounds += 1;
    }
    assert!(cluster.is_converged(), "no convergence after {rounds} rounds");
    assert_eq!(cluster.replica(0).snapshot().len(), 4);
}

#[test]
fn test_delete_converges_and_purges() {
    let config = ReplicaConfig {
        store: mcc_core::StoreConfig {
            tombstone_grace: Duration::from_millis(50),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut cluster = SimCluster::with_config(3, LinkConfig::default(), config);
    let now = Instant::now();

    cluster.put(0, b"doomed", b"v");
    cluster.drain(now);
    cluster.delete(1, b"doomed", now);
    cluster.drain(now);

    assert!(cluster.is_converged());
    for i in 0..3 {
        assert_eq!(cluster.replica_mut(i).get(b"doomed"), None);
    }

    // After the grace period every store forgets the tombstone too.
    let later = now + Duration::from_millis(100);
    for i in 0..3 {
        cluster.replica_mut(i).purge_tombstones(later);
    }
    assert!(cluster.is_converged());
    assert!(cluster.replica(0).snapshot().is_empty());
}

#[test]
fn test_concurrent_tie_breaks_identically_everywhere() {
    // Two writers whose clocks coincide produce equal counters; the
    // origin id decides, regardless of delivery order.
    let mut writer_a = CacheReplica::new(NodeId::from_parts(0, 10), ReplicaConfig::default());
    let mut writer_b = CacheReplica::new(NodeId::from_parts(0, 20), ReplicaConfig::default());
    let (_, env_a) = writer_a.put(b"k", b"from-a".to_vec()).unwrap();
    let (_, env_b) = writer_b.put(b"k", b"from-b".to_vec()).unwrap();
    let bytes_a = env_a.encode().unwrap();
    let bytes_b = env_b.encode().unwrap();

    let now = Instant::now();
    let mut observer_1 = CacheReplica::new(NodeId::from_parts(0, 1), ReplicaConfig::default());
    let mut observer_2 = CacheReplica::new(NodeId::from_parts(0, 2), ReplicaConfig::default());

    observer_1.handle_datagram(&bytes_a, now).unwrap();
    observer_1.handle_datagram(&bytes_b, now).unwrap();
    observer_2.handle_datagram(&bytes_b, now).unwrap();
    observer_2.handle_datagram(&bytes_a, now).unwrap();

    assert_eq!(observer_1.snapshot(), observer_2.snapshot());
    // The higher origin id wins the tie.
    assert_eq!(observer_1.get(b"k"), Some(b"from-b".to_vec()));
}

#[test]
fn test_membership_death_and_revival() {
    let mut cluster = SimCluster::new(3, LinkConfig::default());
    let t0 = Instant::now();

    cluster.heartbeat_all();
    cluster.drain(t0);
    let silent = cluster.replica(2).node();
    for i in 0..2 {
        assert_eq!(cluster.replica(i).peer_state(silent), Some(PeerState::Alive));
    }

    // Replicas 0 and 1 keep talking; replica 2 goes silent.
    let t1 = t0 + Duration::from_secs(3);
    for i in 0..2 {
        let env = cluster.replica_mut(i).heartbeat();
        let from = cluster.replica(i).node();
        cluster.link_mut().send(from, env.encode().unwrap());
    }
    cluster.drain(t1);

    // One sweep demotes the silent peer, a later one declares it dead.
    cluster.sweep_all(t1);
    for i in 0..2 {
        assert_eq!(cluster.replica(i).peer_state(silent), Some(PeerState::Suspect));
    }
    let t2 = t0 + Duration::from_secs(8);
    cluster.sweep_all(t2);
    for i in 0..2 {
        assert_eq!(cluster.replica(i).peer_state(silent), Some(PeerState::Dead));
    }

    // A single fresh heartbeat revives it everywhere.
    let t3 = t2 + Duration::from_millis(100);
    let env = cluster.replica_mut(2).heartbeat();
    cluster.link_mut().send(silent, env.encode().unwrap());
    cluster.drain(t3);
    for i in 0..2 {
        assert_eq!(cluster.replica(i).peer_state(silent), Some(PeerState::Alive));
    }
}
