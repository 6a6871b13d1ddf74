use mcc_node::{MemoryGroup, Node, NodeConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// Statistics collected during a soak run
#[derive(Clone, Debug)]
pub struct SoakStats {
    pub num_nodes: usize,
    pub ops_per_node: usize,
    pub puts: usize,
    pub deletes: usize,
    pub lookups: usize,
    pub hits: usize,
    pub total_time: Duration,
    pub converged: bool,
}

impl SoakStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Soak Run Statistics                           ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Nodes:                     {:>30} ║", self.num_nodes);
        println!("║  Operations per Node:       {:>30} ║", self.ops_per_node);
        println!("║  Puts:                      {:>30} ║", self.puts);
        println!("║  Deletes:                   {:>30} ║", self.deletes);
        println!("║  Lookups (hits):            {:>24} ({:>3}) ║", self.lookups, self.hits);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Converged:                 {:>30} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn soak_node_config(max_entries: usize) -> NodeConfig {
    NodeConfig::builder()
        .max_entries(max_entries)
        .heartbeat_interval(Duration::from_millis(50))
        .liveness(Duration::from_millis(200), Duration::from_millis(600))
        .sync_interval(Duration::from_millis(80))
        .build()
        .expect("soak config is valid")
}

/// Run a seeded random workload across an in-process cluster and wait
/// for the stores to agree.
///
/// The op mix mirrors a cache-heavy workload: mostly lookups and
/// updates, occasional inserts and deletes, over a small shared
/// keyspace so nodes constantly collide on the same keys.
pub async fn soak_cluster(num_nodes: usize, ops_per_node: usize, seed: u64) -> SoakStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Multicast Cache Soak (in-process cluster)           ║");
    println!("║  Nodes: {} | Ops/Node: {} | Seed: {}                 ", num_nodes, ops_per_node, seed);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let keyspace = 20usize;

    println!("\n[Phase 1/3] Spawning nodes...");
    let group = MemoryGroup::new();
    let mut nodes = Vec::with_capacity(num_nodes);
    for _ in 0..num_nodes {
        let node = Node::spawn(soak_node_config(256), std::sync::Arc::new(group.join()))
            .await
            .expect("node spawn");
        nodes.push(node);
    }
    println!("[Phase 1/3] ✓ {} nodes up", nodes.len());

    println!("[Phase 2/3] Driving workload...");
    let mut handles = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        let node = node.clone();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(idx as u64));
        let handle = tokio::spawn(async move {
            let (mut puts, mut deletes, mut lookups, mut hits) = (0usize, 0usize, 0usize, 0usize);
            for i in 0..ops_per_node {
                let key = format!("key-{}", rng.gen_range(0..keyspace));
                match rng.gen_range(0..11u32) {
                    0 => {
                        if node.delete(key.as_bytes()).await.expect("delete").is_some() {
                            deletes += 1;
                        }
                    }
                    1..=3 => {
                        if node.get(key.as_bytes()).is_none() {
                            let value = format!("v-{}-{}", idx, i).into_bytes();
                            node.put(key.as_bytes(), value).await.expect("put");
                            puts += 1;
                        }
                    }
                    4..=7 => {
                        if node.get(key.as_bytes()).is_some() {
                            let value = format!("v-{}-{}", idx, i).into_bytes();
                            node.put(key.as_bytes(), value).await.expect("put");
                            puts += 1;
                        }
                    }
                    _ => {
                        lookups += 1;
                        if node.get(key.as_bytes()).is_some() {
                            hits += 1;
                        }
                    }
                }
                if i % 16 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            (puts, deletes, lookups, hits)
        });
        handles.push(handle);
    }

    let (mut puts, mut deletes, mut lookups, mut hits) = (0, 0, 0, 0);
    for handle in handles {
        let (p, d, l, h) = handle.await.expect("workload task");
        puts += p;
        deletes += d;
        lookups += l;
        hits += h;
    }
    println!("[Phase 2/3] ✓ Completed");

    println!("[Phase 3/3] Waiting for convergence...");
    let mut converged = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let first = nodes[0].snapshot();
        if nodes.iter().skip(1).all(|n| n.snapshot() == first) {
            converged = true;
            break;
        }
    }
    println!(
        "[Phase 3/3] {} after {:.3}s",
        if converged { "✓ Converged" } else { "✗ NOT converged" },
        start.elapsed().as_secs_f64()
    );

    for node in &nodes {
        node.shutdown().await;
    }

    SoakStats {
        num_nodes,
        ops_per_node,
        puts,
        deletes,
        lookups,
        hits,
        total_time: start.elapsed(),
        converged,
    }
}
