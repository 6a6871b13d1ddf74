//! # Cinnabar Node
//!
//! A standalone cache node process. Reads its configuration from
//! `CINNABAR_*` environment variables, joins the multicast group, and
//! serves the local store until the run duration elapses or ctrl-c.
//!
//! With `--workload`, the node also drives a seeded synthetic op mix
//! against its own store, which is how a test cluster exercises the
//! coherence machinery: five identical processes on one group, each with
//! a different `CINNABAR_SEED`, all converging on the same final state.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use mcc_node::{MemoryGroup, Node, NodeConfig, UdpMulticastTransport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "cinnabar-node")]
#[command(about = "Multicast-coherent cache node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the multicast group and serve until shutdown
    Run {
        /// Also drive a seeded synthetic workload against the store
        #[arg(long)]
        workload: bool,
    },
    /// In-process demo: three nodes on a memory group converge
    Demo,
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

// ─── Run ───────────────────────────────────────────────────────────────────

async fn run_node(workload: bool) -> Result<(), mcc_node::NodeError> {
    let config = NodeConfig::from_env()?;
    let _log_guard = mcc_node::init_logging(&config.log_level, config.debug_log.as_deref())?;

    header("CINNABAR NODE");
    step(&format!("group    {}", config.group));
    step(&format!("entries  {}", config.max_entries));
    step(&format!(
        "run for  {}",
        config
            .run_for
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "until ctrl-c".to_string())
    ));

    let transport = UdpMulticastTransport::bind(config.group, config.hops).await?;
    let seed = config.seed;
    let node = Node::spawn(config, Arc::new(transport)).await?;
    step(&format!("node id  {}", node.id()));

    if workload {
        let driver = node.clone();
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed);
            while driver.is_running() {
                let key = format!("key-{}", rng.gen_range(0..20u32));
                match rng.gen_range(0..11u32) {
                    0 => {
                        let _ = driver.delete(key.as_bytes()).await;
                    }
                    1..=7 => {
                        let value = format!("v-{}", rng.gen::<u32>()).into_bytes();
                        let _ = driver.put(key.as_bytes(), value).await;
                    }
                    _ => {
                        let _ = driver.get(key.as_bytes());
                    }
                }
                tokio::time::sleep(Duration::from_millis(rng.gen_range(10..200))).await;
            }
        });
        step("synthetic workload running");
    }

    // The run-duration timer (when configured) stops the node on its
    // own; ctrl-c stops it early either way.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                step("ctrl-c received");
                node.shutdown().await;
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if !node.is_running() {
                    break;
                }
            }
        }
    }

    step(&format!(
        "final store: {} entries, {} live peers",
        node.snapshot().len(),
        node.live_peers().len()
    ));
    Ok(())
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() {
    header("DEMO — three nodes, one group, eventual agreement");

    let group = MemoryGroup::new();
    let config = || {
        NodeConfig::builder()
            .heartbeat_interval(Duration::from_millis(50))
            .liveness(Duration::from_millis(200), Duration::from_millis(600))
            .sync_interval(Duration::from_millis(80))
            .build()
            .expect("demo config")
    };

    let mut nodes = Vec::new();
    for _ in 0..3 {
        nodes.push(
            Node::spawn(config(), Arc::new(group.join()))
                .await
                .expect("node spawn"),
        );
    }
    step("three nodes joined the group");

    nodes[0]
        .put(b"color", b"vermillion".to_vec())
        .await
        .expect("put");
    step("node 0 put color=vermillion");
    nodes[1]
        .put(b"mineral", b"cinnabar".to_vec())
        .await
        .expect("put");
    step("node 1 put mineral=cinnabar");

    tokio::time::sleep(Duration::from_millis(150)).await;

    for (i, node) in nodes.iter().enumerate() {
        let color = node.get(b"color").map(|v| String::from_utf8_lossy(&v).into_owned());
        let mineral = node.get(b"mineral").map(|v| String::from_utf8_lossy(&v).into_owned());
        println!(
            "  {} node {}: color={} mineral={}",
            "▸".bright_yellow(),
            i,
            color.unwrap_or_else(|| "?".into()).bright_magenta(),
            mineral.unwrap_or_else(|| "?".into()).bright_magenta()
        );
    }

    nodes[2].delete(b"color").await.expect("delete");
    step("node 2 deleted color");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let all_gone = nodes.iter().all(|n| n.get(b"color").is_none());
    let converged = {
        let first = nodes[0].snapshot();
        nodes.iter().skip(1).all(|n| n.snapshot() == first)
    };

    for node in &nodes {
        node.shutdown().await;
    }

    if all_gone && converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL NODES CONVERGED — stores are identical!".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED — stores differ!".bright_red().bold()
        );
    }
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { workload } => {
            if let Err(e) = run_node(workload).await {
                eprintln!("{} {}", "fatal:".bright_red().bold(), e);
                std::process::exit(1);
            }
        }
        Commands::Demo => run_demo().await,
    }
}
