use soak::soak_cluster;
pub mod soak;

fn main() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {
    let _log_guard = mcc_node::init_logging(
        &std::env::var("CINNABAR_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
        std::env::var("CINNABAR_DEBUG_FILE")
            .ok()
            .map(std::path::PathBuf::from)
            .as_deref(),
    )
    .expect("logging init");

    let seed = std::env::var("CINNABAR_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(7);

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            CINNABAR CLUSTER SOAK RUNS                      ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // The reference deployment: five identical nodes, one group.
    let stats = soak_cluster(5, 200, seed).await;
    stats.print();

    // Smaller and larger clusters for comparison.
    let stats = soak_cluster(3, 400, seed).await;
    stats.print();

    let stats = soak_cluster(8, 150, seed).await;
    stats.print();

    println!("\n✓ All soak runs completed");
}
