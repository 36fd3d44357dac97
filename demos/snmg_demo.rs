//! Multi-device PageRank walkthrough on emulated devices
//!
//! Showcases:
//! - per-device edge columns and transposed CSR partitioning
//! - PageRank on 1, 2 and 4 devices with identical results
//! - tolerance-based early exit
//! - Parquet persistence of edges and scores
//!
//! Run with: `RUST_LOG=info cargo run --example snmg_demo`

use snmg_pagerank::device::{DeviceId, DeviceMemory, DeviceTopology};
use snmg_pagerank::{
    read_scores_parquet, write_edge_parquet, write_scores_parquet, EdgeList, PageRankConfig,
    PartitionedCsr, SnmgEngine,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .try_init();

    println!("🦀 snmg-pagerank Demo\n");

    // Call graph: main -> parse_args -> validate, main -> process -> logger
    let names = ["main", "parse_args", "process", "validate", "logger", "unused"];
    let pairs = [(0, 1), (0, 2), (1, 3), (1, 4), (2, 4), (3, 0), (5, 4)];

    // 1. Partition
    println!("📊 Partitioning across 2 devices...");
    let memory = Arc::new(DeviceMemory::new(2));
    let edges = EdgeList::from_pairs(&pairs, 2);
    let csr = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), 2)?;
    for d in 0..csr.num_devices() {
        let device = DeviceId(d);
        println!(
            "  {device}: rows {:?}, {} bytes on device",
            csr.partition().range(device),
            memory.allocated_bytes(device)
        );
    }
    println!();

    // 2. Device-count sweep
    println!("⭐ PageRank (20 iterations):");
    let engine = SnmgEngine::new(DeviceTopology::new(4, 2));
    for devices in [1, 2, 4] {
        let mut config = PageRankConfig::default();
        config.num_devices(devices).max_iterations(20);
        let output = engine.pagerank(&EdgeList::from_pairs(&pairs, devices).columns(), &config)?;

        let formatted: Vec<String> = output.scores.iter().map(|s| format!("{s:.4}")).collect();
        println!("  {devices} device(s): [{}]", formatted.join(", "));
    }
    println!();

    // 3. Early exit
    println!("🎯 Tolerance 1e-6:");
    let mut config = PageRankConfig::default();
    config.num_devices(2).tolerance(Some(1e-6));
    let output = engine.pagerank(&edges.columns(), &config)?;
    println!(
        "  stopped after {} iterations (residual {:.2e})",
        output.iterations,
        output.residual.unwrap_or_default()
    );
    for (name, score) in names.iter().zip(&output.scores) {
        println!("  {name}: {score:.4}");
    }
    println!();

    // 4. Persistence
    println!("💾 Saving to Parquet...");
    let dir = std::env::temp_dir().join("snmg_demo");
    std::fs::create_dir_all(&dir)?;
    write_edge_parquet(dir.join("edges.parquet"), &edges).await?;
    write_scores_parquet(dir.join("scores.parquet"), &output.scores).await?;
    let loaded = read_scores_parquet(dir.join("scores.parquet")).await?;
    println!("  ✅ Round-tripped {} scores via {}", loaded.len(), dir.display());

    Ok(())
}
