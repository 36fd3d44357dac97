//! PageRank with the wgpu SpMV kernel, one adapter per device
//!
//! Run with: `cargo run --example gpu_demo --features gpu`

use snmg_pagerank::device::{Backend, DeviceTopology, GpuDevice};
use snmg_pagerank::{EdgeList, PageRankConfig, SnmgEngine};
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .try_init();

    let adapters = GpuDevice::available_count();
    if adapters == 0 {
        println!("⚠️  No GPU available, nothing to do");
        return Ok(());
    }
    println!("🖥️  Found {adapters} adapter(s)\n");

    // Ring with chords: every vertex has out-degree 2
    let n = 100_000;
    let pairs: Vec<(i32, i32)> = (0..n)
        .flat_map(|v| [(v, (v + 1) % n), (v, (v * 7 + 3) % n)])
        .collect();

    let engine = SnmgEngine::new(DeviceTopology::detect_gpus());
    for backend in [Backend::Host, Backend::Wgpu] {
        let mut config = PageRankConfig::default();
        config
            .num_devices(adapters)
            .max_iterations(20)
            .backend(backend);

        let start = Instant::now();
        let output = engine.pagerank(&EdgeList::from_pairs(&pairs, adapters).columns(), &config)?;
        let elapsed = start.elapsed();

        let top = output
            .scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(v, s)| (v, *s))
            .unwrap_or_default();
        println!("  {backend:?}: {elapsed:?}, top vertex {} ({:.3e})", top.0, top.1);
    }

    Ok(())
}
