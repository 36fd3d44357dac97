//! Criterion benchmarks for the SNMG PageRank engine
//!
//! Measures:
//! - coo2csr: transposed CSR construction and partitioning
//! - end-to-end PageRank across 1, 2 and 4 emulated devices
//! - the sequential reference as a baseline

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use snmg_pagerank::device::{DeviceMemory, DeviceTopology};
use snmg_pagerank::{pagerank_reference, EdgeList, PageRankConfig, PartitionedCsr, SnmgEngine};
use std::hint::black_box;
use std::sync::Arc;

/// Generate scale-free graph (Barabási-Albert model approximation)
fn generate_scale_free_graph(num_nodes: usize, edges_per_node: usize) -> Vec<(i32, i32)> {
    let mut edges = Vec::new();
    let mut rng_state = 12345_u64; // Simple LCG for reproducibility

    for node in 0..num_nodes {
        for _ in 0..edges_per_node {
            rng_state = rng_state.wrapping_mul(1103515245).wrapping_add(12345);
            let target = (rng_state % num_nodes as u64) as i32;

            if target != node as i32 {
                edges.push((node as i32, target));
            }
        }
    }

    edges
}

/// Benchmark: coo2csr on 4 devices
fn bench_csr_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("coo2csr");

    for size in [1_000, 10_000, 100_000].iter() {
        let edges = EdgeList::from_pairs(&generate_scale_free_graph(*size, 5), 4);
        let memory = Arc::new(DeviceMemory::new(4));

        group.bench_with_input(BenchmarkId::new("4_devices", size), &edges, |b, edges| {
            b.iter(|| {
                let csr =
                    PartitionedCsr::from_edge_columns(&memory, black_box(&edges.columns()), 4)
                        .unwrap();
                black_box(csr);
            });
        });
    }

    group.finish();
}

/// Benchmark: full run, 20 iterations, by device count
fn bench_pagerank(c: &mut Criterion) {
    let mut group = c.benchmark_group("pagerank");
    let engine = SnmgEngine::new(DeviceTopology::new(4, 1));
    let pairs = generate_scale_free_graph(50_000, 5);

    for devices in [1, 2, 4].iter() {
        let edges = EdgeList::from_pairs(&pairs, *devices);
        let mut config = PageRankConfig::default();
        config.num_devices(*devices).max_iterations(20);

        group.bench_with_input(BenchmarkId::new("devices", devices), &edges, |b, edges| {
            b.iter(|| {
                let output = engine.pagerank(black_box(&edges.columns()), &config).unwrap();
                black_box(output);
            });
        });
    }

    group.finish();
}

/// Benchmark: sequential reference, same graph and iteration count
fn bench_reference(c: &mut Criterion) {
    let pairs: Vec<(u32, u32)> = generate_scale_free_graph(50_000, 5)
        .into_iter()
        .map(|(s, d)| (s as u32, d as u32))
        .collect();

    c.bench_function("reference_20_iterations", |b| {
        b.iter(|| {
            let scores = pagerank_reference(50_000, black_box(&pairs), 0.85, 20);
            black_box(scores);
        });
    });
}

criterion_group!(benches, bench_csr_construction, bench_pagerank, bench_reference);
criterion_main!(benches);
