//! Integration tests for snmg-pagerank
//!
//! Runs the engine end to end on small graphs whose scores are known, across
//! device counts and failure modes

use snmg_pagerank::device::{launch, Backend, DeviceId, DeviceMemory, DeviceTopology};
use snmg_pagerank::{
    pagerank_reference, status_of, DistributedVector, EdgeColumns, EdgeList, InvalidState,
    PageRankConfig, PartitionedCsr, SnmgEngine, SnmgError, SnmgPageRank, StatusCode,
};
use std::sync::Arc;

/// Small web-like graph: a strongly connected core, a chain, two sinks
const WEB: &[(i32, i32)] = &[
    (0, 1),
    (1, 2),
    (2, 0),
    (2, 3),
    (3, 4),
    (4, 5),
    (5, 3),
    (5, 6),
    (6, 7),
    (7, 8),
    (8, 9),
    (1, 10),
    (10, 0),
    (3, 11),
    (0, 9),
];

fn engine() -> SnmgEngine {
    SnmgEngine::new(DeviceTopology::new(4, 2))
}

fn config(devices: usize, iterations: usize) -> PageRankConfig {
    let mut config = PageRankConfig::default();
    config.num_devices(devices).max_iterations(iterations);
    config
}

fn as_u32(pairs: &[(i32, i32)]) -> Vec<(u32, u32)> {
    pairs
        .iter()
        .map(|&(s, d)| (s.unsigned_abs(), d.unsigned_abs()))
        .collect()
}

#[test]
fn test_four_cycle_converges_to_uniform() {
    let edges = EdgeList::from_pairs(&[(0, 1), (1, 2), (2, 3), (3, 0)], 1);

    let output = engine().pagerank(&edges.columns(), &config(1, 100)).unwrap();

    assert_eq!(output.scores.len(), 4);
    assert_eq!(output.iterations, 100);
    for score in &output.scores {
        assert!((score - 0.25).abs() < 1e-4, "Score = {score}");
    }
}

#[test]
fn test_mass_accumulates_at_sinks() {
    let edges = EdgeList::from_pairs(&[(0, 1), (0, 2)], 1);
    let mut cfg = config(1, 50);
    cfg.damping_factor(0.85);

    let output = engine().pagerank(&edges.columns(), &cfg).unwrap();

    let sum: f32 = output.scores.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5, "Sum = {sum}");
    assert!(output.scores[0] < output.scores[1]);
    assert!(output.scores[0] < output.scores[2]);
}

#[test]
fn test_size_mismatch_allocates_nothing() {
    let engine = engine();
    let (s0, d0) = ([0, 1, 2], [1, 2, 0]);
    let (s1, d1) = ([3, 4], [4]);
    let edges = EdgeColumns::new(vec![&s0[..], &s1[..]], vec![&d0[..], &d1[..]]);

    let result = engine.pagerank(&edges, &config(2, 10));

    assert_eq!(status_of(&result), StatusCode::ColumnSizeMismatch);
    assert_eq!(StatusCode::ColumnSizeMismatch.code(), -3);
    assert_eq!(engine.memory().total_allocations(), 0);
}

#[test]
fn test_argument_status_codes() {
    let engine = engine();
    let edges = EdgeList::from_pairs(&[(0, 1)], 1);

    let mut bad_alpha = config(1, 10);
    bad_alpha.damping_factor(1.0);
    let result = engine.pagerank(&edges.columns(), &bad_alpha);
    assert_eq!(status_of(&result).code(), -2);

    // Two devices requested, one column pair supplied
    let result = engine.pagerank(&edges.columns(), &config(2, 10));
    assert_eq!(status_of(&result), StatusCode::InvalidArgument);

    let negative = EdgeList::from_pairs(&[(0, -3)], 1);
    let result = engine.pagerank(&negative.columns(), &config(1, 10));
    assert_eq!(status_of(&result), StatusCode::InvalidArgument);

    let result = engine.pagerank(&edges.columns(), &config(1, 10));
    assert_eq!(status_of(&result), StatusCode::Success);
    assert_eq!(engine.memory().allocated_bytes(DeviceId(0)), 0);
}

#[test]
fn test_scores_invariant_across_device_counts() {
    let expected = pagerank_reference(12, &as_u32(WEB), 0.85, 30);
    let engine = engine();

    for devices in 1..=4 {
        let edges = EdgeList::from_pairs(WEB, devices);
        let output = engine
            .pagerank(&edges.columns(), &config(devices, 30))
            .unwrap();

        assert_eq!(output.scores.len(), 12);
        for (v, (got, want)) in output.scores.iter().zip(&expected).enumerate() {
            assert!(
                (got - want).abs() < 1e-4,
                "{devices} devices, vertex {v}: {got} vs {want}"
            );
        }
    }
}

#[test]
fn test_mass_conserved_with_dangling_vertices() {
    // 9 and 11 have no out-edges
    let engine = engine();
    for devices in [1, 3] {
        let edges = EdgeList::from_pairs(WEB, devices);
        let output = engine
            .pagerank(&edges.columns(), &config(devices, 40))
            .unwrap();

        let sum: f32 = output.scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "Sum = {sum}");
        assert!(output.scores.iter().all(|&s| s > 0.0));
    }
}

#[test]
fn test_single_iteration_is_normalized() {
    let engine = engine();
    for devices in [1, 2, 4] {
        let edges = EdgeList::from_pairs(WEB, devices);
        let output = engine
            .pagerank(&edges.columns(), &config(devices, 1))
            .unwrap();

        assert_eq!(output.iterations, 1);
        let sum: f32 = output.scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "{devices} devices: sum = {sum}");
    }
}

#[test]
fn test_isolated_vertex_keeps_teleport_share() {
    // Vertex 2 has no edges at all
    let edges = EdgeList::from_pairs(&[(0, 1), (1, 0), (3, 3)], 1);
    let output = engine().pagerank(&edges.columns(), &config(1, 50)).unwrap();

    assert_eq!(output.scores.len(), 4);
    let sum: f32 = output.scores.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
    assert!(output.scores[2] < output.scores[0]);
}

#[test]
fn test_residual_shrinks_geometrically() {
    // Transition matrix has eigenvalues 1 and -1/2: the residual halves
    // every iteration, starting from 1/2
    let edges = EdgeList::from_pairs(&[(0, 1), (1, 0), (1, 1)], 1);
    let engine = engine();

    let mut last = f32::INFINITY;
    for k in [2, 4, 8, 16] {
        let mut cfg = config(1, k);
        cfg.tolerance(Some(0.0));
        let output = engine.pagerank(&edges.columns(), &cfg).unwrap();

        let residual = output.residual.unwrap();
        let expected = 0.5_f32.powi(i32::try_from(k).unwrap());
        assert_eq!(output.iterations, k);
        assert!(residual < last, "k = {k}: {residual} >= {last}");
        assert!((residual - expected).abs() < 1e-5, "k = {k}: {residual}");
        last = residual;
    }
}

#[test]
fn test_tolerance_stops_early() {
    let edges = EdgeList::from_pairs(&[(0, 1), (1, 0), (1, 1)], 2);
    let mut cfg = config(2, 100);
    cfg.tolerance(Some(1e-3));

    let output = engine().pagerank(&edges.columns(), &cfg).unwrap();

    // 2^-10 < 1e-3 < 2^-9
    assert_eq!(output.iterations, 10);
    assert!(output.residual.unwrap() <= 1e-3);
    assert!((output.scores[0] - 1.0 / 3.0).abs() < 1e-3);
    assert!((output.scores[1] - 2.0 / 3.0).abs() < 1e-3);
}

#[test]
fn test_solver_state_machine() {
    let devices = 2;
    let memory = Arc::new(DeviceMemory::new(devices));
    let edges = EdgeList::from_pairs(&[(0, 1), (1, 2), (2, 0)], devices);
    let csr = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), devices).unwrap();
    let topology = DeviceTopology::new(devices, 1);

    let launched = launch(&topology, &memory, Backend::Host, devices, |ctx| {
        let shard = ctx.agree(
            csr.shard(ctx.id())
                .map(|s| s.view())
                .ok_or_else(|| SnmgError::InvalidArgument("missing shard".into())),
        )?;
        let mut solver = SnmgPageRank::new(ctx, csr.partition(), shard)?;
        let mut pr = ctx.agree(DistributedVector::zeroed(ctx, csr.partition()))?;

        let early = solver.solve(10, &mut pr).unwrap_err();
        assert_eq!(early, SnmgError::InvalidState(InvalidState::NotSetUp));
        assert!(!solver.is_set_up());

        solver.setup(0.85, None)?;
        let again = solver.setup(0.5, None).unwrap_err();
        assert_eq!(again, SnmgError::InvalidState(InvalidState::AlreadySetUp));
        assert_eq!(again.status(), StatusCode::Failure);

        let stats = solver.solve(25, &mut pr)?;
        pr.gather_full(ctx)?;
        Ok((stats.iterations, pr.full().to_vec()))
    })
    .unwrap();

    for (iterations, scores) in launched.per_device {
        assert_eq!(iterations, 25);
        for score in scores {
            assert!((score - 1.0 / 3.0).abs() < 1e-4);
        }
    }

    // Only the shards outlive the run
    drop(csr);
    assert_eq!(memory.allocated_bytes(DeviceId(0)), 0);
}

#[test]
fn test_allocation_failure_cleans_up() {
    // Shards fit, the full-length PageRank vector does not
    let memory = Arc::new(DeviceMemory::with_capacity(3, 128));
    let engine = SnmgEngine::with_memory(DeviceTopology::new(3, 1), Arc::clone(&memory));
    let pairs: Vec<(i32, i32)> = (0..30).map(|i| (i, (i + 1) % 30)).collect();
    let edges = EdgeList::from_pairs(&pairs, 3);

    let result = engine.pagerank(&edges.columns(), &config(3, 10));

    assert_eq!(status_of(&result), StatusCode::Failure);
    for d in 0..3 {
        assert_eq!(memory.allocated_bytes(DeviceId(d)), 0);
        assert_eq!(memory.live_allocations(DeviceId(d)), 0);
    }
}

#[tokio::test]
async fn test_parquet_round_trip_through_engine() {
    use snmg_pagerank::{
        read_edge_parquet, read_scores_parquet, write_edge_parquet, write_scores_parquet,
    };
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let edge_path = dir.path().join("edges.parquet");
    let score_path = dir.path().join("scores.parquet");

    write_edge_parquet(&edge_path, &EdgeList::from_pairs(WEB, 3))
        .await
        .unwrap();

    // Re-chunked for two devices on read
    let edges = read_edge_parquet(&edge_path, 2).await.unwrap();
    assert_eq!(edges.num_edges(), WEB.len());
    assert_eq!(edges.sources.len(), 2);

    let output = engine().pagerank(&edges.columns(), &config(2, 30)).unwrap();
    write_scores_parquet(&score_path, &output.scores).await.unwrap();

    let loaded = read_scores_parquet(&score_path).await.unwrap();
    assert_eq!(loaded, output.scores);
}
