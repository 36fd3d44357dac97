//! snmg-pagerank: single-node multi-GPU `PageRank`
//!
//! # Overview
//!
//! Computes `PageRank` over a graph whose transposed adjacency is split
//! row-wise across devices. One worker thread per device runs the power
//! iteration; workers exchange vector segments through shared staging slots
//! and agree on failures collectively.
//!
//! # Quick Start
//!
//! ```
//! use snmg_pagerank::{EdgeList, PageRankConfig, SnmgEngine};
//! use snmg_pagerank::device::DeviceTopology;
//!
//! // 0 → 1, 0 → 2: vertices 1 and 2 are dangling
//! let edges = EdgeList::from_pairs(&[(0, 1), (0, 2)], 2);
//!
//! let engine = SnmgEngine::new(DeviceTopology::new(2, 1));
//! let mut config = PageRankConfig::default();
//! config.num_devices(2).max_iterations(50);
//!
//! let output = engine.pagerank(&edges.columns(), &config)?;
//! assert!(output.scores[0] < output.scores[1]);
//! assert!((output.scores.iter().sum::<f32>() - 1.0).abs() < 1e-5);
//! # Ok::<(), snmg_pagerank::SnmgError>(())
//! ```
//!
//! # Architecture
//!
//! - **Devices**: host-emulated accelerators (thread + rayon lanes) or wgpu
//!   adapters (`gpu` feature), with per-device memory accounting
//! - **Storage**: per-device edge columns, transposed CSR shards, Parquet I/O
//! - **Algorithms**: distributed degree, SpMV, vector primitives and the
//!   `PageRank` setup/solve state machine
//! - **Engine**: validation, coo2csr, fork-join launch and result publication

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod algorithms;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod partition;
pub mod storage;
pub mod vector;

// Arrow column surface (default `storage` feature)
#[cfg(feature = "storage")]
pub mod column;

// Re-export core types
pub use algorithms::{pagerank_reference, SnmgPageRank, SolveStats};
pub use config::{PageRankConfig, DEFAULT_DAMPING_FACTOR, DEFAULT_MAX_ITERATIONS};
pub use engine::{pagerank, PageRankOutput, SnmgEngine};
pub use error::{status_of, ErrorKind, InvalidState, Result, SnmgError, StatusCode};
pub use partition::PartitionOffsets;
pub use storage::{EdgeColumns, EdgeList, PartitionedCsr};
pub use vector::DistributedVector;

#[cfg(feature = "storage")]
pub use column::pagerank_columns;

#[cfg(feature = "storage")]
pub use storage::parquet::{
    read_edge_parquet, read_scores_parquet, write_edge_parquet, write_scores_parquet,
};
