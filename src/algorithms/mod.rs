//! Distributed `PageRank` and the kernels it drives
//!
//! - `blas`: fill/scale/add/dot/norm over distributed vectors
//! - `degree`: global degree vector from row-partitioned shards
//! - `spmv`: distributed sparse matrix-vector multiply
//! - `pagerank`: the setup/solve state machine
//! - `reference`: sequential ground truth

pub mod blas;
pub mod degree;
pub mod pagerank;
pub mod reference;
pub mod spmv;

pub use degree::compute_degrees;
pub use pagerank::{SnmgPageRank, SolveStats};
pub use reference::pagerank_reference;
pub use spmv::DistributedSpmv;
