//! Graph storage layer
//!
//! Provides per-device edge columns, the row-partitioned transposed CSR built
//! from them, and Parquet persistence (`storage` feature).

pub mod csr;
pub mod edges;
#[cfg(feature = "storage")]
pub mod parquet;

pub use csr::{CsrShard, CsrView, PartitionedCsr};
pub use edges::{EdgeColumns, EdgeList};
