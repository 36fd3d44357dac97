//! Row-partitioned CSR (Compressed Sparse Row) shards
//!
//! Based on `GraphBLAST` (Yang et al., ACM `ToMS` 2022) for GPU-optimized sparse matrix operations.
//!
//! # Transposed CSR Format
//!
//! The matrix is stored transposed: a row is a destination vertex and its
//! column indices are the sources of the edges pointing at it.
//!
//! ```text
//! Graph: 0 → 1, 0 → 2, 1 → 2
//!
//! CSR (rows = destinations):
//!   row_offsets: [0, 0, 1, 3]  // Vertex 0: no in-edges, 1: [0..1), 2: [1..3)
//!   col_indices: [0, 0, 1]      // 0 → 1, 0 → 2, 1 → 2
//!
//! Split over 2 devices at vertex 2:
//!   device 0: rows [0, 2)  row_offsets [0, 0, 1]  col_indices [0]
//!   device 1: rows [2, 3)  row_offsets [0, 2]     col_indices [0, 1]
//! ```
//!
//! Row offsets are rebased to 0 per shard; column indices stay global.

use super::EdgeColumns;
use crate::device::{DeviceBuffer, DeviceId, DeviceMemory};
use crate::error::{Result, SnmgError};
use crate::partition::PartitionOffsets;
use std::sync::Arc;

/// Non-owning view of one device's CSR shard
#[derive(Debug, Clone, Copy)]
pub struct CsrView<'a> {
    device: DeviceId,
    row_offsets: &'a [u32],
    col_indices: &'a [u32],
}

impl<'a> CsrView<'a> {
    /// Check and wrap borrowed shard arrays
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::InvalidArgument`] if:
    /// - `row_offsets` is empty, does not start at 0, or decreases
    /// - the last row offset differs from `col_indices.len()`
    /// - a column index is not below `num_vertices`
    pub fn new(
        device: DeviceId,
        row_offsets: &'a [u32],
        col_indices: &'a [u32],
        num_vertices: usize,
    ) -> Result<Self> {
        let invalid = |what: String| SnmgError::invalid_argument(format!("{device}: {what}"));

        match row_offsets.first() {
            None => return Err(invalid("row_offsets is empty".to_string())),
            Some(&first) if first != 0 => {
                return Err(invalid(format!("row_offsets starts at {first}")))
            }
            Some(_) => {}
        }
        if row_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(invalid("row_offsets decreases".to_string()));
        }
        let num_edges = row_offsets[row_offsets.len() - 1] as usize;
        if num_edges != col_indices.len() {
            return Err(invalid(format!(
                "row_offsets ends at {num_edges} but there are {} column indices",
                col_indices.len()
            )));
        }
        if let Some(&col) = col_indices.iter().find(|&&c| c as usize >= num_vertices) {
            return Err(invalid(format!(
                "column index {col} out of range for {num_vertices} vertices"
            )));
        }

        Ok(Self {
            device,
            row_offsets,
            col_indices,
        })
    }

    /// Device whose memory holds the shard
    #[must_use]
    pub const fn device(&self) -> DeviceId {
        self.device
    }

    /// Local row (vertex) count
    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    /// Local edge count, read from the last row offset
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.row_offsets[self.num_rows()] as usize
    }

    /// Column indices (global sources) of local row `row`
    #[must_use]
    pub fn row(&self, row: usize) -> &'a [u32] {
        let start = self.row_offsets[row] as usize;
        let end = self.row_offsets[row + 1] as usize;
        &self.col_indices[start..end]
    }

    /// Local row offsets
    #[must_use]
    pub const fn row_offsets(&self) -> &'a [u32] {
        self.row_offsets
    }

    /// Global column indices
    #[must_use]
    pub const fn col_indices(&self) -> &'a [u32] {
        self.col_indices
    }
}

/// One device's CSR shard, resident in that device's memory
#[derive(Debug)]
pub struct CsrShard {
    row_offsets: DeviceBuffer<u32>,
    col_indices: DeviceBuffer<u32>,
}

impl CsrShard {
    /// Device holding the shard
    #[must_use]
    pub const fn device(&self) -> DeviceId {
        self.row_offsets.device()
    }

    /// Borrow the shard
    #[must_use]
    pub fn view(&self) -> CsrView<'_> {
        CsrView {
            device: self.device(),
            row_offsets: &self.row_offsets,
            col_indices: &self.col_indices,
        }
    }
}

/// A transposed graph split row-wise over devices
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use snmg_pagerank::{EdgeColumns, PartitionedCsr};
/// use snmg_pagerank::device::{DeviceId, DeviceMemory};
///
/// let memory = Arc::new(DeviceMemory::new(1));
/// let (src, dst) = ([0, 0, 1], [1, 2, 2]);
/// let csr = PartitionedCsr::from_edge_columns(&memory, &EdgeColumns::single(&src, &dst), 1).unwrap();
///
/// assert_eq!(csr.num_vertices(), 3);
/// let shard = csr.shard(DeviceId(0)).unwrap().view();
/// assert_eq!(shard.row_offsets(), &[0, 0, 1, 3]);
/// assert_eq!(shard.row(2), &[0, 1]);
/// ```
#[derive(Debug)]
pub struct PartitionedCsr {
    partition: PartitionOffsets,
    shards: Vec<CsrShard>,
    num_edges: usize,
}

impl PartitionedCsr {
    /// coo2csr: build the transposed CSR and upload one shard per device
    ///
    /// The vertex count is `max(id) + 1` over both columns. Rows are split so
    /// that each device holds about `E / num_devices` edges.
    ///
    /// # Errors
    ///
    /// - [`SnmgError::InvalidArgument`] / [`SnmgError::ColumnSizeMismatch`]
    ///   from [`EdgeColumns::validate`], or more than `u32::MAX` edges
    /// - [`SnmgError::AllocationFailure`] if a shard does not fit its device;
    ///   shards uploaded so far are released
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_edge_columns(
        memory: &Arc<DeviceMemory>,
        edges: &EdgeColumns<'_>,
        num_devices: usize,
    ) -> Result<Self> {
        edges.validate(num_devices)?;

        let num_edges = edges.num_edges();
        if u32::try_from(num_edges).is_err() {
            return Err(SnmgError::invalid_argument(format!(
                "{num_edges} edges exceed the 32-bit CSR offset range"
            )));
        }

        let num_vertices = edges
            .iter_edges()
            .map(|(src, dst)| src.max(dst) as usize + 1)
            .max()
            .unwrap_or(0);

        // Counting sort by destination
        let mut row_offsets = vec![0_u32; num_vertices + 1];
        for (_, dst) in edges.iter_edges() {
            row_offsets[dst as usize + 1] += 1;
        }
        for v in 0..num_vertices {
            row_offsets[v + 1] += row_offsets[v];
        }

        let mut cursor = row_offsets.clone();
        let mut col_indices = vec![0_u32; num_edges];
        for (src, dst) in edges.iter_edges() {
            let slot = &mut cursor[dst as usize];
            col_indices[*slot as usize] = src;
            *slot += 1;
        }
        for v in 0..num_vertices {
            col_indices[row_offsets[v] as usize..row_offsets[v + 1] as usize].sort_unstable();
        }

        let partition = PartitionOffsets::balanced(&row_offsets, num_devices);
        let shards = (0..num_devices)
            .map(DeviceId)
            .map(|device| {
                let rows = partition.range(device);
                let base = row_offsets[rows.start];
                let local_offsets: Vec<u32> = row_offsets[rows.start..=rows.end]
                    .iter()
                    .map(|&o| o - base)
                    .collect();
                let local_cols =
                    &col_indices[base as usize..row_offsets[rows.end] as usize];
                Ok(CsrShard {
                    row_offsets: DeviceBuffer::from_slice(memory, device, &local_offsets)?,
                    col_indices: DeviceBuffer::from_slice(memory, device, local_cols)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "coo2csr: {num_vertices} vertices, {num_edges} edges, partition {:?}",
            partition.as_slice()
        );

        Ok(Self {
            partition,
            shards,
            num_edges,
        })
    }

    /// Upload precomputed shards for an existing partition
    ///
    /// `shards[d]` is `(row_offsets, col_indices)` of device `d`.
    ///
    /// # Errors
    ///
    /// - [`SnmgError::InvalidArgument`] if the shard count or a shard's row
    ///   count disagrees with `partition`, or a shard is malformed (see
    ///   [`CsrView::new`])
    /// - [`SnmgError::AllocationFailure`] if a shard does not fit its device
    pub fn from_shards(
        memory: &Arc<DeviceMemory>,
        partition: PartitionOffsets,
        shards: &[(Vec<u32>, Vec<u32>)],
    ) -> Result<Self> {
        if shards.len() != partition.num_devices() {
            return Err(SnmgError::invalid_argument(format!(
                "{} shards for {} devices",
                shards.len(),
                partition.num_devices()
            )));
        }

        let mut uploaded = Vec::with_capacity(shards.len());
        let mut num_edges = 0;
        for (index, (row_offsets, col_indices)) in shards.iter().enumerate() {
            let device = DeviceId(index);
            let view = CsrView::new(device, row_offsets, col_indices, partition.num_vertices())?;
            if view.num_rows() != partition.local_len(device) {
                return Err(SnmgError::invalid_argument(format!(
                    "{device}: shard has {} rows, partition assigns {}",
                    view.num_rows(),
                    partition.local_len(device)
                )));
            }
            num_edges += view.num_edges();
            uploaded.push(CsrShard {
                row_offsets: DeviceBuffer::from_slice(memory, device, row_offsets)?,
                col_indices: DeviceBuffer::from_slice(memory, device, col_indices)?,
            });
        }

        Ok(Self {
            partition,
            shards: uploaded,
            num_edges,
        })
    }

    /// Vertex ownership
    #[must_use]
    pub const fn partition(&self) -> &PartitionOffsets {
        &self.partition
    }

    /// Shard of `device`
    #[must_use]
    pub fn shard(&self, device: DeviceId) -> Option<&CsrShard> {
        self.shards.get(device.0)
    }

    /// Number of devices
    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.shards.len()
    }

    /// Global vertex count
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.partition.num_vertices()
    }

    /// Global edge count
    #[must_use]
    pub const fn num_edges(&self) -> usize {
        self.num_edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EdgeList;

    fn build(pairs: &[(i32, i32)], devices: usize) -> (Arc<DeviceMemory>, PartitionedCsr) {
        let memory = Arc::new(DeviceMemory::new(devices));
        let edges = EdgeList::from_pairs(pairs, devices);
        let csr = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), devices).unwrap();
        (memory, csr)
    }

    #[test]
    fn test_transposed_rows_are_destinations() {
        let (_memory, csr) = build(&[(0, 1), (0, 2), (1, 2)], 1);
        let view = csr.shard(DeviceId(0)).unwrap().view();

        assert_eq!(view.row_offsets(), &[0, 0, 1, 3]);
        assert_eq!(view.col_indices(), &[0, 0, 1]);
        assert!(view.row(0).is_empty());
        assert_eq!(view.num_edges(), 3);
    }

    #[test]
    fn test_rows_sorted_by_column() {
        let (_memory, csr) = build(&[(3, 0), (1, 0), (2, 0), (0, 1)], 1);
        let view = csr.shard(DeviceId(0)).unwrap().view();
        assert_eq!(view.row(0), &[1, 2, 3]);
    }

    #[test]
    fn test_shards_rebased_and_balanced() {
        // 4-cycle: one in-edge per vertex
        let (memory, csr) = build(&[(0, 1), (1, 2), (2, 3), (3, 0)], 2);
        assert_eq!(csr.partition().as_slice(), &[0, 2, 4]);

        let second = csr.shard(DeviceId(1)).unwrap().view();
        assert_eq!(second.device(), DeviceId(1));
        assert_eq!(second.row_offsets(), &[0, 1, 2]);
        assert_eq!(second.col_indices(), &[1, 2]);

        // Offsets (3 u32) + columns (2 u32) live on device 1
        assert_eq!(memory.allocated_bytes(DeviceId(1)), 20);
        drop(csr);
        assert_eq!(memory.allocated_bytes(DeviceId(1)), 0);
    }

    #[test]
    fn test_isolated_high_id_extends_vertex_count() {
        let (_memory, csr) = build(&[(0, 1), (5, 1)], 1);
        assert_eq!(csr.num_vertices(), 6);
        assert_eq!(csr.num_edges(), 2);
    }

    #[test]
    fn test_empty_graph() {
        let (_memory, csr) = build(&[], 2);
        assert_eq!(csr.num_vertices(), 0);
        assert_eq!(csr.num_edges(), 0);
        assert_eq!(csr.shard(DeviceId(1)).unwrap().view().num_rows(), 0);
    }

    #[test]
    fn test_upload_failure_releases_shards() {
        let memory = Arc::new(DeviceMemory::with_capacity(2, 8));
        let edges = EdgeList::from_pairs(&[(0, 1), (1, 2), (2, 3), (3, 0)], 2);
        let err = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), 2).unwrap_err();

        assert!(matches!(err, SnmgError::AllocationFailure { .. }));
        assert_eq!(memory.allocated_bytes(DeviceId(0)), 0);
        assert_eq!(memory.allocated_bytes(DeviceId(1)), 0);
    }

    #[test]
    fn test_view_rejects_malformed_shards() {
        let device = DeviceId(0);
        assert!(CsrView::new(device, &[], &[], 1).is_err());
        assert!(CsrView::new(device, &[1, 2], &[0], 1).is_err());
        assert!(CsrView::new(device, &[0, 2, 1], &[0, 0], 1).is_err());
        assert!(CsrView::new(device, &[0, 2], &[0], 1).is_err());
        assert!(CsrView::new(device, &[0, 1], &[4], 2).is_err());
        assert!(CsrView::new(device, &[0, 1], &[1], 2).is_ok());
    }

    #[test]
    fn test_from_shards() {
        let memory = Arc::new(DeviceMemory::new(2));
        let partition = PartitionOffsets::new(vec![0, 1, 3]).unwrap();
        let shards = vec![(vec![0, 1], vec![2]), (vec![0, 1, 1], vec![0])];
        let csr = PartitionedCsr::from_shards(&memory, partition.clone(), &shards).unwrap();
        assert_eq!(csr.num_edges(), 2);
        assert_eq!(csr.num_devices(), 2);

        let wrong_rows = vec![(vec![0, 1], vec![2]), (vec![0, 1], vec![0])];
        assert!(PartitionedCsr::from_shards(&memory, partition, &wrong_rows).is_err());
    }
}
