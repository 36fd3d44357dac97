//! Partition descriptor: which device owns which global vertex ids
//!
//! ```text
//! offsets: [0, 3, 3, 7]   // 3 devices, 7 vertices
//!
//! device 0 owns [0, 3)
//! device 1 owns [3, 3)    // empty partitions are allowed
//! device 2 owns [3, 7)
//! ```

use crate::device::DeviceId;
use crate::error::{Result, SnmgError};
use std::ops::Range;

/// Monotonic offset table of length `num_devices + 1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffsets {
    offsets: Vec<usize>,
}

impl PartitionOffsets {
    /// Validate and wrap an offset table
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::InvalidArgument`] if the table has fewer than two
    /// entries, does not start at 0, or decreases anywhere
    ///
    /// # Example
    ///
    /// ```
    /// use snmg_pagerank::PartitionOffsets;
    /// use snmg_pagerank::device::DeviceId;
    ///
    /// let partition = PartitionOffsets::new(vec![0, 2, 5]).unwrap();
    /// assert_eq!(partition.num_devices(), 2);
    /// assert_eq!(partition.num_vertices(), 5);
    /// assert_eq!(partition.range(DeviceId(1)), 2..5);
    /// assert_eq!(partition.owner(4), Some(DeviceId(1)));
    /// ```
    pub fn new(offsets: Vec<usize>) -> Result<Self> {
        if offsets.len() < 2 {
            return Err(SnmgError::invalid_argument(
                "partition offsets need at least two entries",
            ));
        }
        if offsets[0] != 0 {
            return Err(SnmgError::invalid_argument(format!(
                "partition offsets must start at 0, got {}",
                offsets[0]
            )));
        }
        if let Some(pos) = offsets.windows(2).position(|w| w[0] > w[1]) {
            return Err(SnmgError::invalid_argument(format!(
                "partition offsets decrease at device {pos}: {} > {}",
                offsets[pos],
                offsets[pos + 1]
            )));
        }
        Ok(Self { offsets })
    }

    /// Split `num_vertices` into `num_devices` contiguous ranges of nearly
    /// equal size
    #[must_use]
    pub fn uniform(num_vertices: usize, num_devices: usize) -> Self {
        let num_devices = num_devices.max(1);
        let offsets = (0..=num_devices)
            .map(|d| num_vertices * d / num_devices)
            .collect();
        Self { offsets }
    }

    /// Split rows so that every device holds about the same number of edges
    ///
    /// `row_offsets` is the global CSR offset array (length `num_vertices + 1`).
    /// Device `d` starts at the first row whose preceding edge count reaches
    /// `d * num_edges / num_devices`.
    #[must_use]
    pub fn balanced(row_offsets: &[u32], num_devices: usize) -> Self {
        let num_devices = num_devices.max(1);
        let num_vertices = row_offsets.len().saturating_sub(1);
        let num_edges = row_offsets.last().map_or(0, |&e| u64::from(e));

        let mut offsets = Vec::with_capacity(num_devices + 1);
        offsets.push(0);
        for d in 1..num_devices {
            let target = num_edges * d as u64 / num_devices as u64;
            let start = row_offsets[..num_vertices].partition_point(|&c| u64::from(c) < target);
            offsets.push(start);
        }
        offsets.push(num_vertices);
        Self { offsets }
    }

    /// Number of devices
    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total vertex count (`offsets[num_devices]`)
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Global vertex range owned by `device`
    ///
    /// # Panics
    ///
    /// Panics if `device` is not part of this partition
    #[must_use]
    pub fn range(&self, device: DeviceId) -> Range<usize> {
        self.offsets[device.0]..self.offsets[device.0 + 1]
    }

    /// Number of vertices owned by `device`
    #[must_use]
    pub fn local_len(&self, device: DeviceId) -> usize {
        self.range(device).len()
    }

    /// Device owning global vertex `vertex`
    #[must_use]
    pub fn owner(&self, vertex: usize) -> Option<DeviceId> {
        if vertex >= self.num_vertices() {
            return None;
        }
        // Last offset <= vertex whose range is non-empty
        let upper = self.offsets.partition_point(|&o| o <= vertex);
        Some(DeviceId(upper - 1))
    }

    /// Raw offset table
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(PartitionOffsets::new(vec![0]).is_err());
        assert!(PartitionOffsets::new(vec![1, 4]).is_err());
        assert!(PartitionOffsets::new(vec![0, 4, 2]).is_err());
        assert!(PartitionOffsets::new(vec![0, 0, 0]).is_ok());
    }

    #[test]
    fn test_uniform_split() {
        let partition = PartitionOffsets::uniform(10, 3);
        assert_eq!(partition.as_slice(), &[0, 3, 6, 10]);
        assert_eq!(partition.local_len(DeviceId(2)), 4);
    }

    #[test]
    fn test_balanced_by_edges() {
        // 4 rows holding 6, 0, 1, 1 edges
        let row_offsets = [0, 6, 6, 7, 8];
        let partition = PartitionOffsets::balanced(&row_offsets, 2);
        // target 4 edges: row 1 is the first whose prefix reaches 4
        assert_eq!(partition.as_slice(), &[0, 1, 4]);
        assert_eq!(partition.num_vertices(), 4);
    }

    #[test]
    fn test_balanced_more_devices_than_rows() {
        let row_offsets = [0, 1, 2];
        let partition = PartitionOffsets::balanced(&row_offsets, 4);
        assert_eq!(partition.num_devices(), 4);
        assert_eq!(partition.num_vertices(), 2);
        let total: usize = (0..4).map(|d| partition.local_len(DeviceId(d))).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_owner_skips_empty_partitions() {
        let partition = PartitionOffsets::new(vec![0, 3, 3, 7]).unwrap();
        assert_eq!(partition.owner(0), Some(DeviceId(0)));
        assert_eq!(partition.owner(2), Some(DeviceId(0)));
        assert_eq!(partition.owner(3), Some(DeviceId(2)));
        assert_eq!(partition.owner(6), Some(DeviceId(2)));
        assert_eq!(partition.owner(7), None);
    }
}
