//! Per-device edge columns (coordinate format)
//!
//! Edges arrive already spread over devices: device `d` holds the `d`-th
//! source column and the `d`-th destination column, both of 32-bit vertex ids.

use crate::error::{Result, SnmgError};

/// Borrowed source/destination columns, one pair per device
#[derive(Debug, Clone)]
pub struct EdgeColumns<'a> {
    sources: Vec<&'a [i32]>,
    destinations: Vec<&'a [i32]>,
}

impl<'a> EdgeColumns<'a> {
    /// Wrap per-device columns
    #[must_use]
    pub fn new(sources: Vec<&'a [i32]>, destinations: Vec<&'a [i32]>) -> Self {
        Self {
            sources,
            destinations,
        }
    }

    /// One column pair (a single-device layout)
    #[must_use]
    pub fn single(sources: &'a [i32], destinations: &'a [i32]) -> Self {
        Self::new(vec![sources], vec![destinations])
    }

    /// Number of column pairs
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.sources.len()
    }

    /// Total number of edges over all devices
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.sources.iter().map(|c| c.len()).sum()
    }

    /// Source column of device `index`
    #[must_use]
    pub fn sources(&self, index: usize) -> Option<&'a [i32]> {
        self.sources.get(index).copied()
    }

    /// Destination column of device `index`
    #[must_use]
    pub fn destinations(&self, index: usize) -> Option<&'a [i32]> {
        self.destinations.get(index).copied()
    }

    /// Check the caller-side preconditions
    ///
    /// Nothing is allocated; this runs before any device work.
    ///
    /// # Errors
    ///
    /// - [`SnmgError::InvalidArgument`] if the number of column pairs differs
    ///   from `num_devices`, or an id is negative
    /// - [`SnmgError::ColumnSizeMismatch`] if a device's columns differ in
    ///   length
    pub fn validate(&self, num_devices: usize) -> Result<()> {
        if self.sources.len() != num_devices || self.destinations.len() != num_devices {
            return Err(SnmgError::invalid_argument(format!(
                "expected {num_devices} column pairs, got {} sources and {} destinations",
                self.sources.len(),
                self.destinations.len()
            )));
        }

        for (device, (src, dst)) in self.sources.iter().zip(&self.destinations).enumerate() {
            if src.len() != dst.len() {
                return Err(SnmgError::ColumnSizeMismatch {
                    device,
                    sources: src.len(),
                    destinations: dst.len(),
                });
            }
        }

        for (device, (src, dst)) in self.sources.iter().zip(&self.destinations).enumerate() {
            if let Some(&id) = src.iter().chain(dst.iter()).find(|&&id| id < 0) {
                return Err(SnmgError::invalid_argument(format!(
                    "negative vertex id {id} on device {device}"
                )));
            }
        }

        Ok(())
    }

    /// All edges as `(source, destination)`, device by device
    ///
    /// Ids are reinterpreted as unsigned; call [`validate`](Self::validate)
    /// first.
    #[allow(clippy::cast_sign_loss)]
    pub fn iter_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.sources
            .iter()
            .zip(&self.destinations)
            .flat_map(|(src, dst)| src.iter().zip(dst.iter()).map(|(&s, &d)| (s as u32, d as u32)))
    }
}

/// Owned edge columns, e.g. loaded from disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeList {
    /// Source column per device
    pub sources: Vec<Vec<i32>>,

    /// Destination column per device
    pub destinations: Vec<Vec<i32>>,
}

impl EdgeList {
    /// Deal `(source, destination)` pairs to `num_devices` devices in
    /// contiguous chunks
    ///
    /// # Example
    ///
    /// ```
    /// use snmg_pagerank::EdgeList;
    ///
    /// let edges = EdgeList::from_pairs(&[(0, 1), (1, 2), (2, 0)], 2);
    /// assert_eq!(edges.sources, vec![vec![0, 1], vec![2]]);
    /// assert_eq!(edges.destinations, vec![vec![1, 2], vec![0]]);
    /// ```
    #[must_use]
    pub fn from_pairs(pairs: &[(i32, i32)], num_devices: usize) -> Self {
        let num_devices = num_devices.max(1);
        let chunk = pairs.len().div_ceil(num_devices).max(1);

        let mut list = Self {
            sources: vec![Vec::new(); num_devices],
            destinations: vec![Vec::new(); num_devices],
        };
        for (index, &(src, dst)) in pairs.iter().enumerate() {
            let device = index / chunk;
            list.sources[device].push(src);
            list.destinations[device].push(dst);
        }
        list
    }

    /// Borrow as [`EdgeColumns`]
    #[must_use]
    pub fn columns(&self) -> EdgeColumns<'_> {
        EdgeColumns::new(
            self.sources.iter().map(Vec::as_slice).collect(),
            self.destinations.iter().map(Vec::as_slice).collect(),
        )
    }

    /// Total number of edges
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.sources.iter().map(Vec::len).sum()
    }
}
