//! Distributed dense vector
//!
//! Every device holds a global-length buffer but owns (writes) only the
//! segment its partition assigns to it. The other segments are stale until
//! [`DistributedVector::gather_full`] refreshes them.

use crate::device::{DeviceBuffer, DeviceId, Exchangeable, ExecutionContext};
use crate::error::Result;
use crate::partition::PartitionOffsets;
use std::ops::Range;

/// One device's copy of a vector distributed by a [`PartitionOffsets`]
#[derive(Debug)]
pub struct DistributedVector<T> {
    partition: PartitionOffsets,
    owner: DeviceId,
    buffer: DeviceBuffer<T>,
}

impl<T> DistributedVector<T> {
    /// Allocate a vector of `T::default()` on the context's device
    ///
    /// # Errors
    ///
    /// Returns [`crate::SnmgError::AllocationFailure`] if the device arena is full
    pub fn zeroed(ctx: &ExecutionContext<'_>, partition: &PartitionOffsets) -> Result<Self>
    where
        T: Default,
    {
        Ok(Self {
            partition: partition.clone(),
            owner: ctx.id(),
            buffer: ctx.alloc_zeroed(partition.num_vertices())?,
        })
    }

    /// Allocate a vector with every entry set to `value`
    ///
    /// # Errors
    ///
    /// Returns [`crate::SnmgError::AllocationFailure`] if the device arena is full
    pub fn filled(ctx: &ExecutionContext<'_>, partition: &PartitionOffsets, value: T) -> Result<Self>
    where
        T: Clone,
    {
        Ok(Self {
            partition: partition.clone(),
            owner: ctx.id(),
            buffer: DeviceBuffer::filled(ctx.memory(), ctx.id(), partition.num_vertices(), value)?,
        })
    }

    /// Allocate a vector whose entry `v` is `init(v)`
    ///
    /// # Errors
    ///
    /// Returns [`crate::SnmgError::AllocationFailure`] if the device arena is full
    pub fn from_fn(
        ctx: &ExecutionContext<'_>,
        partition: &PartitionOffsets,
        init: impl FnMut(usize) -> T,
    ) -> Result<Self> {
        Ok(Self {
            partition: partition.clone(),
            owner: ctx.id(),
            buffer: DeviceBuffer::from_fn(ctx.memory(), ctx.id(), partition.num_vertices(), init)?,
        })
    }

    /// Global length
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the vector has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Global index range owned by this device
    #[must_use]
    pub fn local_range(&self) -> Range<usize> {
        self.partition.range(self.owner)
    }

    /// Owned segment
    #[must_use]
    pub fn local(&self) -> &[T] {
        &self.buffer[self.partition.range(self.owner)]
    }

    /// Owned segment, writable
    pub fn local_mut(&mut self) -> &mut [T] {
        let range = self.partition.range(self.owner);
        &mut self.buffer[range]
    }

    /// Whole buffer, including possibly stale peer segments
    #[must_use]
    pub fn full(&self) -> &[T] {
        &self.buffer
    }

    /// Whole buffer, writable
    pub fn full_mut(&mut self) -> &mut [T] {
        &mut self.buffer
    }

    /// Partition this vector follows
    #[must_use]
    pub const fn partition(&self) -> &PartitionOffsets {
        &self.partition
    }

    /// Refresh every peer segment from its owner (collective)
    ///
    /// # Errors
    ///
    /// Returns [`crate::SnmgError::CollectiveFailure`] if a peer left the
    /// group
    pub fn gather_full(&mut self, ctx: &ExecutionContext<'_>) -> Result<()>
    where
        T: Exchangeable,
    {
        ctx.all_gather(&self.partition, &mut self.buffer)
    }

    /// Copy of the owned segment
    #[must_use]
    pub fn local_to_host(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.local().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{launch, Backend, DeviceMemory, DeviceTopology};
    use std::sync::Arc;

    #[test]
    fn test_gather_full_after_local_writes() {
        let memory = Arc::new(DeviceMemory::new(3));
        let partition = PartitionOffsets::new(vec![0, 1, 1, 4]).unwrap();

        let launched = launch(&DeviceTopology::new(3, 1), &memory, Backend::Host, 3, |ctx| {
            let mut v = DistributedVector::<f32>::zeroed(ctx, &partition)?;
            let base = v.local_range().start;
            for (i, x) in v.local_mut().iter_mut().enumerate() {
                *x = (base + i) as f32;
            }
            v.gather_full(ctx)?;
            Ok(v.full().to_vec())
        })
        .unwrap();

        for full in launched.per_device {
            assert_eq!(full, vec![0.0, 1.0, 2.0, 3.0]);
        }
        assert_eq!(memory.allocated_bytes(DeviceId(0)), 0);
    }

    #[test]
    fn test_local_segment_of_empty_partition() {
        let memory = Arc::new(DeviceMemory::new(2));
        let partition = PartitionOffsets::new(vec![0, 0, 2]).unwrap();

        let launched = launch(&DeviceTopology::new(2, 1), &memory, Backend::Host, 2, |ctx| {
            let v = DistributedVector::filled(ctx, &partition, 7_u32)?;
            Ok((v.len(), v.local_to_host()))
        })
        .unwrap();

        assert_eq!(launched.per_device[0], (2, vec![]));
        assert_eq!(launched.per_device[1], (2, vec![7, 7]));
    }
}
