//! Distributed degree computation
//!
//! The graph is stored transposed (rows are destinations), so counting how
//! often a vertex appears as a column index gives its out-degree in the
//! original edge direction.

use crate::device::{DeviceBuffer, ExecutionContext};
use crate::error::Result;
use crate::partition::PartitionOffsets;
use crate::storage::CsrView;
use crate::vector::DistributedVector;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// Global degree vector, replicated on every device (collective)
///
/// Each device scatter-adds one count per local edge into a global-length
/// partial, then the partials are summed segment-wise by their owners and
/// gathered back.
///
/// # Errors
///
/// Returns [`crate::SnmgError::AllocationFailure`] on the device that ran out
/// of memory and [`crate::SnmgError::CollectiveFailure`] on every other device;
/// nothing stays allocated in either case
pub fn compute_degrees(
    ctx: &ExecutionContext<'_>,
    partition: &PartitionOffsets,
    csr: &CsrView<'_>,
) -> Result<DistributedVector<u32>> {
    let num_vertices = partition.num_vertices();

    let counts = ctx.agree(DeviceBuffer::<AtomicU32>::zeroed(
        ctx.memory(),
        ctx.id(),
        num_vertices,
    ))?;
    let cols = csr.col_indices();
    ctx.install(|| {
        cols.par_iter().for_each(|&col| {
            counts[col as usize].fetch_add(1, Ordering::Relaxed);
        });
    });

    let mut degrees = ctx.agree(DistributedVector::from_fn(ctx, partition, |v| {
        counts[v].load(Ordering::Relaxed)
    }))?;
    drop(counts);

    ctx.all_reduce_sum(partition, degrees.full_mut())?;
    Ok(degrees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{launch, Backend, DeviceId, DeviceMemory, DeviceTopology};
    use crate::storage::{EdgeList, PartitionedCsr};
    use crate::SnmgError;
    use std::sync::Arc;

    fn degrees_on(pairs: &[(i32, i32)], devices: usize) -> Vec<Vec<u32>> {
        let memory = Arc::new(DeviceMemory::new(devices));
        let edges = EdgeList::from_pairs(pairs, devices);
        let csr = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), devices).unwrap();

        launch(&DeviceTopology::new(devices, 2), &memory, Backend::Host, devices, |ctx| {
            let shard = csr.shard(ctx.id()).unwrap().view();
            let degrees = compute_degrees(ctx, csr.partition(), &shard)?;
            Ok(degrees.full().to_vec())
        })
        .unwrap()
        .per_device
    }

    #[test]
    fn test_out_degree_of_original_graph() {
        // 0 → 1, 0 → 2, 1 → 2: vertex 2 is dangling
        for degrees in degrees_on(&[(0, 1), (0, 2), (1, 2)], 1) {
            assert_eq!(degrees, vec![2, 1, 0]);
        }
    }

    #[test]
    fn test_degrees_replicated_across_devices() {
        let pairs = [(0, 1), (0, 2), (0, 3), (1, 2), (2, 3), (3, 0), (4, 0)];
        let expected = vec![3, 1, 1, 1, 1];
        for devices in 1..=4 {
            for degrees in degrees_on(&pairs, devices) {
                assert_eq!(degrees, expected, "{devices} devices");
            }
        }
    }

    #[test]
    fn test_allocation_failure_is_collective() {
        let memory = Arc::new(DeviceMemory::new(2));
        let edges = EdgeList::from_pairs(&[(0, 1), (1, 2), (2, 3), (3, 0)], 2);
        let csr = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), 2).unwrap();

        // Arenas too small for the 4-vertex partial
        let tight = Arc::new(DeviceMemory::with_capacity(2, 8));
        let err = launch(&DeviceTopology::new(2, 1), &tight, Backend::Host, 2, |ctx| {
            let shard = csr.shard(ctx.id()).unwrap().view();
            compute_degrees(ctx, csr.partition(), &shard).map(|_| ())
        })
        .unwrap_err();

        assert!(matches!(err, SnmgError::AllocationFailure { .. }));
        assert_eq!(tight.allocated_bytes(DeviceId(0)), 0);
        assert_eq!(tight.allocated_bytes(DeviceId(1)), 0);
    }
}
