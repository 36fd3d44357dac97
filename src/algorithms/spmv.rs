//! Distributed sparse matrix-vector multiply
//!
//! Each device multiplies its row block by the full source vector. Before the
//! multiply every device gathers the segments it does not own; that exchange
//! is the only synchronization point of a `run`.

use crate::device::{DeviceBuffer, ExecutionContext};
use crate::error::{Result, SnmgError};
use crate::partition::PartitionOffsets;
use crate::storage::CsrView;
use crate::vector::DistributedVector;
use rayon::prelude::*;

#[cfg(feature = "gpu")]
use crate::device::GpuSpmvKernel;

/// Row-partitioned `y = A * x`, with `A` given by a CSR shard and per-edge values
#[derive(Debug)]
pub struct DistributedSpmv<'a> {
    partition: &'a PartitionOffsets,
    csr: CsrView<'a>,
    values: &'a [f32],
    product: DeviceBuffer<f32>,
    #[cfg(feature = "gpu")]
    kernel: Option<GpuSpmvKernel>,
}

impl<'a> DistributedSpmv<'a> {
    /// Bind the shard and its values (collective)
    ///
    /// With the wgpu backend the shard is uploaded to the adapter here.
    ///
    /// # Errors
    ///
    /// - [`SnmgError::InvalidArgument`] if `values` is not aligned with the
    ///   shard's edges or the shard does not match the partition
    /// - [`SnmgError::AllocationFailure`] if the product buffer does not fit
    /// - [`SnmgError::CollectiveFailure`] if another device failed
    pub fn new(
        ctx: &ExecutionContext<'_>,
        partition: &'a PartitionOffsets,
        csr: CsrView<'a>,
        values: &'a [f32],
    ) -> Result<Self> {
        let local = if values.len() != csr.num_edges() {
            Err(SnmgError::invalid_argument(format!(
                "{}: {} values for {} edges",
                ctx.id(),
                values.len(),
                csr.num_edges()
            )))
        } else if csr.num_rows() != partition.local_len(ctx.id()) {
            Err(SnmgError::invalid_argument(format!(
                "{}: shard has {} rows, partition assigns {}",
                ctx.id(),
                csr.num_rows(),
                partition.local_len(ctx.id())
            )))
        } else {
            ctx.alloc_zeroed(csr.num_rows())
        };
        let product = ctx.agree(local)?;

        #[cfg(feature = "gpu")]
        let kernel = ctx.gpu().map(|gpu| {
            GpuSpmvKernel::new(
                gpu.device(),
                csr.row_offsets(),
                csr.col_indices(),
                values,
                partition.num_vertices(),
            )
        });

        Ok(Self {
            partition,
            csr,
            values,
            product,
            #[cfg(feature = "gpu")]
            kernel,
        })
    }

    /// Replace `x` with `A * x` (collective)
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::KernelFailure`] if the wgpu multiply fails on a
    /// device, [`SnmgError::CollectiveFailure`] on its peers
    pub fn run(&mut self, ctx: &ExecutionContext<'_>, x: &mut DistributedVector<f32>) -> Result<()> {
        debug_assert_eq!(x.partition(), self.partition);
        x.gather_full(ctx)?;

        #[cfg(feature = "gpu")]
        if let (Some(kernel), Some(gpu)) = (&self.kernel, ctx.gpu()) {
            let product = &mut self.product;
            let outcome = gpu
                .block_on(kernel.multiply(gpu.device(), x.full(), product))
                .map_err(|e| SnmgError::KernelFailure {
                    device: ctx.id(),
                    reason: e.to_string(),
                });
            ctx.agree(outcome)?;
            x.local_mut().copy_from_slice(&self.product);
            return Ok(());
        }

        self.multiply_host(ctx, x.full());
        x.local_mut().copy_from_slice(&self.product);
        Ok(())
    }

    fn multiply_host(&mut self, ctx: &ExecutionContext<'_>, x: &[f32]) {
        let (csr, values) = (self.csr, self.values);
        let offsets = csr.row_offsets();
        let product = &mut self.product[..];
        ctx.install(|| {
            product.par_iter_mut().enumerate().for_each(|(row, y)| {
                let edges = offsets[row] as usize..offsets[row + 1] as usize;
                *y = csr.col_indices()[edges.clone()]
                    .iter()
                    .zip(&values[edges])
                    .map(|(&col, &w)| w * x[col as usize])
                    .sum();
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{launch, Backend, DeviceMemory, DeviceTopology};
    use crate::storage::{EdgeList, PartitionedCsr};
    use std::sync::Arc;

    /// One SpMV with unit edge values: y[dst] = sum of x[src] over in-edges
    fn spmv_unit(pairs: &[(i32, i32)], devices: usize, x: &[f32]) -> Vec<Vec<f32>> {
        let memory = Arc::new(DeviceMemory::new(devices));
        let edges = EdgeList::from_pairs(pairs, devices);
        let csr = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), devices).unwrap();

        launch(&DeviceTopology::new(devices, 2), &memory, Backend::Host, devices, |ctx| {
            let shard = csr.shard(ctx.id()).unwrap().view();
            let values = vec![1.0; shard.num_edges()];
            let mut spmv = DistributedSpmv::new(ctx, csr.partition(), shard, &values)?;

            let mut v = DistributedVector::from_fn(ctx, csr.partition(), |i| x[i])?;
            spmv.run(ctx, &mut v)?;
            v.gather_full(ctx)?;
            Ok(v.full().to_vec())
        })
        .unwrap()
        .per_device
    }

    #[test]
    fn test_spmv_single_device() {
        // 0 → 1, 0 → 2, 1 → 2
        let results = spmv_unit(&[(0, 1), (0, 2), (1, 2)], 1, &[1.0, 10.0, 100.0]);
        assert_eq!(results[0], vec![0.0, 1.0, 11.0]);
    }

    #[test]
    fn test_spmv_matches_across_device_counts() {
        let pairs = [(0, 1), (1, 2), (2, 3), (3, 0), (0, 2), (4, 1), (2, 4)];
        let x = [1.0, 2.0, 4.0, 8.0, 16.0];
        let expected = spmv_unit(&pairs, 1, &x).remove(0);

        for devices in 2..=4 {
            for full in spmv_unit(&pairs, devices, &x) {
                assert_eq!(full, expected, "{devices} devices");
            }
        }
    }

    #[test]
    fn test_spmv_rejects_misaligned_values() {
        let memory = Arc::new(DeviceMemory::new(2));
        let edges = EdgeList::from_pairs(&[(0, 1), (1, 0)], 2);
        let csr = PartitionedCsr::from_edge_columns(&memory, &edges.columns(), 2).unwrap();

        let err = launch(&DeviceTopology::new(2, 1), &memory, Backend::Host, 2, |ctx| {
            let shard = csr.shard(ctx.id()).unwrap().view();
            let values = vec![1.0; shard.num_edges() + usize::from(ctx.is_leader())];
            DistributedSpmv::new(ctx, csr.partition(), shard, &values).map(|_| ())
        })
        .unwrap_err();

        assert!(matches!(err, SnmgError::InvalidArgument(_)));
    }
}
