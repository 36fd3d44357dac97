//! Distributed `PageRank` solver
//!
//! Based on Page et al. (1999) "The `PageRank` Citation Ranking: Bringing Order to the Web"
//! and the SNMG power iteration of `cuGraph` (Bader et al., 2022).
//!
//! # States
//!
//! ```text
//! new() ──► Constructed ──setup(alpha)──► Ready ──solve(..)──► Ready
//!                │                          │
//!                └─ solve: NotSetUp         └─ setup: AlreadySetUp
//! ```
//!
//! Every method is collective: all workers call it in the same order with the
//! same arguments.

use super::blas;
use super::degree::compute_degrees;
use super::spmv::DistributedSpmv;
use crate::device::{DeviceBuffer, ExecutionContext};
use crate::error::{InvalidState, Result, SnmgError};
use crate::partition::PartitionOffsets;
use crate::storage::CsrView;
use crate::vector::DistributedVector;
use rayon::prelude::*;

/// Outcome of one `solve`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    /// Iterations performed
    pub iterations: usize,

    /// L1 distance between the last two L1-normalized iterates, if a
    /// tolerance was given
    pub residual: Option<f32>,
}

/// Buffers built by `setup`, immutable afterwards
#[derive(Debug)]
struct Prepared {
    alpha: f32,
    transition: DeviceBuffer<f32>,
    bookmark: DistributedVector<f32>,
    dangling: usize,
}

/// One worker's share of the distributed `PageRank` solver
#[derive(Debug)]
pub struct SnmgPageRank<'a, 'g> {
    ctx: &'a ExecutionContext<'g>,
    partition: &'a PartitionOffsets,
    csr: CsrView<'a>,
    prepared: Option<Prepared>,
}

impl<'a, 'g> SnmgPageRank<'a, 'g> {
    /// Bind the solver to this worker's shard (collective)
    ///
    /// No device memory is allocated until [`setup`](Self::setup).
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::InvalidArgument`] if the shard belongs to another
    /// device or its row count disagrees with the partition
    pub fn new(
        ctx: &'a ExecutionContext<'g>,
        partition: &'a PartitionOffsets,
        csr: CsrView<'a>,
    ) -> Result<Self> {
        let local = if csr.device() != ctx.id() {
            Err(SnmgError::invalid_argument(format!(
                "{} cannot run on the shard of {}",
                ctx.id(),
                csr.device()
            )))
        } else if partition.num_devices() != ctx.num_devices() {
            Err(SnmgError::invalid_argument(format!(
                "partition covers {} devices, group has {}",
                partition.num_devices(),
                ctx.num_devices()
            )))
        } else if csr.num_rows() != partition.local_len(ctx.id()) {
            Err(SnmgError::invalid_argument(format!(
                "{}: shard has {} rows, partition assigns {}",
                ctx.id(),
                csr.num_rows(),
                partition.local_len(ctx.id())
            )))
        } else {
            Ok(())
        };
        ctx.agree(local)?;

        Ok(Self {
            ctx,
            partition,
            csr,
            prepared: None,
        })
    }

    /// Whether [`setup`](Self::setup) has completed
    #[must_use]
    pub const fn is_set_up(&self) -> bool {
        self.prepared.is_some()
    }

    /// Local edge count
    #[must_use]
    pub fn local_edges(&self) -> usize {
        self.csr.num_edges()
    }

    /// Build the transition values and the dangling bookmark
    ///
    /// `alpha` is the damping factor, checked by the caller to lie in (0, 1).
    /// When `degrees_out` is given, it receives the global degree vector.
    /// The degree vector itself is freed before returning.
    ///
    /// # Errors
    ///
    /// - [`SnmgError::InvalidState`] if the solver is already set up; the
    ///   first setup stays in effect
    /// - [`SnmgError::AllocationFailure`] / [`SnmgError::CollectiveFailure`]
    ///   if a device runs out of memory; the solver stays unset
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    pub fn setup(&mut self, alpha: f32, degrees_out: Option<&mut Vec<u32>>) -> Result<()> {
        if self.prepared.is_some() {
            return Err(InvalidState::AlreadySetUp.into());
        }
        let ctx = self.ctx;

        let degrees = compute_degrees(ctx, self.partition, &self.csr)?;

        let mut bookmark = ctx.agree(DistributedVector::zeroed(ctx, self.partition))?;
        blas::fill(ctx, &mut bookmark, 0.0);
        let local_degrees = degrees.local();
        let local_bookmark = bookmark.local_mut();
        let dangling_local = ctx.install(|| {
            local_bookmark
                .par_iter_mut()
                .zip(local_degrees.par_iter())
                .filter(|(_, degree)| **degree == 0)
                .map(|(b, _)| *b = alpha)
                .count()
        });

        let mut transition = ctx.agree(ctx.alloc_zeroed::<f32>(self.csr.num_edges()))?;
        let (full_degrees, cols) = (degrees.full(), self.csr.col_indices());
        ctx.install(|| {
            transition
                .par_iter_mut()
                .zip(cols.par_iter())
                .for_each(|(t, &col)| *t = 1.0 / full_degrees[col as usize] as f32);
        });

        let dangling = ctx.reduce_scalar(dangling_local as f64)? as usize;
        if let Some(out) = degrees_out {
            out.clear();
            out.extend_from_slice(degrees.full());
        }
        drop(degrees);

        ctx.single(|| {
            log::info!(
                "PageRank setup: {} vertices, {} dangling, alpha {alpha}, partition {:?}",
                self.partition.num_vertices(),
                dangling,
                self.partition.as_slice()
            );
        })?;
        log::debug!("{}: {} local edges", ctx.id(), self.csr.num_edges());

        self.prepared = Some(Prepared {
            alpha,
            transition,
            bookmark,
            dangling,
        });
        Ok(())
    }

    /// Number of dangling vertices, once set up
    #[must_use]
    pub fn dangling_vertices(&self) -> Option<usize> {
        self.prepared.as_ref().map(|p| p.dangling)
    }

    /// Run exactly `max_iterations` power iterations into `pagerank`
    ///
    /// On return the owned segment of `pagerank` holds this device's part of
    /// the L1-normalized result.
    ///
    /// # Errors
    ///
    /// - [`SnmgError::InvalidState`] if called before [`setup`](Self::setup);
    ///   nothing is allocated
    /// - [`SnmgError::InvalidArgument`] if `pagerank` follows another partition
    ///   on this device, [`SnmgError::CollectiveFailure`] if it does on a peer
    /// - device failures as for [`DistributedSpmv`]
    pub fn solve(
        &mut self,
        max_iterations: usize,
        pagerank: &mut DistributedVector<f32>,
    ) -> Result<SolveStats> {
        self.solve_with_tolerance(max_iterations, None, pagerank)
    }

    /// Like [`solve`](Self::solve), stopping early once the L1 distance
    /// between successive normalized iterates drops to `tolerance` or below
    ///
    /// # Errors
    ///
    /// See [`solve`](Self::solve)
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn solve_with_tolerance(
        &mut self,
        max_iterations: usize,
        tolerance: Option<f32>,
        pagerank: &mut DistributedVector<f32>,
    ) -> Result<SolveStats> {
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(InvalidState::NotSetUp.into());
        };
        let ctx = self.ctx;
        let aligned = if pagerank.partition() == self.partition {
            Ok(())
        } else {
            Err(SnmgError::invalid_argument(format!(
                "{}: PageRank vector does not follow the solver's partition",
                ctx.id()
            )))
        };
        ctx.agree(aligned)?;

        let n = self.partition.num_vertices();
        if n == 0 {
            return Ok(SolveStats {
                iterations: 0,
                residual: None,
            });
        }
        let n_f32 = n as f32;

        let mut spmv = DistributedSpmv::new(ctx, self.partition, self.csr, &prepared.transition)?;
        let mut previous = match tolerance {
            Some(_) => Some(ctx.agree(DistributedVector::filled(
                ctx,
                self.partition,
                1.0 / n_f32,
            ))?),
            None => None,
        };

        blas::fill(ctx, pagerank, 1.0 / n_f32);
        let mut dot = blas::dot(ctx, &prepared.bookmark, pagerank)?;
        let mut residual = None;
        let mut iterations = 0;

        while iterations < max_iterations {
            spmv.run(ctx, pagerank)?;
            blas::scale(ctx, pagerank, prepared.alpha);
            blas::add_scalar(ctx, pagerank, (dot / n as f64) as f32);
            dot = blas::dot(ctx, &prepared.bookmark, pagerank)?;
            let norm2 = blas::norm2(ctx, pagerank)?;
            if norm2 > 0.0 {
                blas::scale(ctx, pagerank, (1.0 / norm2) as f32);
            }
            iterations += 1;

            if let (Some(previous), Some(tolerance)) = (previous.as_mut(), tolerance) {
                let delta = l1_delta(ctx, pagerank, previous)?;
                residual = Some(delta);
                ctx.single(|| log::debug!("iteration {iterations}: residual {delta:.3e}"))?;
                if delta <= tolerance {
                    break;
                }
            }
        }

        let norm1 = blas::norm1(ctx, pagerank)?;
        if norm1 > 0.0 {
            blas::scale(ctx, pagerank, (1.0 / norm1) as f32);
        }

        ctx.single(|| {
            log::info!(
                "PageRank solved: {iterations} iterations, residual {:?}",
                residual
            );
        })?;

        Ok(SolveStats {
            iterations,
            residual,
        })
    }
}

/// `||current / ||current||₁ - previous||₁`, then store the normalized
/// current iterate in `previous` (collective)
#[allow(clippy::cast_possible_truncation)]
fn l1_delta(
    ctx: &ExecutionContext<'_>,
    current: &DistributedVector<f32>,
    previous: &mut DistributedVector<f32>,
) -> Result<f32> {
    let norm1 = blas::norm1(ctx, current)?;
    let inv = if norm1 > 0.0 { 1.0 / norm1 } else { 1.0 };

    let (cur, prev) = (current.local(), previous.local_mut());
    let partial = ctx.install(|| {
        cur.par_iter()
            .zip(prev.par_iter_mut())
            .map(|(&c, p)| {
                let normalized = f64::from(c) * inv;
                let diff = (normalized - f64::from(*p)).abs();
                *p = normalized as f32;
                diff
            })
            .sum::<f64>()
    });
    Ok(ctx.reduce_scalar(partial)? as f32)
}
