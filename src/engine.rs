//! Engine entry point: edge columns in, one score per vertex out
//!
//! ```text
//! validate ─► coo2csr (caller thread) ─► launch one worker per device
//!                                          ├─ SnmgPageRank::new
//!                                          ├─ setup(alpha)
//!                                          ├─ solve(max_iterations)
//!                                          └─ gather, leader publishes
//! ```

use crate::algorithms::SnmgPageRank;
use crate::config::PageRankConfig;
use crate::device::{launch, DeviceId, DeviceMemory, DeviceTopology};
use crate::error::{Result, SnmgError};
use crate::storage::{EdgeColumns, PartitionedCsr};
use crate::vector::DistributedVector;
use std::sync::Arc;

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct PageRankOutput {
    /// Score per vertex, indexed by global vertex id, summing to 1
    pub scores: Vec<f32>,

    /// Iterations performed
    pub iterations: usize,

    /// Last L1 residual, when a tolerance was configured
    pub residual: Option<f32>,
}

impl PageRankOutput {
    /// Get the score of a specific vertex
    #[must_use]
    pub fn score(&self, vertex: usize) -> Option<f32> {
        self.scores.get(vertex).copied()
    }
}

/// Devices plus their memory, reusable across runs
///
/// # Example
///
/// ```
/// use snmg_pagerank::{EdgeColumns, PageRankConfig, SnmgEngine};
/// use snmg_pagerank::device::DeviceTopology;
///
/// let engine = SnmgEngine::new(DeviceTopology::new(2, 1));
/// let (src, dst) = ([0, 1, 2, 3], [1, 2, 3, 0]);
/// let (s0, s1) = src.split_at(2);
/// let (d0, d1) = dst.split_at(2);
///
/// let mut config = PageRankConfig::default();
/// config.num_devices(2);
/// let output = engine
///     .pagerank(&EdgeColumns::new(vec![s0, s1], vec![d0, d1]), &config)
///     .unwrap();
///
/// assert_eq!(output.scores.len(), 4);
/// assert!((output.scores.iter().sum::<f32>() - 1.0).abs() < 1e-5);
/// ```
#[derive(Debug, Clone)]
pub struct SnmgEngine {
    topology: DeviceTopology,
    memory: Arc<DeviceMemory>,
}

impl SnmgEngine {
    /// Engine over `topology` with unbounded device memory
    #[must_use]
    pub fn new(topology: DeviceTopology) -> Self {
        Self {
            memory: Arc::new(DeviceMemory::new(topology.devices)),
            topology,
        }
    }

    /// One emulated device per CPU core
    #[must_use]
    pub fn host() -> Self {
        Self::new(DeviceTopology::host())
    }

    /// Engine sharing caller-provided memory arenas
    #[must_use]
    pub fn with_memory(topology: DeviceTopology, memory: Arc<DeviceMemory>) -> Self {
        Self { topology, memory }
    }

    /// Available devices
    #[must_use]
    pub const fn topology(&self) -> &DeviceTopology {
        &self.topology
    }

    /// Device memory arenas
    #[must_use]
    pub const fn memory(&self) -> &Arc<DeviceMemory> {
        &self.memory
    }

    /// Devices usable by a run: bounded by both topology and arenas
    #[must_use]
    pub fn available_devices(&self) -> usize {
        self.topology.devices.min(self.memory.num_devices())
    }

    /// Compute `PageRank` over per-device edge columns
    ///
    /// All argument checks run before anything is allocated. Device failures
    /// on any worker abort the whole run; no partial result is returned and
    /// every device buffer is released.
    ///
    /// # Errors
    ///
    /// - [`SnmgError::InvalidArgument`] for a bad configuration, column count
    ///   or vertex id
    /// - [`SnmgError::ColumnSizeMismatch`] if a device's columns differ in
    ///   length
    /// - [`SnmgError::AllocationFailure`], [`SnmgError::DeviceBinding`],
    ///   [`SnmgError::KernelFailure`] or [`SnmgError::CollectiveFailure`]
    ///   from the workers
    pub fn pagerank(
        &self,
        edges: &EdgeColumns<'_>,
        config: &PageRankConfig,
    ) -> Result<PageRankOutput> {
        config.validate(self.available_devices())?;
        edges.validate(config.num_devices)?;

        let num_devices = config.num_devices;
        let csr = PartitionedCsr::from_edge_columns(&self.memory, edges, num_devices)?;
        log::info!(
            "PageRank: {} vertices, {} edges on {num_devices} devices",
            csr.num_vertices(),
            csr.num_edges()
        );

        let launched = launch(
            &self.topology,
            &self.memory,
            config.backend,
            num_devices,
            |ctx| {
                let shard = csr
                    .shard(ctx.id())
                    .map(|shard| shard.view())
                    .ok_or_else(|| {
                        SnmgError::invalid_argument(format!("no shard for {}", ctx.id()))
                    });
                let shard = ctx.agree(shard)?;

                let mut solver = SnmgPageRank::new(ctx, csr.partition(), shard)?;
                let mut pagerank = ctx.agree(DistributedVector::zeroed(ctx, csr.partition()))?;

                solver.setup(config.damping_factor, None)?;
                let stats = solver.solve_with_tolerance(
                    config.max_iterations,
                    config.tolerance,
                    &mut pagerank,
                )?;

                pagerank.gather_full(ctx)?;
                ctx.single(|| ctx.publish_result(pagerank.full().to_vec()))?;
                Ok(stats)
            },
        )?;

        let scores = launched
            .published
            .ok_or_else(|| SnmgError::CollectiveFailure {
                device: DeviceId(0),
                reason: "leader did not publish a result".to_string(),
            })?;
        let stats = launched.per_device[0];

        Ok(PageRankOutput {
            scores,
            iterations: stats.iterations,
            residual: stats.residual,
        })
    }
}

impl Default for SnmgEngine {
    fn default() -> Self {
        Self::host()
    }
}

/// [`SnmgEngine::pagerank`] on a default host engine
///
/// # Errors
///
/// See [`SnmgEngine::pagerank`]
pub fn pagerank(edges: &EdgeColumns<'_>, config: &PageRankConfig) -> Result<PageRankOutput> {
    SnmgEngine::host().pagerank(edges, config)
}
