//! Shared coordination slots and the per-worker execution context
//!
//! Workers never share mutable numeric state directly. The only shared values
//! are the fixed slots of a [`DeviceGroup`]:
//!
//! - a barrier all workers cross at every collective step
//! - the error status, guarded by a mutex
//! - one host staging slot per device for vector segments
//! - one scalar slot per device for reductions
//! - the leader's result slot
//!
//! Every collective is "publish, barrier, read, barrier": the trailing barrier
//! keeps a fast worker from overwriting its slot while a peer still reads it.
//!
//! A worker that leaves the computation early (error or panic) breaks the
//! barrier. Peers blocked in, or later entering, a collective then get
//! [`SnmgError::CollectiveFailure`] instead of waiting forever.

use super::{Backend, DeviceBuffer, DeviceId, DeviceMemory};
use crate::error::{Result, SnmgError};
use crate::partition::PartitionOffsets;
use std::ops::AddAssign;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

#[cfg(feature = "gpu")]
use super::GpuContext;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Reusable barrier that any party can break
#[derive(Debug)]
struct GroupBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl GroupBarrier {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    /// Block until all parties arrive; `false` if the barrier is broken first
    fn wait(&self) -> bool {
        let mut state = lock(&self.state);
        if state.broken {
            return false;
        }

        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return true;
        }

        let generation = state.generation;
        while state.generation == generation && !state.broken {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        // Released before the break: this crossing still counts
        state.generation != generation
    }

    fn break_all(&self) {
        lock(&self.state).broken = true;
        self.released.notify_all();
    }

    fn is_broken(&self) -> bool {
        lock(&self.state).broken
    }
}

/// Host staging slots, one per device
#[derive(Debug)]
pub struct Exchange<T> {
    slots: Vec<RwLock<Vec<T>>>,
}

impl<T: Copy> Exchange<T> {
    fn new(num_devices: usize) -> Self {
        Self {
            slots: (0..num_devices).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    fn publish(&self, device: DeviceId, data: &[T]) {
        let mut slot = self.slots[device.0]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        slot.clear();
        slot.extend_from_slice(data);
    }

    fn read<R>(&self, device: DeviceId, f: impl FnOnce(&[T]) -> R) -> R {
        let slot = self.slots[device.0]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&slot)
    }
}

/// Element types that can travel through the staging slots
pub trait Exchangeable: Copy + Default + Send + Sync + 'static {
    /// The group's slots for this element type
    fn exchange(group: &DeviceGroup) -> &Exchange<Self>;
}

impl Exchangeable for f32 {
    fn exchange(group: &DeviceGroup) -> &Exchange<Self> {
        &group.vertex_slots
    }
}

impl Exchangeable for u32 {
    fn exchange(group: &DeviceGroup) -> &Exchange<Self> {
        &group.degree_slots
    }
}

/// Slots shared by all workers of one computation
#[derive(Debug)]
pub struct DeviceGroup {
    num_devices: usize,
    barrier: GroupBarrier,
    status: Mutex<Option<SnmgError>>,
    vertex_slots: Exchange<f32>,
    degree_slots: Exchange<u32>,
    scalar_slots: Mutex<Vec<f64>>,
    result: Mutex<Option<Vec<f32>>>,
}

impl DeviceGroup {
    /// Slots for `num_devices` workers
    #[must_use]
    pub fn new(num_devices: usize) -> Self {
        Self {
            num_devices,
            barrier: GroupBarrier::new(num_devices),
            status: Mutex::new(None),
            vertex_slots: Exchange::new(num_devices),
            degree_slots: Exchange::new(num_devices),
            scalar_slots: Mutex::new(vec![0.0; num_devices]),
            result: Mutex::new(None),
        }
    }

    /// Number of workers
    #[must_use]
    pub const fn num_devices(&self) -> usize {
        self.num_devices
    }

    /// First failure recorded by any worker
    #[must_use]
    pub fn status(&self) -> Option<SnmgError> {
        lock(&self.status).clone()
    }

    /// Take the vector published by the leader
    pub fn take_result(&self) -> Option<Vec<f32>> {
        lock(&self.result).take()
    }

    /// Whether a worker has left the group early
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.barrier.is_broken()
    }

    /// Cross the group barrier
    ///
    /// # Errors
    ///
    /// Returns the recorded [`SnmgError::CollectiveFailure`] if the barrier
    /// was broken by [`abort`](Self::abort)
    pub(crate) fn wait(&self, device: DeviceId) -> Result<()> {
        if self.barrier.wait() {
            return Ok(());
        }
        Err(self.status().unwrap_or_else(|| SnmgError::CollectiveFailure {
            device,
            reason: "worker group aborted".to_string(),
        }))
    }

    fn record_failure(&self, device: DeviceId, reason: String) {
        let mut status = lock(&self.status);
        if status.is_none() {
            log::warn!("{device} failed: {reason}");
            *status = Some(SnmgError::CollectiveFailure { device, reason });
        }
    }

    /// Record a failure of `device` and release every peer blocked at, or
    /// later reaching, the barrier
    pub fn abort(&self, device: DeviceId, reason: impl Into<String>) {
        self.record_failure(device, reason.into());
        self.barrier.break_all();
    }

    /// Collective agreement on a local outcome
    ///
    /// Every worker must call this at the same point. A worker that failed
    /// gets its own error back; all others get
    /// [`SnmgError::CollectiveFailure`] naming the first failing device.
    ///
    /// # Errors
    ///
    /// Returns an error if any worker passed an error
    pub fn agree<T>(&self, device: DeviceId, local: Result<T>) -> Result<T> {
        if let Err(err) = &local {
            self.record_failure(device, err.to_string());
        }
        let status = self.wait(device).and_then(|()| {
            let status = self.status();
            self.wait(device).map(|()| status)
        });

        match (local, status) {
            (Err(err), _) | (Ok(_), Err(err) | Ok(Some(err))) => Err(err),
            (Ok(value), Ok(None)) => Ok(value),
        }
    }
}

/// One worker's view of its device and of the group
///
/// A context is created on the worker thread and lives for the whole
/// computation. Collective methods must be called by every worker in the same
/// order.
pub struct ExecutionContext<'g> {
    id: DeviceId,
    group: &'g DeviceGroup,
    memory: Arc<DeviceMemory>,
    lanes: rayon::ThreadPool,
    #[cfg(feature = "gpu")]
    gpu: Option<GpuContext>,
}

impl<'g> ExecutionContext<'g> {
    /// Bind the calling thread to `device`
    ///
    /// Builds the device's lane pool and, for [`Backend::Wgpu`], binds the
    /// adapter with the same index.
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::DeviceBinding`] if the lane pool or the adapter
    /// cannot be set up
    pub fn bind(
        group: &'g DeviceGroup,
        device: DeviceId,
        memory: Arc<DeviceMemory>,
        lanes: usize,
        backend: Backend,
    ) -> Result<Self> {
        if device.0 >= group.num_devices() {
            return Err(SnmgError::DeviceBinding {
                device,
                reason: format!("group has {} devices", group.num_devices()),
            });
        }

        let index = device.0;
        let lanes = rayon::ThreadPoolBuilder::new()
            .num_threads(lanes.max(1))
            .thread_name(move |lane| format!("snmg-device-{index}-lane-{lane}"))
            .build()
            .map_err(|e| SnmgError::DeviceBinding {
                device,
                reason: e.to_string(),
            })?;

        #[cfg(feature = "gpu")]
        let gpu = match backend {
            Backend::Wgpu => Some(GpuContext::bind(device)?),
            Backend::Host => None,
        };
        #[cfg(not(feature = "gpu"))]
        let Backend::Host = backend;

        log::debug!(
            "{device} bound ({} lanes, {backend:?} backend)",
            lanes.current_num_threads()
        );

        Ok(Self {
            id: device,
            group,
            memory,
            lanes,
            #[cfg(feature = "gpu")]
            gpu,
        })
    }

    /// Logical worker id (the device it is bound to)
    #[must_use]
    pub const fn id(&self) -> DeviceId {
        self.id
    }

    /// Total worker count
    #[must_use]
    pub const fn num_devices(&self) -> usize {
        self.group.num_devices()
    }

    /// Device-local lane count
    #[must_use]
    pub fn lanes(&self) -> usize {
        self.lanes.current_num_threads()
    }

    /// Whether this worker is the leader (device 0)
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.id.0 == 0
    }

    /// Device memory arenas
    #[must_use]
    pub const fn memory(&self) -> &Arc<DeviceMemory> {
        &self.memory
    }

    /// Bound wgpu adapter, if the backend is [`Backend::Wgpu`]
    #[cfg(feature = "gpu")]
    #[must_use]
    pub const fn gpu(&self) -> Option<&GpuContext> {
        self.gpu.as_ref()
    }

    /// Run `f` on this device's lanes
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.lanes.install(f)
    }

    /// Allocate `len` zeroed elements on this device
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::AllocationFailure`] if the device arena is full
    pub fn alloc_zeroed<T: Default>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        DeviceBuffer::zeroed(&self.memory, self.id, len)
    }

    /// Wait until every worker reaches this point
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::CollectiveFailure`] if a peer left the group
    pub fn barrier(&self) -> Result<()> {
        self.group.wait(self.id)
    }

    /// Run `f` on the leader only, then synchronize
    ///
    /// Non-leaders wait at the barrier while the leader works.
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::CollectiveFailure`] if a peer left the group
    pub fn single<R>(&self, f: impl FnOnce() -> R) -> Result<Option<R>> {
        let result = self.is_leader().then(f);
        self.barrier()?;
        Ok(result)
    }

    /// Run `f` with exclusive access to the shared error status
    pub fn critical<R>(&self, f: impl FnOnce(&mut Option<SnmgError>) -> R) -> R {
        f(&mut lock(&self.group.status))
    }

    /// See [`DeviceGroup::agree`]
    ///
    /// # Errors
    ///
    /// Returns an error if any worker passed an error
    pub fn agree<T>(&self, local: Result<T>) -> Result<T> {
        self.group.agree(self.id, local)
    }

    /// Publish the final vector (leader only)
    pub fn publish_result(&self, scores: Vec<f32>) {
        *lock(&self.group.result) = Some(scores);
    }

    /// Every device obtains every other device's segment of `full`
    ///
    /// `full` is global-length; this device's segment is the one it owns in
    /// `partition`, every other segment is overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::CollectiveFailure`] if a peer left the group
    pub fn all_gather<T: Exchangeable>(
        &self,
        partition: &PartitionOffsets,
        full: &mut [T],
    ) -> Result<()> {
        let exchange = T::exchange(self.group);
        exchange.publish(self.id, &full[partition.range(self.id)]);
        self.barrier()?;

        for peer in (0..self.num_devices()).map(DeviceId) {
            if peer != self.id {
                exchange.read(peer, |segment| {
                    full[partition.range(peer)].copy_from_slice(segment);
                });
            }
        }
        self.barrier()
    }

    /// Sum the global-length partials of all devices into this device's
    /// owned segment of `partial`
    ///
    /// Segments not owned by this device are left as they were. Summation
    /// runs in device order, so every device would compute the same value.
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::CollectiveFailure`] if a peer left the group
    pub fn reduce_scatter_sum<T>(
        &self,
        partition: &PartitionOffsets,
        partial: &mut [T],
    ) -> Result<()>
    where
        T: Exchangeable + AddAssign,
    {
        let exchange = T::exchange(self.group);
        exchange.publish(self.id, partial);
        self.barrier()?;

        let own = partition.range(self.id);
        let mut summed = vec![T::default(); own.len()];
        for peer in (0..self.num_devices()).map(DeviceId) {
            exchange.read(peer, |peer_partial| {
                for (acc, &v) in summed.iter_mut().zip(&peer_partial[own.clone()]) {
                    *acc += v;
                }
            });
        }
        partial[own].copy_from_slice(&summed);
        self.barrier()
    }

    /// Element-wise sum of all devices' partials, replicated on every device
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::CollectiveFailure`] if a peer left the group
    pub fn all_reduce_sum<T>(
        &self,
        partition: &PartitionOffsets,
        partial: &mut [T],
    ) -> Result<()>
    where
        T: Exchangeable + AddAssign,
    {
        self.reduce_scatter_sum(partition, partial)?;
        self.all_gather(partition, partial)
    }

    /// Sum one scalar per device; every device gets the same total
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::CollectiveFailure`] if a peer left the group
    pub fn reduce_scalar(&self, partial: f64) -> Result<f64> {
        lock(&self.group.scalar_slots)[self.id.0] = partial;
        self.barrier()?;
        let total = lock(&self.group.scalar_slots).iter().sum();
        self.barrier()?;
        Ok(total)
    }
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("num_devices", &self.num_devices())
            .field("lanes", &self.lanes())
            .finish_non_exhaustive()
    }
}
