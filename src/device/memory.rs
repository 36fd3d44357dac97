//! Device memory accounting
//!
//! Every device has an arena with an optional byte capacity. Buffers reserve
//! their bytes on construction and release them exactly once on drop, so the
//! arena counters double as a leak detector in tests.

use super::DeviceId;
use crate::error::{Result, SnmgError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Arena {
    capacity: Option<usize>,
    used: AtomicUsize,
    live: AtomicUsize,
}

impl Arena {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }
}

/// Per-device memory arenas
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use snmg_pagerank::device::{DeviceBuffer, DeviceId, DeviceMemory};
///
/// let memory = Arc::new(DeviceMemory::with_capacity(2, 64));
/// let buffer = DeviceBuffer::<f32>::zeroed(&memory, DeviceId(1), 8).unwrap();
/// assert_eq!(memory.allocated_bytes(DeviceId(1)), 32);
///
/// // 64 bytes per device: 16 more floats do not fit next to the first 8
/// assert!(DeviceBuffer::<f32>::zeroed(&memory, DeviceId(1), 16).is_err());
///
/// drop(buffer);
/// assert_eq!(memory.allocated_bytes(DeviceId(1)), 0);
/// ```
#[derive(Debug)]
pub struct DeviceMemory {
    arenas: Vec<Arena>,
    total_allocations: AtomicUsize,
}

impl DeviceMemory {
    /// Unbounded arenas for `num_devices` devices
    #[must_use]
    pub fn new(num_devices: usize) -> Self {
        Self {
            arenas: (0..num_devices).map(|_| Arena::new(None)).collect(),
            total_allocations: AtomicUsize::new(0),
        }
    }

    /// Arenas holding at most `bytes_per_device` bytes each
    #[must_use]
    pub fn with_capacity(num_devices: usize, bytes_per_device: usize) -> Self {
        Self {
            arenas: (0..num_devices)
                .map(|_| Arena::new(Some(bytes_per_device)))
                .collect(),
            total_allocations: AtomicUsize::new(0),
        }
    }

    /// Number of device arenas
    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.arenas.len()
    }

    /// Capacity of a device arena (`None` = unbounded)
    #[must_use]
    pub fn capacity(&self, device: DeviceId) -> Option<usize> {
        self.arenas.get(device.0).and_then(|a| a.capacity)
    }

    /// Bytes currently held by live buffers on `device`
    #[must_use]
    pub fn allocated_bytes(&self, device: DeviceId) -> usize {
        self.arenas
            .get(device.0)
            .map_or(0, |a| a.used.load(Ordering::Acquire))
    }

    /// Number of live buffers on `device`
    #[must_use]
    pub fn live_allocations(&self, device: DeviceId) -> usize {
        self.arenas
            .get(device.0)
            .map_or(0, |a| a.live.load(Ordering::Acquire))
    }

    /// Successful allocations since this memory was created, on all devices
    #[must_use]
    pub fn total_allocations(&self) -> usize {
        self.total_allocations.load(Ordering::Acquire)
    }

    fn reserve(&self, device: DeviceId, bytes: usize) -> Result<()> {
        let arena = self.arenas.get(device.0).ok_or_else(|| {
            SnmgError::invalid_argument(format!(
                "{device} has no memory arena ({} devices)",
                self.arenas.len()
            ))
        })?;

        arena
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.checked_add(bytes)?;
                match arena.capacity {
                    Some(capacity) if next > capacity => None,
                    _ => Some(next),
                }
            })
            .map_err(|used| SnmgError::AllocationFailure {
                device,
                requested: bytes,
                available: arena
                    .capacity
                    .map_or(usize::MAX - used, |c| c.saturating_sub(used)),
            })?;

        arena.live.fetch_add(1, Ordering::AcqRel);
        self.total_allocations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release(&self, device: DeviceId, bytes: usize) {
        if let Some(arena) = self.arenas.get(device.0) {
            arena.used.fetch_sub(bytes, Ordering::AcqRel);
            arena.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Owning buffer resident on one device
///
/// Dereferences to a slice. The bytes return to the device arena when the
/// buffer is dropped.
pub struct DeviceBuffer<T> {
    device: DeviceId,
    data: Vec<T>,
    memory: Arc<DeviceMemory>,
}

impl<T> DeviceBuffer<T> {
    const fn bytes_for(len: usize) -> usize {
        len.saturating_mul(std::mem::size_of::<T>())
    }

    /// Allocate `len` elements produced by `init(index)`
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::AllocationFailure`] if the device arena is full
    pub fn from_fn(
        memory: &Arc<DeviceMemory>,
        device: DeviceId,
        len: usize,
        init: impl FnMut(usize) -> T,
    ) -> Result<Self> {
        memory.reserve(device, Self::bytes_for(len))?;
        Ok(Self {
            device,
            data: (0..len).map(init).collect(),
            memory: Arc::clone(memory),
        })
    }

    /// Allocate `len` elements set to `T::default()` (zero for numbers)
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::AllocationFailure`] if the device arena is full
    pub fn zeroed(memory: &Arc<DeviceMemory>, device: DeviceId, len: usize) -> Result<Self>
    where
        T: Default,
    {
        Self::from_fn(memory, device, len, |_| T::default())
    }

    /// Allocate `len` copies of `value`
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::AllocationFailure`] if the device arena is full
    pub fn filled(memory: &Arc<DeviceMemory>, device: DeviceId, len: usize, value: T) -> Result<Self>
    where
        T: Clone,
    {
        memory.reserve(device, Self::bytes_for(len))?;
        Ok(Self {
            device,
            data: vec![value; len],
            memory: Arc::clone(memory),
        })
    }

    /// Upload a host slice
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::AllocationFailure`] if the device arena is full
    pub fn from_slice(memory: &Arc<DeviceMemory>, device: DeviceId, src: &[T]) -> Result<Self>
    where
        T: Clone,
    {
        memory.reserve(device, Self::bytes_for(src.len()))?;
        Ok(Self {
            device,
            data: src.to_vec(),
            memory: Arc::clone(memory),
        })
    }

    /// Device holding this buffer
    #[must_use]
    pub const fn device(&self) -> DeviceId {
        self.device
    }

    /// Size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        Self::bytes_for(self.data.len())
    }

    /// Copy back to host memory
    #[must_use]
    pub fn to_host(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.clone()
    }
}

impl<T> std::ops::Deref for DeviceBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> std::ops::DerefMut for DeviceBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.memory
            .release(self.device, Self::bytes_for(self.data.len()));
    }
}

impl<T> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device)
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_allocation_accounting() {
        let memory = Arc::new(DeviceMemory::new(2));
        let a = DeviceBuffer::<u32>::zeroed(&memory, DeviceId(0), 10).unwrap();
        let b = DeviceBuffer::filled(&memory, DeviceId(1), 4, 1.5_f32).unwrap();

        assert_eq!(memory.allocated_bytes(DeviceId(0)), 40);
        assert_eq!(memory.allocated_bytes(DeviceId(1)), 16);
        assert_eq!(memory.live_allocations(DeviceId(0)), 1);
        assert_eq!(memory.total_allocations(), 2);
        assert_eq!(&b[..], &[1.5, 1.5, 1.5, 1.5]);
        assert!(a.iter().all(|&v| v == 0));

        drop(a);
        drop(b);
        assert_eq!(memory.allocated_bytes(DeviceId(0)), 0);
        assert_eq!(memory.live_allocations(DeviceId(1)), 0);
        assert_eq!(memory.total_allocations(), 2);
    }

    #[test]
    fn test_capacity_exceeded() {
        let memory = Arc::new(DeviceMemory::with_capacity(1, 16));
        let _held = DeviceBuffer::<f32>::zeroed(&memory, DeviceId(0), 3).unwrap();

        let err = DeviceBuffer::<f32>::zeroed(&memory, DeviceId(0), 2).unwrap_err();
        assert_eq!(
            err,
            SnmgError::AllocationFailure {
                device: DeviceId(0),
                requested: 8,
                available: 4,
            }
        );
        // Failed allocation leaves the arena untouched
        assert_eq!(memory.allocated_bytes(DeviceId(0)), 12);
        assert_eq!(memory.live_allocations(DeviceId(0)), 1);
    }

    #[test]
    fn test_unknown_device() {
        let memory = Arc::new(DeviceMemory::new(1));
        let err = DeviceBuffer::<f32>::zeroed(&memory, DeviceId(3), 1).unwrap_err();
        assert!(matches!(err, SnmgError::InvalidArgument(_)));
        assert_eq!(memory.allocated_bytes(DeviceId(3)), 0);
    }

    #[test]
    fn test_from_slice_and_mutation() {
        let memory = Arc::new(DeviceMemory::new(1));
        let mut buffer = DeviceBuffer::from_slice(&memory, DeviceId(0), &[1_u32, 2, 3]).unwrap();
        buffer[1] = 7;
        assert_eq!(buffer.to_host(), vec![1, 7, 3]);
        assert_eq!(buffer.size_bytes(), 12);
        assert_eq!(buffer.device(), DeviceId(0));
    }

    #[test]
    fn test_from_fn() {
        let memory = Arc::new(DeviceMemory::new(1));
        let buffer = DeviceBuffer::from_fn(&memory, DeviceId(0), 4, |i| i * 2).unwrap();
        assert_eq!(&buffer[..], &[0, 2, 4, 6]);
    }
}
