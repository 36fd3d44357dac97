//! Devices, device memory and the worker execution model
//!
//! Based on the thread-per-GPU execution model of `cuGraph` SNMG analytics
//! (Bader et al., 2022): one long-lived worker per accelerator, launched at
//! the start of a computation and joined at its end.
//!
//! # Architecture
//!
//! - `memory`: per-device allocation accounting and owning [`DeviceBuffer`]s
//! - `context`: the shared [`DeviceGroup`] slots and the per-worker
//!   [`ExecutionContext`] (barrier, leader block, collectives)
//! - `pool`: fork-join launch of exactly one worker per device
//! - `gpu`: wgpu adapter binding and the WGSL SpMV kernel (`gpu` feature)

mod context;
mod memory;
mod pool;

#[cfg(feature = "gpu")]
mod gpu;

pub use context::{DeviceGroup, Exchange, Exchangeable, ExecutionContext};
pub use memory::{DeviceBuffer, DeviceMemory};
pub use pool::{launch, Launched};

#[cfg(feature = "gpu")]
pub use gpu::{GpuContext, GpuDevice, GpuDeviceError, GpuSpmvKernel};

/// Logical accelerator identifier (zero-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device {}", self.0)
    }
}

/// Where the local sparse multiply runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Emulated device: a worker thread plus a private lane pool
    #[default]
    Host,
    /// wgpu compute shader on the adapter with the worker's index
    #[cfg(feature = "gpu")]
    Wgpu,
}

/// Devices available to a computation
///
/// # Example
///
/// ```
/// use snmg_pagerank::device::DeviceTopology;
///
/// let topology = DeviceTopology::new(4, 2);
/// assert_eq!(topology.devices, 4);
/// assert_eq!(topology.lanes_per_device, 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTopology {
    /// Number of devices a computation may use
    pub devices: usize,

    /// Parallel lanes (threads) per device
    pub lanes_per_device: usize,
}

impl DeviceTopology {
    /// Topology with an explicit device and lane count (both clamped to >= 1)
    #[must_use]
    pub fn new(devices: usize, lanes_per_device: usize) -> Self {
        Self {
            devices: devices.max(1),
            lanes_per_device: lanes_per_device.max(1),
        }
    }

    /// One emulated device per CPU core, one lane each
    #[must_use]
    pub fn host() -> Self {
        Self::new(num_cpus::get(), 1)
    }

    /// One device per wgpu adapter found on this machine
    ///
    /// Lanes are the host threads that run the non-SpMV vector primitives.
    #[cfg(feature = "gpu")]
    #[must_use]
    pub fn detect_gpus() -> Self {
        let adapters = GpuDevice::available_count();
        Self {
            devices: adapters,
            lanes_per_device: (num_cpus::get() / adapters.max(1)).max(1),
        }
    }
}

impl Default for DeviceTopology {
    fn default() -> Self {
        Self::host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId(3).to_string(), "device 3");
    }

    #[test]
    fn test_topology_clamps_to_one() {
        let topology = DeviceTopology::new(0, 0);
        assert_eq!(topology.devices, 1);
        assert_eq!(topology.lanes_per_device, 1);
    }

    #[test]
    fn test_host_topology_has_devices() {
        let topology = DeviceTopology::host();
        assert!(topology.devices >= 1);
        assert_eq!(topology.lanes_per_device, 1);
    }
}
