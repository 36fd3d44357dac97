//! wgpu adapter binding and the CSR SpMV compute kernel
//!
//! Each worker binds the adapter whose enumeration index equals its
//! [`DeviceId`]. Only the sparse multiply runs on the adapter; vector
//! primitives stay on the worker's host lanes.

use super::DeviceId;
use crate::error::{Result, SnmgError};
use std::future::Future;
use thiserror::Error;
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u32 = 256;
const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

/// GPU device initialization errors
#[derive(Debug, Error)]
pub enum GpuDeviceError {
    /// No adapter with the requested index
    #[error("No GPU adapter with index {index} ({available} found)")]
    NoAdapter {
        /// Requested adapter index
        index: usize,
        /// Adapters found on this machine
        available: usize,
    },

    /// Failed to request GPU device
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(String),

    /// Buffer readback failed
    #[error("GPU readback failed: {0}")]
    Readback(String),
}

/// GPU device wrapper: one adapter with its logical device and queue
#[derive(Debug)]
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
}

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

impl GpuDevice {
    /// Number of adapters wgpu can enumerate
    #[must_use]
    pub fn available_count() -> usize {
        instance().enumerate_adapters(wgpu::Backends::all()).len()
    }

    /// Open the adapter with enumeration index `index`
    ///
    /// # Errors
    ///
    /// Returns `GpuDeviceError` if:
    /// - there is no adapter with that index
    /// - device request fails
    pub async fn bind(index: usize) -> std::result::Result<Self, GpuDeviceError> {
        let mut adapters = instance().enumerate_adapters(wgpu::Backends::all());
        let available = adapters.len();
        if index >= available {
            return Err(GpuDeviceError::NoAdapter { index, available });
        }
        let adapter = adapters.swap_remove(index);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("snmg-pagerank device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuDeviceError::DeviceRequest(e.to_string()))?;

        Ok(Self {
            device,
            queue,
            adapter,
        })
    }

    /// Get adapter info (GPU name, backend, etc.)
    #[must_use]
    pub fn info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Create GPU buffer with initial data
    #[must_use]
    pub fn create_buffer_init(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
    }

    /// Create empty GPU buffer
    #[must_use]
    pub fn create_buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Get device reference
    #[must_use]
    pub const fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get queue reference
    #[must_use]
    pub const fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// A worker's bound adapter plus the runtime that drives its futures
pub struct GpuContext {
    runtime: tokio::runtime::Runtime,
    device: GpuDevice,
}

impl GpuContext {
    /// Bind the adapter for `device`
    ///
    /// # Errors
    ///
    /// Returns [`SnmgError::DeviceBinding`] if the runtime cannot be built or
    /// the adapter cannot be opened
    pub fn bind(device: DeviceId) -> Result<Self> {
        let binding = |reason: String| SnmgError::DeviceBinding { device, reason };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| binding(e.to_string()))?;
        let gpu = runtime
            .block_on(GpuDevice::bind(device.0))
            .map_err(|e| binding(e.to_string()))?;

        log::info!("{device} bound to adapter {:?}", gpu.info().name);
        Ok(Self {
            runtime,
            device: gpu,
        })
    }

    /// The bound adapter
    #[must_use]
    pub const fn device(&self) -> &GpuDevice {
        &self.device
    }

    /// Drive a future to completion on this worker's thread
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.device.info().name)
            .finish_non_exhaustive()
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SpmvParams {
    num_rows: u32,
    row_stride: u32,
    _padding: [u32; 2],
}

/// wgpu bindings cannot be zero-sized
fn padded<T: bytemuck::Pod + Default>(data: &[T]) -> Vec<T> {
    if data.is_empty() {
        vec![T::default()]
    } else {
        data.to_vec()
    }
}

/// Resident CSR shard plus the pipeline that multiplies it
///
/// Row offsets are local to the shard; column indices are global, so `x`
/// must be the full-length gathered vector.
#[derive(Debug)]
pub struct GpuSpmvKernel {
    num_rows: usize,
    num_cols: usize,
    grid: (u32, u32),
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    x: wgpu::Buffer,
    y: wgpu::Buffer,
    staging: wgpu::Buffer,
}

impl GpuSpmvKernel {
    /// Upload a shard and build the pipeline
    #[allow(clippy::too_many_lines)]
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn new(
        gpu: &GpuDevice,
        row_offsets: &[u32],
        col_indices: &[u32],
        values: &[f32],
        num_cols: usize,
    ) -> Self {
        const SHADER: &str = include_str!("shaders/spmv.wgsl");
        let shader_module = gpu
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("SpMV Shader"),
                source: wgpu::ShaderSource::Wgsl(SHADER.into()),
            });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout =
            gpu.device()
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("SpMV Bind Group Layout"),
                    entries: &[
                        // @binding(0): uniform params
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        storage(1, true),  // row_offsets
                        storage(2, true),  // col_indices
                        storage(3, true),  // values
                        storage(4, true),  // x
                        storage(5, false), // y
                    ],
                });

        let pipeline_layout = gpu
            .device()
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("SpMV Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = gpu
            .device()
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("SpMV Pipeline"),
                layout: Some(&pipeline_layout),
                module: &shader_module,
                entry_point: "spmv",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        let num_rows = row_offsets.len().saturating_sub(1);
        let groups = (num_rows as u32).div_ceil(WORKGROUP_SIZE).max(1);
        let grid_x = groups.min(MAX_WORKGROUPS_PER_DIM);
        let grid = (grid_x, groups.div_ceil(grid_x));

        let params = gpu.create_buffer_init(
            "SpMV Params",
            bytemuck::bytes_of(&SpmvParams {
                num_rows: num_rows as u32,
                row_stride: grid_x * WORKGROUP_SIZE,
                _padding: [0; 2],
            }),
            wgpu::BufferUsages::UNIFORM,
        );
        let row_offsets = gpu.create_buffer_init(
            "SpMV row_offsets",
            bytemuck::cast_slice(&padded(row_offsets)),
            wgpu::BufferUsages::STORAGE,
        );
        let col_indices = gpu.create_buffer_init(
            "SpMV col_indices",
            bytemuck::cast_slice(&padded(col_indices)),
            wgpu::BufferUsages::STORAGE,
        );
        let values = gpu.create_buffer_init(
            "SpMV values",
            bytemuck::cast_slice(&padded(values)),
            wgpu::BufferUsages::STORAGE,
        );

        let x_bytes = (num_cols.max(1) * std::mem::size_of::<f32>()) as u64;
        let y_bytes = (num_rows.max(1) * std::mem::size_of::<f32>()) as u64;
        let x = gpu.create_buffer(
            "SpMV x",
            x_bytes,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let y = gpu.create_buffer(
            "SpMV y",
            y_bytes,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let staging = gpu.create_buffer(
            "SpMV Staging",
            y_bytes,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );

        let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SpMV Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: row_offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: col_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: values.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: x.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: y.as_entire_binding(),
                },
            ],
        });

        Self {
            num_rows,
            num_cols,
            grid,
            pipeline,
            bind_group,
            x,
            y,
            staging,
        }
    }

    /// Number of local rows
    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// `y = A * x` for the resident shard
    ///
    /// # Errors
    ///
    /// Returns [`GpuDeviceError::Readback`] if `x` or `y` have the wrong
    /// length or the result cannot be mapped
    #[allow(clippy::cast_possible_truncation)]
    pub async fn multiply(
        &self,
        gpu: &GpuDevice,
        x: &[f32],
        y: &mut [f32],
    ) -> std::result::Result<(), GpuDeviceError> {
        if x.len() != self.num_cols || y.len() != self.num_rows {
            return Err(GpuDeviceError::Readback(format!(
                "expected x[{}] and y[{}], got x[{}] and y[{}]",
                self.num_cols,
                self.num_rows,
                x.len(),
                y.len()
            )));
        }
        if self.num_rows == 0 {
            return Ok(());
        }

        if !x.is_empty() {
            gpu.queue().write_buffer(&self.x, 0, bytemuck::cast_slice(x));
        }

        let size = (self.num_rows * std::mem::size_of::<f32>()) as u64;
        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("SpMV Command Encoder"),
            });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("SpMV Compute Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &self.bind_group, &[]);
            compute_pass.dispatch_workgroups(self.grid.0, self.grid.1, 1);
        }
        encoder.copy_buffer_to_buffer(&self.y, 0, &self.staging, 0, size);
        gpu.queue().submit(Some(encoder.finish()));

        let buffer_slice = self.staging.slice(..size);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        gpu.device().poll(wgpu::Maintain::Wait);
        rx.receive()
            .await
            .ok_or_else(|| GpuDeviceError::Readback("map callback dropped".to_string()))?
            .map_err(|e| GpuDeviceError::Readback(e.to_string()))?;

        {
            let data = buffer_slice.get_mapped_range();
            y.copy_from_slice(bytemuck::cast_slice(&data));
        }
        self.staging.unmap();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_device_error_display() {
        let err = GpuDeviceError::NoAdapter {
            index: 2,
            available: 1,
        };
        assert_eq!(err.to_string(), "No GPU adapter with index 2 (1 found)");

        let err = GpuDeviceError::DeviceRequest("test error".to_string());
        assert_eq!(err.to_string(), "Failed to request GPU device: test error");
    }

    #[test]
    fn test_padded_never_empty() {
        assert_eq!(padded::<u32>(&[]), vec![0]);
        assert_eq!(padded(&[1.5_f32, 2.0]), vec![1.5, 2.0]);
    }

    #[test]
    fn test_bind_missing_adapter() {
        let index = GpuDevice::available_count() + 1;
        let err = GpuContext::bind(DeviceId(index)).unwrap_err();
        assert!(matches!(err, SnmgError::DeviceBinding { .. }));
    }

    #[tokio::test]
    async fn test_spmv_kernel_small_matrix() {
        if GpuDevice::available_count() == 0 {
            eprintln!("⚠️  Skipping test_spmv_kernel_small_matrix: GPU not available");
            return;
        }
        let gpu = GpuDevice::bind(0).await.unwrap();

        // [[0, 2, 0], [1, 0, 1]] * [1, 2, 3]
        let kernel = GpuSpmvKernel::new(&gpu, &[0, 1, 3], &[1, 0, 2], &[2.0, 1.0, 1.0], 3);
        let mut y = vec![0.0; 2];
        kernel.multiply(&gpu, &[1.0, 2.0, 3.0], &mut y).await.unwrap();
        assert_eq!(y, vec![4.0, 4.0]);
    }

    #[tokio::test]
    async fn test_spmv_kernel_empty_shard() {
        if GpuDevice::available_count() == 0 {
            eprintln!("⚠️  Skipping test_spmv_kernel_empty_shard: GPU not available");
            return;
        }
        let gpu = GpuDevice::bind(0).await.unwrap();

        let kernel = GpuSpmvKernel::new(&gpu, &[0], &[], &[], 4);
        assert_eq!(kernel.num_rows(), 0);
        let mut y: Vec<f32> = Vec::new();
        kernel.multiply(&gpu, &[0.25; 4], &mut y).await.unwrap();
    }
}
