//! Device setup for the compute rotation backend.
//!
//! No surface is ever created. Requested limits cover a portrait 4K frame
//! but never exceed what the adapter reports, so smaller adapters still get
//! a device and oversized frames fail at allocation instead.

use livecast_core::{LiveCastError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Execution width assumed when the adapter does not report one.
const DEFAULT_EXECUTION_WIDTH: u32 = 32;
/// Longest frame side the rotation targets are sized for.
const MAX_FRAME_DIMENSION: u32 = 8192;
/// Largest single plane buffer (luma of an 8192x8192 frame, word packed).
const MAX_PLANE_BUFFER_BYTES: u32 = 128 * 1024 * 1024;

/// Backends tried when looking for an adapter.
fn preferred_backends() -> wgpu::Backends {
    if cfg!(target_os = "macos") {
        wgpu::Backends::METAL
    } else {
        wgpu::Backends::VULKAN | wgpu::Backends::DX12
    }
}

/// Device limits for rotation, capped by what `supported` allows.
pub fn rotation_limits(supported: &wgpu::Limits) -> wgpu::Limits {
    let mut limits = wgpu::Limits::default();
    limits.max_texture_dimension_2d = MAX_FRAME_DIMENSION.min(supported.max_texture_dimension_2d);
    limits.max_storage_buffer_binding_size =
        MAX_PLANE_BUFFER_BYTES.min(supported.max_storage_buffer_binding_size);
    // Luma and chroma of one frame share a readback buffer.
    limits.max_buffer_size = (2 * MAX_PLANE_BUFFER_BYTES as u64).min(supported.max_buffer_size);
    limits.max_compute_invocations_per_workgroup = limits
        .max_compute_invocations_per_workgroup
        .min(supported.max_compute_invocations_per_workgroup);
    limits
}

/// What the rotation backend needs to know about the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    /// SIMD width invocations execute in.
    pub execution_width: u32,
    pub max_threads_per_group: u32,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, width {}, {} threads/group)",
            self.name, self.backend, self.execution_width, self.max_threads_per_group
        )
    }
}

/// Adapter, device and queue used by [`WgpuRotator`](crate::WgpuRotator).
pub struct GpuContext {
    _instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    profile: DeviceProfile,
}

impl GpuContext {
    /// Open the high-performance adapter for compute work. Fails when no
    /// adapter exists, which callers treat as "use the CPU backend".
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: preferred_backends(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| LiveCastError::Gpu("No suitable GPU adapter found".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("LiveCast Rotation Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: rotation_limits(&adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| LiveCastError::Gpu(format!("Failed to create device: {}", e)))?;

        // Validation errors on the hot path must drop the frame, not abort.
        device.on_uncaptured_error(Box::new(|e| error!("Uncaptured GPU error: {}", e)));

        let info = adapter.get_info();
        let profile = DeviceProfile {
            name: info.name,
            backend: info.backend,
            execution_width: match adapter.limits().max_subgroup_size {
                0 => DEFAULT_EXECUTION_WIDTH,
                width => width,
            },
            max_threads_per_group: device.limits().max_compute_invocations_per_workgroup,
        };
        info!("Rotation device: {}", profile);

        Ok(Self {
            _instance: instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            profile,
        })
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn execution_width(&self) -> u32 {
        self.profile.execution_width
    }

    pub fn max_threads_per_group(&self) -> u32 {
        self.profile.max_threads_per_group
    }
}
