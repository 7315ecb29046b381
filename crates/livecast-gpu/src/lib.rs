//! LiveCast GPU - frame rotation engine
//!
//! Rotates captured NV12 frames into pooled destination storage, bounded by
//! an inflight budget. The wgpu compute backend does the work on the GPU; the
//! CPU backend runs the same math on the rayon pool.

pub mod buffer_pool;
pub mod context;
pub mod cpu;
pub mod inflight;
pub mod resample;
pub mod rotator;
pub mod texture;
pub mod wgpu_backend;

pub use buffer_pool::{BufferPool, PoolStats};
pub use context::{rotation_limits, DeviceProfile, GpuContext};
pub use cpu::CpuRotator;
pub use inflight::{InflightBudget, InflightPermit};
pub use rotator::{
    output_size, Completion, FrameRotator, PendingRotation, RotationBackend, RotationJob, TileSize,
};
pub use texture::GpuTexture;
pub use wgpu_backend::{RotationTarget, WgpuRotator};
