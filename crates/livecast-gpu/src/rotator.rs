//! Frame rotation engine.
//!
//! Each frame moves through `Requested -> PermitAcquired -> Submitted ->
//! Completed`. The engine owns the pool and the inflight budget; the actual
//! pixel work is delegated to a [`RotationBackend`].

use crate::buffer_pool::BufferPool;
use crate::inflight::{InflightBudget, InflightPermit};
use livecast_core::{
    FrameBuffer, PixelFormat, Resampling, Result, RotationAngle, RotationConfig, SampleTiming,
    VideoFrame,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Resolves with the rotated image once the backend has finished.
pub type Completion = oneshot::Receiver<Result<FrameBuffer>>;

/// One unit of rotation work handed to a backend.
#[derive(Debug)]
pub struct RotationJob {
    pub source: FrameBuffer,
    pub angle: RotationAngle,
    pub dst_width: u32,
    pub dst_height: u32,
    pub resampling: Resampling,
}

/// Something that can rotate NV12 frames into pooled destination storage.
pub trait RotationBackend: Send + Sync + 'static {
    /// Destination storage kept in the pool.
    type Target: Send + Sync + 'static;

    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Allocate destination storage for a `width` x `height` NV12 frame.
    fn allocate_target(&self, width: u32, height: u32) -> Result<Self::Target>;

    /// Start the work. Errors returned here mean nothing was dispatched.
    fn submit(&self, job: RotationJob, target: Arc<Self::Target>) -> Result<Completion>;

    /// Release cached source imports.
    fn flush_cache(&self) {}
}

/// Threadgroup shape used by compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    /// Derive a tile from the device's execution width and the maximum
    /// threads per group. Falls back to a single row when the execution
    /// width alone exceeds the thread limit.
    pub fn from_execution_width(execution_width: u32, max_threads: u32) -> Self {
        let width = execution_width.max(1);
        Self {
            width,
            height: (max_threads / width).max(1),
        }
    }

    /// Number of groups needed to cover `cols` x `rows` invocations.
    pub fn groups_for(&self, cols: u32, rows: u32) -> (u32, u32) {
        (cols.div_ceil(self.width), rows.div_ceil(self.height))
    }
}

/// Output dimensions for a source of `width` x `height`.
///
/// An explicit override always wins; otherwise 90 and 270 degree rotations
/// swap width and height.
pub fn output_size(
    width: u32,
    height: u32,
    angle: RotationAngle,
    override_size: Option<(u32, u32)>,
) -> (u32, u32) {
    match override_size {
        Some(size) => size,
        None if angle.swaps_dimensions() => (height, width),
        None => (width, height),
    }
}

/// Settings that can change while the engine runs.
#[derive(Debug, Clone, PartialEq)]
struct RotatorSettings {
    output_override: Option<(u32, u32)>,
    resampling: Resampling,
    debug: bool,
}

impl From<&RotationConfig> for RotatorSettings {
    fn from(config: &RotationConfig) -> Self {
        Self {
            output_override: config.output_override(),
            resampling: config.resampling,
            debug: config.debug,
        }
    }
}

/// Rotation engine generic over its backend.
pub struct FrameRotator<B: RotationBackend> {
    backend: B,
    pool: BufferPool<B::Target>,
    inflight: InflightBudget,
    settings: RwLock<RotatorSettings>,
    torn_down: AtomicBool,
}

impl<B: RotationBackend> FrameRotator<B> {
    pub fn new(backend: B, config: &RotationConfig) -> Self {
        let inflight = InflightBudget::new(config.max_inflight);
        info!(
            "Rotation engine on {} backend, inflight budget {}, pool size {}",
            backend.name(),
            inflight.budget(),
            config.max_pool_size
        );
        Self {
            backend,
            pool: BufferPool::new(config.max_pool_size),
            inflight,
            settings: RwLock::new(RotatorSettings::from(config)),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Apply a new configuration. Work already submitted keeps the settings
    /// it started with.
    pub fn apply_settings(&self, config: &RotationConfig) {
        let new_settings = RotatorSettings::from(config);
        {
            let mut settings = self.settings.write();
            if *settings != new_settings {
                debug!("Rotation settings updated: {:?}", new_settings);
                *settings = new_settings;
            }
        }
        if config.max_pool_size != self.pool.max_pool_size() {
            self.pool.set_max_pool_size(config.max_pool_size);
        }
        if InflightBudget::resolve(config.max_inflight) != self.inflight.budget() {
            self.inflight.resize(config.max_inflight);
        }
    }

    /// Output size for a source frame under the current settings.
    pub fn output_size(&self, width: u32, height: u32, angle: RotationAngle) -> (u32, u32) {
        output_size(width, height, angle, self.settings.read().output_override)
    }

    /// Submit a frame for rotation, waiting for an inflight permit first.
    ///
    /// Returns `None` when the frame is dropped: engine torn down, frame
    /// malformed or missing timing info, or the backend refused the work.
    pub async fn submit(&self, frame: VideoFrame, angle: RotationAngle) -> Option<PendingRotation> {
        if self.is_torn_down() {
            return None;
        }
        let buffer = frame.buffer;
        if buffer.format != PixelFormat::Nv12
            || !buffer.is_well_formed()
            || buffer.width == 0
            || buffer.height == 0
        {
            debug!(
                "Skipping {:?} frame {}x{}",
                buffer.format, buffer.width, buffer.height
            );
            return None;
        }
        let Some(timing) = frame.timing else {
            debug!("Frame has no timing info, dropping");
            return None;
        };

        let permit = self.inflight.acquire().await?;
        if self.is_torn_down() {
            return None;
        }

        let settings = self.settings.read().clone();
        let (dst_width, dst_height) =
            output_size(buffer.width, buffer.height, angle, settings.output_override);
        if settings.debug {
            debug!(
                "{}: {}x{} -> {}x{} at {}deg",
                self.backend.name(),
                buffer.width,
                buffer.height,
                dst_width,
                dst_height,
                angle.degrees()
            );
        }

        let target = self
            .pool
            .acquire_with(dst_width, dst_height, |w, h| self.backend.allocate_target(w, h))?;

        let job = RotationJob {
            source: buffer,
            angle,
            dst_width,
            dst_height,
            resampling: settings.resampling,
        };
        let completion = match self.backend.submit(job, target) {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Rotation submit failed: {}", e);
                return None;
            }
        };

        Some(PendingRotation {
            completion,
            permit,
            timing,
            debug: settings.debug,
        })
    }

    /// Submit and wait in one step.
    pub async fn rotate(&self, frame: VideoFrame, angle: RotationAngle) -> Option<VideoFrame> {
        self.submit(frame, angle).await?.wait().await
    }

    /// Stop accepting work, wake permit waiters and release cached storage.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inflight.close();
        self.backend.flush_cache();
        self.pool.clear();
        info!("Rotation engine torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> &InflightBudget {
        &self.inflight
    }

    pub fn pool(&self) -> &BufferPool<B::Target> {
        &self.pool
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// A submitted rotation. Holds its inflight permit until resolved or dropped.
#[must_use = "dropping a pending rotation discards the frame"]
pub struct PendingRotation {
    completion: Completion,
    permit: InflightPermit,
    timing: SampleTiming,
    debug: bool,
}

impl PendingRotation {
    /// Wait for the backend. The permit is released before the result is
    /// wrapped; any failure yields `None`.
    pub async fn wait(self) -> Option<VideoFrame> {
        let Self {
            completion,
            permit,
            timing,
            debug,
        } = self;
        let result = completion.await;
        drop(permit);

        match result {
            Ok(Ok(buffer)) => {
                if debug {
                    debug!("Rotation complete: {}x{}", buffer.width, buffer.height);
                }
                Some(VideoFrame::new(buffer, Some(timing)))
            }
            Ok(Err(e)) => {
                warn!("Rotation failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Rotation completion dropped");
                None
            }
        }
    }
}
