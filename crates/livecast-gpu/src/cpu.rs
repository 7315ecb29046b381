//! Rotation on the rayon thread pool.
//!
//! Same coordinate mapping and kernels as the compute shader. Used when no
//! GPU adapter is available and wherever deterministic output is needed.

use crate::resample::{sample, source_coord};
use crate::rotator::{Completion, RotationBackend, RotationJob};
use livecast_core::{
    FrameBuffer, FramePlane, LiveCastError, PixelFormat, Resampling, Result, RotationAngle,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Largest frame edge the CPU path accepts.
const MAX_DIMENSION: u32 = 16_384;

/// CPU rotation backend.
#[derive(Debug, Default)]
pub struct CpuRotator;

impl CpuRotator {
    pub fn new() -> Self {
        Self
    }
}

/// Rotate one plane into `dst`, a row per rayon task.
pub fn rotate_plane(src: &FramePlane, dst: &mut FramePlane, angle: RotationAngle, mode: Resampling) {
    let src_size = (src.width, src.height);
    let dst_size = (dst.width, dst.height);
    let bpp = dst.bytes_per_pixel;
    let row_bytes = dst.row_bytes();
    let rows = dst.height as usize;

    dst.data
        .par_chunks_mut(dst.stride)
        .take(rows)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row[..row_bytes].chunks_exact_mut(bpp).enumerate() {
                let (sx, sy) = source_coord(x as u32, y as u32, dst_size, src_size, angle);
                for (channel, byte) in px.iter_mut().enumerate() {
                    *byte = sample(src, sx, sy, channel, mode);
                }
            }
        });
}

/// Rotate a whole NV12 frame into `dst`, reallocating it if its size
/// does not match the job.
pub fn rotate_frame(job: &RotationJob, dst: &mut FrameBuffer) -> Result<()> {
    let (Some(src_luma), Some(src_chroma)) = (job.source.luma(), job.source.chroma()) else {
        return Err(LiveCastError::UnsupportedFormat(format!(
            "{:?} source",
            job.source.format
        )));
    };
    if dst.width != job.dst_width || dst.height != job.dst_height || !dst.is_well_formed() {
        *dst = FrameBuffer::new(job.dst_width, job.dst_height, PixelFormat::Nv12);
    }

    let (dst_luma, dst_chroma) = dst.planes.split_at_mut(1);
    rotate_plane(src_luma, &mut dst_luma[0], job.angle, job.resampling);
    rotate_plane(src_chroma, &mut dst_chroma[0], job.angle, job.resampling);
    Ok(())
}

impl RotationBackend for CpuRotator {
    type Target = Mutex<FrameBuffer>;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn allocate_target(&self, width: u32, height: u32) -> Result<Self::Target> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(LiveCastError::Allocation(format!(
                "unsupported target size {}x{}",
                width, height
            )));
        }
        Ok(Mutex::new(FrameBuffer::new(width, height, PixelFormat::Nv12)))
    }

    fn submit(&self, job: RotationJob, target: Arc<Self::Target>) -> Result<Completion> {
        let (tx, rx) = oneshot::channel();
        rayon::spawn(move || {
            // One writer per target at a time.
            let mut dst = target.lock();
            let result = rotate_frame(&job, &mut dst).map(|_| dst.clone());
            let _ = tx.send(result);
        });
        Ok(rx)
    }
}
