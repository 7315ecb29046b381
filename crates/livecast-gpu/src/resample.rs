//! Destination-to-source coordinate mapping and resampling kernels.
//!
//! The WGSL shader in `shaders/rotate_nv12.wgsl` implements the same math;
//! keep the two in step.

use livecast_core::{FramePlane, Resampling, RotationAngle};

/// Map the center of destination pixel (`x`, `y`) back into source plane
/// coordinates for a clockwise rotation by `angle`.
///
/// `dst` and `src` are plane sizes. The destination may be scaled relative
/// to the rotated source.
pub fn source_coord(
    x: u32,
    y: u32,
    dst: (u32, u32),
    src: (u32, u32),
    angle: RotationAngle,
) -> (f32, f32) {
    let (sw, sh) = (src.0 as f32, src.1 as f32);
    let (rw, rh) = if angle.swaps_dimensions() {
        (sh, sw)
    } else {
        (sw, sh)
    };
    let u = (x as f32 + 0.5) * rw / dst.0.max(1) as f32 - 0.5;
    let v = (y as f32 + 0.5) * rh / dst.1.max(1) as f32 - 0.5;

    match angle {
        RotationAngle::Deg0 => (u, v),
        RotationAngle::Deg90 => (v, sh - 1.0 - u),
        RotationAngle::Deg180 => (sw - 1.0 - u, sh - 1.0 - v),
        RotationAngle::Deg270 => (sw - 1.0 - v, u),
    }
}

/// Catmull-Rom weights for the four taps around a sample at fraction `t`.
#[inline]
pub fn cubic_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

/// Edge-clamped read; anything outside `data` reads as zero.
#[inline]
fn texel(plane: &FramePlane, x: i64, y: i64, channel: usize) -> f32 {
    let x = x.min(plane.width as i64 - 1).max(0) as usize;
    let y = y.min(plane.height as i64 - 1).max(0) as usize;
    plane
        .data
        .get(y * plane.stride + x * plane.bytes_per_pixel + channel)
        .map_or(0.0, |&v| f32::from(v))
}

/// Sample one channel of `plane` at source coordinate (`sx`, `sy`).
pub fn sample(plane: &FramePlane, sx: f32, sy: f32, channel: usize, mode: Resampling) -> u8 {
    match mode {
        Resampling::Nearest => {
            texel(plane, sx.round() as i64, sy.round() as i64, channel) as u8
        }
        Resampling::Bicubic => {
            let bx = sx.floor();
            let by = sy.floor();
            let wx = cubic_weights(sx - bx);
            let wy = cubic_weights(sy - by);
            let (bx, by) = (bx as i64, by as i64);

            let mut acc = 0.0f32;
            for (j, wy) in wy.iter().enumerate() {
                let mut row = 0.0f32;
                for (i, wx) in wx.iter().enumerate() {
                    row += texel(plane, bx + i as i64 - 1, by + j as i64 - 1, channel) * wx;
                }
                acc += row * wy;
            }
            (acc.clamp(0.0, 255.0) + 0.5) as u8
        }
    }
}
