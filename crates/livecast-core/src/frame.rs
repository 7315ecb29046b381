//! Frame buffer types for captured video frames in CPU memory.
//!
//! Screen capture delivers bi-planar NV12: a full-resolution luma plane and a
//! half-resolution plane of interleaved Cb/Cr pairs.

use crate::error::LiveCastError;
use crate::time::SampleTiming;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// What kind of sample the capture source handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    AudioApp,
    AudioMic,
}

/// Clockwise rotation applied to outgoing video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum RotationAngle {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl RotationAngle {
    pub const ALL: [RotationAngle; 4] = [Self::Deg0, Self::Deg90, Self::Deg180, Self::Deg270];

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether this rotation exchanges width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl TryFrom<u32> for RotationAngle {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(format!("unsupported rotation angle {other}")),
        }
    }
}

impl From<RotationAngle> for u32 {
    fn from(angle: RotationAngle) -> Self {
        angle.degrees()
    }
}

/// Pixel format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// NV12 bi-planar YUV 4:2:0 (capture native)
    #[default]
    Nv12,
    /// 8-bit BGRA (32 bits per pixel)
    Bgra8,
}

impl PixelFormat {
    /// Number of planes for this format.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::Bgra8 => 1,
        }
    }

    /// Dimensions and bytes per pixel of plane `index` for a frame of the
    /// given size.
    pub fn plane_layout(self, index: usize, width: u32, height: u32) -> Option<(u32, u32, usize)> {
        match (self, index) {
            (Self::Nv12, 0) => Some((width, height, 1)),
            (Self::Nv12, 1) => Some((width.div_ceil(2), height.div_ceil(2), 2)),
            (Self::Bgra8, 0) => Some((width, height, 4)),
            _ => None,
        }
    }
}

/// A plane of pixel data with stride information.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlane {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Bytes per row (may include padding)
    pub stride: usize,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel (2 for interleaved chroma)
    pub bytes_per_pixel: usize,
}

impl FramePlane {
    /// Create a zeroed plane with the given dimensions.
    pub fn new(width: u32, height: u32, bytes_per_pixel: usize) -> Self {
        // Align stride to 64 bytes for SIMD and GPU compatibility
        let min_stride = (width as usize) * bytes_per_pixel;
        let stride = (min_stride + 63) & !63;
        let data = vec![0u8; stride * height as usize];
        Self {
            data,
            stride,
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// Build a plane from rows of `row_bytes` bytes each, stored back to back
    /// with `src_stride` bytes between row starts.
    pub fn from_rows(
        width: u32,
        height: u32,
        bytes_per_pixel: usize,
        src: &[u8],
        src_stride: usize,
    ) -> Option<Self> {
        let mut plane = Self::new(width, height, bytes_per_pixel);
        let row_bytes = plane.row_bytes();
        if src_stride < row_bytes {
            return None;
        }
        for y in 0..height {
            let start = y as usize * src_stride;
            let row = src.get(start..start + row_bytes)?;
            plane.row_mut(y).copy_from_slice(row);
        }
        Some(plane)
    }

    /// Number of meaningful bytes in each row.
    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }

    /// Whether every row fits inside `data` without overlapping the next.
    pub fn is_well_formed(&self) -> bool {
        self.stride >= self.row_bytes()
            && self
                .stride
                .checked_mul(self.height as usize)
                .is_some_and(|len| self.data.len() >= len)
    }

    /// Get a row of pixel data.
    ///
    /// Panics if the row lies outside `data`; see [`get_row`](Self::get_row).
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    /// Get a row of pixel data, or `None` if it lies outside `data`.
    #[inline]
    pub fn get_row(&self, y: u32) -> Option<&[u8]> {
        let start = (y as usize).checked_mul(self.stride)?;
        self.data.get(start..start.checked_add(self.row_bytes())?)
    }

    /// Get a mutable row of pixel data.
    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let end = start + self.row_bytes();
        &mut self.data[start..end]
    }

    /// Copy the plane into a tightly packed buffer whose rows are
    /// `dst_stride` bytes apart.
    pub fn pack_rows(&self, dst_stride: usize) -> Result<Vec<u8>, LiveCastError> {
        let mut out = vec![0u8; dst_stride * self.height as usize];
        let row_bytes = self.row_bytes().min(dst_stride);
        for (y, dst) in (0..self.height).zip(out.chunks_exact_mut(dst_stride.max(1))) {
            let src = self.get_row(y).ok_or_else(|| {
                LiveCastError::InvalidParameter(format!(
                    "row {} outside plane of {} bytes (stride {})",
                    y,
                    self.data.len(),
                    self.stride
                ))
            })?;
            dst[..row_bytes].copy_from_slice(&src[..row_bytes]);
        }
        Ok(out)
    }
}

/// A video image in CPU memory.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    /// Pixel format
    pub format: PixelFormat,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel data planes (luma + chroma for NV12)
    pub planes: SmallVec<[FramePlane; 2]>,
}

impl FrameBuffer {
    /// Create a zeroed frame buffer with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let planes = (0..format.plane_count())
            .filter_map(|i| format.plane_layout(i, width, height))
            .map(|(w, h, bpp)| FramePlane::new(w, h, bpp))
            .collect();

        Self {
            format,
            width,
            height,
            planes,
        }
    }

    /// Total memory usage of this frame in bytes.
    pub fn memory_size(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    /// Luma plane of an NV12 frame (or the only plane of packed formats).
    #[inline]
    pub fn luma(&self) -> Option<&FramePlane> {
        self.planes.first()
    }

    /// Interleaved chroma plane of an NV12 frame.
    #[inline]
    pub fn chroma(&self) -> Option<&FramePlane> {
        match self.format {
            PixelFormat::Nv12 => self.planes.get(1),
            PixelFormat::Bgra8 => None,
        }
    }

    /// Whether the plane list matches what the format requires and every
    /// plane's rows fit its data.
    pub fn is_well_formed(&self) -> bool {
        self.planes.len() == self.format.plane_count()
            && self.planes.iter().enumerate().all(|(i, plane)| {
                self.format.plane_layout(i, self.width, self.height)
                    == Some((plane.width, plane.height, plane.bytes_per_pixel))
                    && plane.is_well_formed()
            })
    }

    /// Create an NV12 test frame: horizontal luma ramp with a vertical
    /// chroma ramp, handy for checking orientation after rotation.
    pub fn nv12_gradient(width: u32, height: u32) -> Self {
        let mut frame = Self::new(width, height, PixelFormat::Nv12);

        let luma = &mut frame.planes[0];
        for y in 0..height {
            let row = luma.row_mut(y);
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x as u32 * 255) / width.max(1)) as u8;
            }
        }

        let chroma = &mut frame.planes[1];
        let chroma_height = chroma.height.max(1);
        for y in 0..chroma.height {
            let v = ((y * 255) / chroma_height) as u8;
            for pair in chroma.row_mut(y).chunks_exact_mut(2) {
                pair[0] = 128;
                pair[1] = v;
            }
        }

        frame
    }
}

/// A captured video frame: image plus timing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub buffer: FrameBuffer,
    /// `None` when the source could not provide timing info.
    pub timing: Option<SampleTiming>,
}

impl VideoFrame {
    pub fn new(buffer: FrameBuffer, timing: Option<SampleTiming>) -> Self {
        Self { buffer, timing }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buffer.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buffer.height
    }
}
