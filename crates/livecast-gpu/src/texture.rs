//! GPU textures holding source frame planes.

use livecast_core::{FrameBuffer, FramePlane, LiveCastError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// A GPU texture holding one plane of a video frame.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

impl GpuTexture {
    /// Create a new GPU texture with the given dimensions.
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        label: Option<&str>,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    /// Create a sampled texture for a frame plane: `R8Unorm` for luma,
    /// `Rg8Unorm` for interleaved chroma.
    pub fn for_plane(device: &wgpu::Device, plane: &FramePlane, label: &str) -> Result<Self> {
        let format = match plane.bytes_per_pixel {
            1 => wgpu::TextureFormat::R8Unorm,
            2 => wgpu::TextureFormat::Rg8Unorm,
            bpp => {
                return Err(LiveCastError::UnsupportedFormat(format!(
                    "{} bytes per pixel plane",
                    bpp
                )))
            }
        };
        Ok(Self::new(
            device,
            plane.width,
            plane.height,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            Some(label),
        ))
    }

    /// Record an upload of `plane` into this texture.
    ///
    /// The data goes through a staging buffer owned by the command buffer,
    /// so uploads for different frames cannot overwrite each other before
    /// they execute.
    pub fn encode_upload(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        plane: &FramePlane,
    ) -> Result<()> {
        if plane.width != self.width || plane.height != self.height {
            return Err(LiveCastError::Gpu(format!(
                "Plane size {}x{} doesn't match texture size {}x{}",
                plane.width, plane.height, self.width, self.height
            )));
        }

        let bytes_per_row = align_to(plane.row_bytes(), wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
        let packed = plane.pack_rows(bytes_per_row)?;
        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Plane Upload"),
            contents: &packed,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row as u32),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        Ok(())
    }

    /// Memory usage estimate in bytes.
    pub fn memory_size(&self) -> usize {
        let bytes_per_pixel = match self.format {
            wgpu::TextureFormat::R8Unorm => 1,
            wgpu::TextureFormat::Rg8Unorm => 2,
            _ => 4,
        };
        (self.width * self.height) as usize * bytes_per_pixel
    }
}

/// Round `value` up to a multiple of `alignment`.
pub fn align_to(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Luma and chroma textures for one source frame size.
pub struct SourceTextures {
    pub luma: GpuTexture,
    pub chroma: GpuTexture,
}

/// Source textures keyed by frame size.
///
/// Capture rarely changes resolution, so a couple of entries cover a
/// session; the cache is emptied when it grows past its bound.
#[derive(Default)]
pub struct SourceTextureCache {
    entries: Mutex<HashMap<(u32, u32), Arc<SourceTextures>>>,
}

impl SourceTextureCache {
    const MAX_ENTRIES: usize = 4;

    pub fn new() -> Self {
        Self::default()
    }

    /// Textures matching `frame`, created on first use.
    pub fn get_or_create(
        &self,
        device: &wgpu::Device,
        frame: &FrameBuffer,
    ) -> Result<Arc<SourceTextures>> {
        let key = (frame.width, frame.height);
        let mut entries = self.entries.lock();
        if let Some(textures) = entries.get(&key) {
            return Ok(Arc::clone(textures));
        }

        let (Some(luma), Some(chroma)) = (frame.luma(), frame.chroma()) else {
            return Err(LiveCastError::UnsupportedFormat(format!(
                "{:?} source",
                frame.format
            )));
        };
        let textures = Arc::new(SourceTextures {
            luma: GpuTexture::for_plane(device, luma, "Source Luma")?,
            chroma: GpuTexture::for_plane(device, chroma, "Source Chroma")?,
        });

        if entries.len() >= Self::MAX_ENTRIES {
            entries.clear();
        }
        entries.insert(key, Arc::clone(&textures));
        Ok(textures)
    }

    pub fn flush(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
