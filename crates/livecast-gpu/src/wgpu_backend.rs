//! Compute-shader rotation backend.
//!
//! Source planes are uploaded into cached textures, one compute pass writes
//! packed luma and chroma words into pooled storage buffers, and the result
//! is copied into a per-operation staging buffer for readback. All work for
//! a frame goes into one command buffer, so the queue's submission order
//! keeps reuse of pooled destinations safe.

use crate::context::GpuContext;
use crate::rotator::{Completion, RotationBackend, RotationJob, TileSize};
use crate::texture::SourceTextureCache;
use bytemuck::{Pod, Zeroable};
use livecast_core::{
    FrameBuffer, FramePlane, LiveCastError, PixelFormat, Resampling, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;
use wgpu::util::DeviceExt;

const SHADER: &str = include_str!("shaders/rotate_nv12.wgsl");

/// How long a readback waits for its map callback after the device poll.
const MAP_TIMEOUT: Duration = Duration::from_secs(2);

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RotateParams {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    angle: u32,
    use_bicubic: u32,
    words_per_row: u32,
    _pad: u32,
}

/// Pooled destination storage for one output size.
pub struct RotationTarget {
    luma: wgpu::Buffer,
    chroma: wgpu::Buffer,
    width: u32,
    height: u32,
    /// Packed u32 words per row, shared by both planes.
    words_per_row: u32,
}

impl RotationTarget {
    fn row_stride(&self) -> u64 {
        self.words_per_row as u64 * 4
    }

    fn luma_bytes(&self) -> u64 {
        self.row_stride() * self.height as u64
    }

    fn chroma_bytes(&self) -> u64 {
        self.row_stride() * self.height.div_ceil(2) as u64
    }
}

/// Where the planes sit in a readback buffer.
struct ReadbackLayout {
    width: u32,
    height: u32,
    row_stride: usize,
    luma_bytes: usize,
}

impl ReadbackLayout {
    fn unpack(&self, bytes: &[u8]) -> Result<FrameBuffer> {
        let short = || LiveCastError::Gpu("readback buffer too short".into());
        let (luma_bytes, chroma_bytes) = (
            bytes.get(..self.luma_bytes).ok_or_else(short)?,
            bytes.get(self.luma_bytes..).ok_or_else(short)?,
        );
        let (cw, ch, _) = PixelFormat::Nv12
            .plane_layout(1, self.width, self.height)
            .ok_or_else(short)?;

        let luma = FramePlane::from_rows(self.width, self.height, 1, luma_bytes, self.row_stride)
            .ok_or_else(short)?;
        let chroma =
            FramePlane::from_rows(cw, ch, 2, chroma_bytes, self.row_stride).ok_or_else(short)?;

        Ok(FrameBuffer {
            format: PixelFormat::Nv12,
            width: self.width,
            height: self.height,
            planes: [luma, chroma].into_iter().collect(),
        })
    }
}

/// wgpu compute backend.
pub struct WgpuRotator {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    tile: TileSize,
    sources: SourceTextureCache,
}

impl WgpuRotator {
    /// Build the compute pipeline. Shader or pipeline errors are fatal here.
    pub fn new(context: &GpuContext) -> Result<Self> {
        let device = Arc::clone(&context.device);
        let limits = device.limits();

        let execution_width = context
            .execution_width()
            .min(limits.max_compute_workgroup_size_x)
            .min(limits.max_compute_invocations_per_workgroup);
        let mut tile =
            TileSize::from_execution_width(execution_width, context.max_threads_per_group());
        tile.height = tile.height.min(limits.max_compute_workgroup_size_y);
        info!(
            "Rotation tile {}x{} (execution width {})",
            tile.width,
            tile.height,
            context.execution_width()
        );

        let source = format!(
            "const TILE_W: u32 = {}u;\nconst TILE_H: u32 = {}u;\n{}",
            tile.width, tile.height, SHADER
        );

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Rotate NV12 Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let buffer_entry = |binding, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let storage = wgpu::BufferBindingType::Storage { read_only: false };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Rotate Bind Group Layout"),
            entries: &[
                buffer_entry(0, wgpu::BufferBindingType::Uniform),
                texture_entry(1),
                texture_entry(2),
                buffer_entry(3, storage),
                buffer_entry(4, storage),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Rotate Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Rotate Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("rotate_nv12"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(LiveCastError::Shader(e.to_string()));
        }

        Ok(Self {
            device,
            queue: Arc::clone(&context.queue),
            pipeline,
            bind_group_layout,
            tile,
            sources: SourceTextureCache::new(),
        })
    }

    pub fn tile(&self) -> TileSize {
        self.tile
    }

    /// Number of cached source texture pairs.
    pub fn cached_sources(&self) -> usize {
        self.sources.len()
    }
}

impl RotationBackend for WgpuRotator {
    type Target = RotationTarget;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn allocate_target(&self, width: u32, height: u32) -> Result<RotationTarget> {
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
            return Err(LiveCastError::Allocation(format!(
                "unsupported target size {}x{}",
                width, height
            )));
        }

        let words_per_row = width.div_ceil(4);
        let row_stride = words_per_row as u64 * 4;
        let luma_size = row_stride * height as u64;
        let chroma_size = row_stride * height.div_ceil(2) as u64;
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;

        let luma = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Rotated Luma"),
            size: luma_size,
            usage,
            mapped_at_creation: false,
        });
        let chroma = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Rotated Chroma"),
            size: chroma_size,
            usage,
            mapped_at_creation: false,
        });

        Ok(RotationTarget {
            luma,
            chroma,
            width,
            height,
            words_per_row,
        })
    }

    fn submit(&self, job: RotationJob, target: Arc<RotationTarget>) -> Result<Completion> {
        if (target.width, target.height) != (job.dst_width, job.dst_height) {
            return Err(LiveCastError::Gpu(format!(
                "target {}x{} does not match job {}x{}",
                target.width, target.height, job.dst_width, job.dst_height
            )));
        }
        let (Some(luma), Some(chroma)) = (job.source.luma(), job.source.chroma()) else {
            return Err(LiveCastError::UnsupportedFormat(format!(
                "{:?} source",
                job.source.format
            )));
        };

        let sources = self.sources.get_or_create(&self.device, &job.source)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Rotate Encoder"),
            });
        sources.luma.encode_upload(&self.device, &mut encoder, luma)?;
        sources.chroma.encode_upload(&self.device, &mut encoder, chroma)?;

        let params = RotateParams {
            src_width: job.source.width,
            src_height: job.source.height,
            dst_width: job.dst_width,
            dst_height: job.dst_height,
            angle: job.angle.degrees(),
            use_bicubic: u32::from(job.resampling == Resampling::Bicubic),
            words_per_row: target.words_per_row,
            _pad: 0,
        };
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Rotate Params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Rotate Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&sources.luma.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&sources.chroma.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: target.luma.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: target.chroma.as_entire_binding(),
                },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Rotate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (groups_x, groups_y) = self.tile.groups_for(target.words_per_row, job.dst_height);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        let luma_bytes = target.luma_bytes();
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Rotate Readback"),
            size: luma_bytes + target.chroma_bytes(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&target.luma, 0, &readback, 0, luma_bytes);
        encoder.copy_buffer_to_buffer(&target.chroma, 0, &readback, luma_bytes, target.chroma_bytes());

        let index = self.queue.submit(Some(encoder.finish()));

        let (mapped_tx, mapped_rx) = crossbeam_channel::bounded(1);
        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = mapped_tx.send(result);
            });

        let layout = ReadbackLayout {
            width: target.width,
            height: target.height,
            row_stride: target.row_stride() as usize,
            luma_bytes: luma_bytes as usize,
        };
        let device = Arc::clone(&self.device);
        let (tx, rx) = oneshot::channel();
        let complete = move || {
            device.poll(wgpu::Maintain::wait_for(index));
            let result = match mapped_rx.recv_timeout(MAP_TIMEOUT) {
                Ok(Ok(())) => {
                    let frame = {
                        let view = readback.slice(..).get_mapped_range();
                        layout.unpack(&view)
                    };
                    readback.unmap();
                    frame
                }
                Ok(Err(e)) => Err(LiveCastError::Gpu(format!("readback map failed: {}", e))),
                Err(_) => Err(LiveCastError::ChannelClosed("readback map")),
            };
            let _ = tx.send(result);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(complete);
            }
            Err(_) => {
                std::thread::spawn(complete);
            }
        }
        Ok(rx)
    }

    fn flush_cache(&self) {
        self.sources.flush();
    }
}
