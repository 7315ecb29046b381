//! LiveCast Core - Foundation types for the live capture pipeline
//!
//! This crate provides the types shared by every pipeline stage:
//! - Media time and sample timing
//! - Video frame buffers (NV12) and audio sample blocks
//! - Pipeline configuration
//! - The downstream sink interface

pub mod audio;
pub mod config;
pub mod error;
pub mod frame;
pub mod sink;
pub mod time;

pub use audio::{AudioFormat, AudioFrame, AudioTrack, SampleBlock, SampleFormat};
pub use config::{
    AudioConfig, BitrateConfig, DepthConfig, PipelineConfig, Resampling, RotationConfig,
};
pub use error::{LiveCastError, Result};
pub use frame::{FrameBuffer, FramePlane, MediaKind, PixelFormat, RotationAngle, VideoFrame};
pub use sink::{NetworkEvent, NetworkReport, StreamSink};
pub use time::{FrameRate, MediaTime, SampleTiming};

