//! The downstream streaming sink as seen from the pipeline.
//!
//! The encoder/RTMP stack sits behind [`StreamSink`]. Calls are expected to
//! return promptly; implementations hand work off to their own queues.

use crate::audio::{AudioFrame, AudioTrack};
use crate::error::Result;
use crate::frame::VideoFrame;
use serde::{Deserialize, Serialize};

/// Receives processed media and control commands.
pub trait StreamSink: Send + Sync {
    /// Accept a transformed video frame.
    fn append_video(&self, frame: VideoFrame);

    /// Accept a processed audio frame for the given track.
    fn append_audio(&self, frame: AudioFrame, track: AudioTrack);

    /// Change how many frames the outbound video queue may hold.
    fn set_queue_depth(&self, depth: usize) -> Result<()>;

    /// Change the video encoder bitrate (bits per second).
    fn set_video_bitrate(&self, bits_per_second: u32) -> Result<()>;

    /// Change the audio encoder bitrate (bits per second).
    fn set_audio_bitrate(&self, bits_per_second: u32) -> Result<()>;
}

/// Periodic throughput report from the outbound connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkReport {
    pub current_bytes_out_per_second: u64,
    pub total_bytes_out: u64,
    pub current_queue_bytes_out: u64,
}

/// Network status events emitted by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// Regular status update.
    Status(NetworkReport),
    /// The connection cannot keep up with the current bitrate.
    InsufficientBandwidth,
    /// The connection recovered (e.g. after a reconnect).
    Reset,
}
