//! Stand-in for the encoder and outbound connection.

use livecast_core::{
    AudioFrame, AudioTrack, NetworkEvent, NetworkReport, Result, StreamSink, VideoFrame,
};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Counts what it receives and logs every control change.
#[derive(Debug, Default)]
pub struct LoggingSink {
    video_frames: AtomicU64,
    app_frames: AtomicU64,
    mic_frames: AtomicU64,
    queue_depth: AtomicUsize,
    video_bitrate: AtomicU32,
    audio_bitrate: AtomicU32,
}

impl LoggingSink {
    pub fn video_bitrate(&self) -> u32 {
        self.video_bitrate.load(Ordering::Relaxed)
    }

    pub fn audio_bitrate(&self) -> u32 {
        self.audio_bitrate.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> String {
        format!(
            "video {} frames, app {} frames, mic {} frames, depth {}, video {} bps, audio {} bps",
            self.video_frames.load(Ordering::Relaxed),
            self.app_frames.load(Ordering::Relaxed),
            self.mic_frames.load(Ordering::Relaxed),
            self.queue_depth.load(Ordering::Relaxed),
            self.video_bitrate(),
            self.audio_bitrate(),
        )
    }
}

impl StreamSink for LoggingSink {
    fn append_video(&self, frame: VideoFrame) {
        let count = self.video_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 300 == 0 {
            debug!(
                "Sent {} video frames, latest {}x{}",
                count,
                frame.width(),
                frame.height()
            );
        }
    }

    fn append_audio(&self, _frame: AudioFrame, track: AudioTrack) {
        let counter = match track {
            AudioTrack::App => &self.app_frames,
            AudioTrack::Mic => &self.mic_frames,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn set_queue_depth(&self, depth: usize) -> Result<()> {
        info!("Sink queue depth -> {}", depth);
        self.queue_depth.store(depth, Ordering::Relaxed);
        Ok(())
    }

    fn set_video_bitrate(&self, bits_per_second: u32) -> Result<()> {
        info!("Sink video bitrate -> {} kbps", bits_per_second / 1000);
        self.video_bitrate.store(bits_per_second, Ordering::Relaxed);
        Ok(())
    }

    fn set_audio_bitrate(&self, bits_per_second: u32) -> Result<()> {
        info!("Sink audio bitrate -> {} kbps", bits_per_second / 1000);
        self.audio_bitrate.store(bits_per_second, Ordering::Relaxed);
        Ok(())
    }
}

/// Outbound link with a fixed capacity.
#[derive(Debug)]
pub struct SimulatedLink {
    capacity_bps: u64,
    total_bytes: u64,
}

impl SimulatedLink {
    pub fn new(capacity_bps: u64) -> Self {
        Self {
            capacity_bps,
            total_bytes: 0,
        }
    }

    /// Advance the link by `elapsed` at the offered rate and return the
    /// events the connection would emit.
    pub fn tick(&mut self, offered_bps: u64, elapsed: Duration) -> Vec<NetworkEvent> {
        let sent_bps = offered_bps.min(self.capacity_bps);
        let secs = elapsed.as_secs_f64();
        self.total_bytes += (sent_bps as f64 / 8.0 * secs) as u64;

        let backlog_bps = offered_bps.saturating_sub(self.capacity_bps);
        let mut events = vec![NetworkEvent::Status(NetworkReport {
            current_bytes_out_per_second: sent_bps / 8,
            total_bytes_out: self.total_bytes,
            current_queue_bytes_out: (backlog_bps as f64 / 8.0 * secs) as u64,
        })];
        if backlog_bps > 0 {
            events.push(NetworkEvent::InsufficientBandwidth);
        }
        events
    }
}
