//! Shared fixtures: a sink that records everything and frame builders.

use livecast_core::{
    AudioFrame, AudioTrack, FrameBuffer, LiveCastError, MediaTime, Result, SampleTiming,
    StreamSink, VideoFrame,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct RecordingSink {
    pub video: Mutex<Vec<VideoFrame>>,
    pub audio: Mutex<Vec<(AudioFrame, AudioTrack)>>,
    pub depths: Mutex<Vec<usize>>,
    pub video_bitrates: Mutex<Vec<u32>>,
    pub audio_bitrates: Mutex<Vec<u32>>,
    /// Reject every control change while set.
    pub reject: AtomicBool,
}

impl RecordingSink {
    fn check(&self) -> Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            Err(LiveCastError::Sink("rejected".into()))
        } else {
            Ok(())
        }
    }
}

impl StreamSink for RecordingSink {
    fn append_video(&self, frame: VideoFrame) {
        self.video.lock().push(frame);
    }

    fn append_audio(&self, frame: AudioFrame, track: AudioTrack) {
        self.audio.lock().push((frame, track));
    }

    fn set_queue_depth(&self, depth: usize) -> Result<()> {
        self.depths.lock().push(depth);
        self.check()
    }

    fn set_video_bitrate(&self, bits_per_second: u32) -> Result<()> {
        self.video_bitrates.lock().push(bits_per_second);
        self.check()
    }

    fn set_audio_bitrate(&self, bits_per_second: u32) -> Result<()> {
        self.audio_bitrates.lock().push(bits_per_second);
        self.check()
    }
}

/// NV12 frame `index` of a 30 fps stream.
pub fn nv12_frame(width: u32, height: u32, index: i64) -> VideoFrame {
    let timing = SampleTiming::new(MediaTime::new(index, 30), Some(MediaTime::new(1, 30)));
    VideoFrame::new(FrameBuffer::nv12_gradient(width, height), Some(timing))
}

/// Poll `condition` on real time until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
