//! Synthetic screen capture: a static NV12 gradient and two sine tones.

use livecast_core::{
    AudioFrame, AudioTrack, FrameBuffer, FrameRate, MediaTime, SampleTiming, VideoFrame,
};
use std::f32::consts::TAU;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
/// Audio is delivered in 20 ms blocks.
pub const AUDIO_BLOCK_SAMPLES: usize = SAMPLE_RATE as usize / 50;

#[derive(Debug)]
pub struct SyntheticCapture {
    image: FrameBuffer,
    rate: FrameRate,
    app_phase: f32,
    mic_phase: f32,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32, rate: FrameRate) -> Self {
        Self {
            image: FrameBuffer::nv12_gradient(width, height),
            rate,
            app_phase: 0.0,
            mic_phase: 0.0,
        }
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    /// A frame presented at `pts_secs` on the session clock.
    pub fn video_frame(&self, pts_secs: f64) -> VideoFrame {
        let timing = SampleTiming::new(
            MediaTime::from_seconds_f64(pts_secs),
            Some(self.rate.frame_duration()),
        );
        VideoFrame::new(self.image.clone(), Some(timing))
    }

    /// The next 20 ms of interleaved 16-bit audio for `track`.
    pub fn audio_frame(&mut self, track: AudioTrack) -> AudioFrame {
        let (frequency, amplitude, phase) = match track {
            AudioTrack::App => (440.0, 0.3, &mut self.app_phase),
            AudioTrack::Mic => (220.0, 0.1, &mut self.mic_phase),
        };
        let step = TAU * frequency / SAMPLE_RATE as f32;

        let mut samples = Vec::with_capacity(AUDIO_BLOCK_SAMPLES * CHANNELS as usize);
        for _ in 0..AUDIO_BLOCK_SAMPLES {
            let value = (phase.sin() * amplitude * i16::MAX as f32) as i16;
            samples.extend(std::iter::repeat(value).take(CHANNELS as usize));
            *phase = (*phase + step) % TAU;
        }
        AudioFrame::from_i16(SAMPLE_RATE, CHANNELS, samples)
    }
}
