//! Throttled publication of per-track audio levels.

use crate::level::measure_rms;
use livecast_core::{AudioConfig, AudioFrame, AudioTrack};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

/// Latest published level for each track: RMS times monitoring volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AudioLevels {
    pub app: f32,
    pub mic: f32,
}

impl AudioLevels {
    pub fn get(&self, track: AudioTrack) -> f32 {
        match track {
            AudioTrack::App => self.app,
            AudioTrack::Mic => self.mic,
        }
    }

    fn set(&mut self, track: AudioTrack, level: f32) {
        match track {
            AudioTrack::App => self.app = level,
            AudioTrack::Mic => self.mic = level,
        }
    }
}

/// Measures incoming frames no more often than `interval` and publishes
/// both tracks' levels on a watch channel.
///
/// Frames arriving inside the interval are not measured at all; the last
/// known level of the other track is republished unchanged.
#[derive(Debug)]
pub struct LevelMeter {
    tx: watch::Sender<AudioLevels>,
    levels: AudioLevels,
    app_volume: f32,
    mic_volume: f32,
    interval: Duration,
    last_publish: Option<Instant>,
}

impl LevelMeter {
    pub fn new(config: &AudioConfig) -> Self {
        let (tx, _rx) = watch::channel(AudioLevels::default());
        Self {
            tx,
            levels: AudioLevels::default(),
            app_volume: config.app_volume,
            mic_volume: config.mic_volume,
            interval: config.meter_interval(),
            last_publish: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AudioLevels> {
        self.tx.subscribe()
    }

    pub fn apply_config(&mut self, config: &AudioConfig) {
        self.app_volume = config.app_volume;
        self.mic_volume = config.mic_volume;
        self.interval = config.meter_interval();
    }

    pub fn levels(&self) -> AudioLevels {
        self.levels
    }

    /// Monitoring volume for `track`; non-finite volumes count as unity.
    fn volume(&self, track: AudioTrack) -> f32 {
        let volume = match track {
            AudioTrack::App => self.app_volume,
            AudioTrack::Mic => self.mic_volume,
        };
        if volume.is_finite() {
            volume
        } else {
            1.0
        }
    }

    fn due(&self, now: Instant) -> bool {
        self.last_publish
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Measure `frame` and publish if the interval has elapsed.
    ///
    /// Returns the published level for `track`, or `None` when throttled or
    /// the frame could not be measured.
    pub fn observe(&mut self, frame: &AudioFrame, track: AudioTrack, now: Instant) -> Option<f32> {
        if !self.due(now) {
            return None;
        }
        let rms = measure_rms(frame)?;
        Some(self.publish(track, rms, now))
    }

    /// Publish an already measured RMS value for `track`.
    pub fn publish(&mut self, track: AudioTrack, rms: f32, now: Instant) -> f32 {
        let level = rms * self.volume(track);
        let level = if level.is_finite() { level } else { 0.0 };
        self.levels.set(track, level);
        self.last_publish = Some(now);
        self.tx.send_replace(self.levels);
        trace!(track = track.name(), level, "Audio level");
        level
    }
}
