//! Bitrate controller.
//!
//! Reacts to network status reports from the sink: slow step-down when the
//! measured outbound rate falls well below the current ceiling, slower
//! step-up when the link keeps up, an immediate cut on insufficient-bandwidth
//! events and a jump back to the maximum on reset. Reports during the first
//! seconds after start only feed the average.

use crate::ema::Ema;
use livecast_core::{BitrateConfig, NetworkEvent, NetworkReport, StreamSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const EMA_ALPHA: f64 = 0.2;
const STEP_DOWN_THRESHOLD: f64 = 0.5;
const STEP_UP_THRESHOLD: f64 = 0.95;
const STEP_DOWN: f64 = 0.85;
const STEP_UP: f64 = 1.05;
const INSUFFICIENT_BANDWIDTH_FACTOR: f64 = 0.9;

/// Kilobits per second for a byte rate, as shown in status lines.
pub fn bytes_to_kbps(bytes: u64) -> u64 {
    bytes.saturating_mul(8) / 1000
}

/// Callback fired when the sink stops reporting, or resumes after that.
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// Read-only view of the controller state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateSnapshot {
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub max_video_bitrate: u32,
    pub min_bitrate: u32,
    pub avg_out_bps: Option<f64>,
    pub disconnect_reported: bool,
}

/// Single-writer bitrate state machine.
pub struct BitrateController {
    config: BitrateConfig,
    sink: Arc<dyn StreamSink>,
    video_bitrate: u32,
    audio_bitrate: u32,
    /// Audio ceiling set at runtime; wins over the configured maximum.
    audio_override: Option<u32>,
    avg_out_bps: Ema,
    started_at: Instant,
    last_status: Option<Instant>,
    disconnect_reported: bool,
    on_disconnect: Option<DisconnectCallback>,
    on_reconnect: Option<DisconnectCallback>,
}

impl BitrateController {
    /// Create a controller whose warm-up window starts at `now`. The video
    /// ceiling starts at the configured maximum.
    pub fn new(config: BitrateConfig, sink: Arc<dyn StreamSink>, now: Instant) -> Self {
        Self {
            video_bitrate: config.max_video_bitrate,
            audio_bitrate: config.max_audio_bitrate,
            audio_override: None,
            config,
            sink,
            avg_out_bps: Ema::new(EMA_ALPHA),
            started_at: now,
            last_status: None,
            disconnect_reported: false,
            on_disconnect: None,
            on_reconnect: None,
        }
    }

    pub fn with_disconnect_callback(mut self, callback: DisconnectCallback) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    pub fn set_disconnect_callback(&mut self, callback: DisconnectCallback) {
        self.on_disconnect = Some(callback);
    }

    /// Called when a status report ends a reported outage.
    pub fn with_reconnect_callback(mut self, callback: DisconnectCallback) -> Self {
        self.on_reconnect = Some(callback);
        self
    }

    /// Push the starting ceilings to the sink.
    pub fn publish_initial(&self) {
        self.send_video(self.video_bitrate);
        if let Err(e) = self.sink.set_audio_bitrate(self.audio_bitrate) {
            warn!("Sink rejected audio bitrate {}: {}", self.audio_bitrate, e);
        }
    }

    /// Handle one sink event. Returns the new video ceiling if it changed.
    pub fn handle_event(&mut self, event: NetworkEvent, now: Instant) -> Option<u32> {
        match event {
            NetworkEvent::Status(report) => self.on_status(&report, now),
            NetworkEvent::InsufficientBandwidth => {
                let measured = self
                    .avg_out_bps
                    .value()
                    .unwrap_or(self.video_bitrate as f64);
                let target = self
                    .config
                    .min_bitrate
                    .max(to_bps(measured * INSUFFICIENT_BANDWIDTH_FACTOR));
                info!("Insufficient bandwidth, bitrate -> {} kbps", target / 1000);
                self.set_video(target)
            }
            NetworkEvent::Reset => {
                info!("Bitrate reset to {} kbps", self.config.max_video_bitrate / 1000);
                self.set_video(self.config.max_video_bitrate)
            }
        }
    }

    fn on_status(&mut self, report: &NetworkReport, now: Instant) -> Option<u32> {
        self.last_status = Some(now);
        if std::mem::take(&mut self.disconnect_reported) {
            info!("Network status resumed");
            if let Some(callback) = &self.on_reconnect {
                callback();
            }
        }
        let avg = self
            .avg_out_bps
            .update(report.current_bytes_out_per_second as f64 * 8.0);

        if now.saturating_duration_since(self.started_at) < self.config.warmup() {
            info!("Warming up, bitrate unchanged, avg {:.0} kbps", avg / 1000.0);
            return None;
        }

        let current = self.video_bitrate;
        info!(
            "Bitrate: video {} kbps, avg {:.0} kbps, out {} kbps, total out {} kbps",
            current / 1000,
            avg / 1000.0,
            bytes_to_kbps(report.current_bytes_out_per_second),
            bytes_to_kbps(report.total_bytes_out)
        );

        let ceiling = current as f64;
        if avg < ceiling * STEP_DOWN_THRESHOLD {
            let target = self.config.min_bitrate.max(to_bps(ceiling * STEP_DOWN));
            info!("Bitrate down to {} kbps", target / 1000);
            self.set_video(target)
        } else if avg > ceiling * STEP_UP_THRESHOLD && current < self.config.max_video_bitrate {
            let target = self.config.max_video_bitrate.min(to_bps(ceiling * STEP_UP));
            info!("Bitrate up to {} kbps", target / 1000);
            self.set_video(target)
        } else {
            None
        }
    }

    fn set_video(&mut self, bitrate: u32) -> Option<u32> {
        if bitrate == self.video_bitrate {
            return None;
        }
        self.video_bitrate = bitrate;
        self.send_video(bitrate);
        Some(bitrate)
    }

    fn send_video(&self, bitrate: u32) {
        if let Err(e) = self.sink.set_video_bitrate(bitrate) {
            warn!("Sink rejected video bitrate {}: {}", bitrate, e);
        }
    }

    /// Fire the disconnect callback if no status arrived within the timeout.
    /// Fires once per episode; the next status report re-arms it.
    ///
    /// Returns `true` when the callback fired on this call.
    pub fn check_disconnect(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_status else {
            return false;
        };
        if self.disconnect_reported
            || now.saturating_duration_since(last) <= self.config.disconnect_timeout()
        {
            return false;
        }
        self.disconnect_reported = true;
        warn!(
            "No network status for {:.1}s, reporting disconnect",
            now.saturating_duration_since(last).as_secs_f64()
        );
        if let Some(callback) = &self.on_disconnect {
            callback();
        }
        true
    }

    /// Change the video ceiling. A current bitrate above the new ceiling is
    /// lowered to it.
    pub fn set_max_video_bitrate(&mut self, max: u32) -> Option<u32> {
        self.config.max_video_bitrate = max;
        if self.video_bitrate > max {
            return self.set_video(max);
        }
        None
    }

    /// Set the audio ceiling, typically from the captured PCM format. It
    /// is kept across later [`apply_config`](Self::apply_config) calls.
    pub fn set_max_audio_bitrate(&mut self, max: u32) {
        self.audio_override = Some(max);
        self.set_audio(max);
    }

    fn set_audio(&mut self, bitrate: u32) {
        if bitrate == self.audio_bitrate {
            return;
        }
        self.audio_bitrate = bitrate;
        if let Err(e) = self.sink.set_audio_bitrate(bitrate) {
            warn!("Sink rejected audio bitrate {}: {}", bitrate, e);
        }
    }

    /// Apply a whole new configuration. The warm-up window is not restarted
    /// and an audio ceiling set at runtime stays in place.
    pub fn apply_config(&mut self, config: BitrateConfig) -> Option<u32> {
        let max_video = config.max_video_bitrate;
        let audio = self.audio_override.unwrap_or(config.max_audio_bitrate);
        self.config = config;
        self.set_audio(audio);
        self.set_max_video_bitrate(max_video)
    }

    pub fn watchdog_period(&self) -> Duration {
        self.config.watchdog_period()
    }

    pub fn snapshot(&self) -> BitrateSnapshot {
        BitrateSnapshot {
            video_bitrate: self.video_bitrate,
            audio_bitrate: self.audio_bitrate,
            max_video_bitrate: self.config.max_video_bitrate,
            min_bitrate: self.config.min_bitrate,
            avg_out_bps: self.avg_out_bps.value(),
            disconnect_reported: self.disconnect_reported,
        }
    }

    pub fn video_bitrate(&self) -> u32 {
        self.video_bitrate
    }
}

fn to_bps(value: f64) -> u32 {
    if value.is_finite() {
        value.clamp(0.0, u32::MAX as f64) as u32
    } else {
        0
    }
}
