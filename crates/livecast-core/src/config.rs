//! Pipeline configuration.
//!
//! Every field has a default so a partial JSON document is enough. Runtime
//! changes are delivered to the processing tasks as whole new values over a
//! `tokio::sync::watch` channel owned by the embedding session.

use crate::error::{LiveCastError, Result};
use crate::frame::RotationAngle;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Resampling kernel used when the destination size differs from the
/// rotated source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    Nearest,
    #[default]
    Bicubic,
}

/// Rotation engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub angle: RotationAngle,
    /// Forced output width; 0 keeps the rotated source size.
    pub output_width: u32,
    /// Forced output height; 0 keeps the rotated source size.
    pub output_height: u32,
    pub resampling: Resampling,
    /// Per-frame diagnostic logging.
    pub debug: bool,
    pub max_pool_size: usize,
    /// Concurrent GPU submissions; `None` derives it from the CPU count.
    pub max_inflight: Option<usize>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            angle: RotationAngle::Deg90,
            output_width: 0,
            output_height: 0,
            resampling: Resampling::Bicubic,
            debug: false,
            max_pool_size: 20,
            max_inflight: None,
        }
    }
}

impl RotationConfig {
    /// The explicit output size, when both dimensions are set.
    pub fn output_override(&self) -> Option<(u32, u32)> {
        (self.output_width > 0 && self.output_height > 0)
            .then_some((self.output_width, self.output_height))
    }
}

/// Buffer depth controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub min_depth: usize,
    pub max_depth: usize,
    /// Starting depth; `None` derives it from the CPU count.
    pub initial_depth: Option<usize>,
    pub adjust_interval_secs: f64,
    pub log_interval_secs: f64,
    /// Fixed target frame rate; `None` follows each frame's declared duration.
    pub fixed_target_fps: Option<f64>,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            min_depth: 3,
            max_depth: 5,
            initial_depth: None,
            adjust_interval_secs: 3.0,
            log_interval_secs: 3.0,
            fixed_target_fps: Some(30.0),
        }
    }
}

impl DepthConfig {
    pub fn adjust_interval(&self) -> Duration {
        Duration::from_secs_f64(self.adjust_interval_secs.max(0.0))
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs_f64(self.log_interval_secs.max(0.0))
    }
}

/// Bitrate controller settings. Rates are bits per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateConfig {
    pub max_video_bitrate: u32,
    pub max_audio_bitrate: u32,
    pub min_bitrate: u32,
    pub warmup_secs: f64,
    pub disconnect_timeout_secs: f64,
    pub watchdog_period_secs: f64,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            max_video_bitrate: 4_000_000,
            max_audio_bitrate: 128_000,
            min_bitrate: 2_000_000,
            warmup_secs: 10.0,
            disconnect_timeout_secs: 5.0,
            watchdog_period_secs: 1.0,
        }
    }
}

impl BitrateConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs_f64(self.warmup_secs.max(0.0))
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.disconnect_timeout_secs.max(0.0))
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_period_secs.max(0.001))
    }
}

/// Audio side-chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Gain applied to app audio before it reaches the sink.
    pub app_gain: f32,
    /// Gain applied to microphone audio before it reaches the sink.
    pub mic_gain: f32,
    /// Monitoring volume multiplied into the published app level.
    pub app_volume: f32,
    /// Monitoring volume multiplied into the published mic level.
    pub mic_volume: f32,
    /// Publish RMS levels.
    pub metering: bool,
    pub meter_interval_secs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            app_gain: 1.0,
            mic_gain: 1.0,
            app_volume: 1.0,
            mic_volume: 1.0,
            metering: true,
            meter_interval_secs: 0.1,
        }
    }
}

impl AudioConfig {
    pub fn meter_interval(&self) -> Duration {
        Duration::from_secs_f64(self.meter_interval_secs.max(0.0))
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rotation: RotationConfig,
    pub depth: DepthConfig,
    pub bitrate: BitrateConfig,
    pub audio: AudioConfig,
}

impl PipelineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject combinations the controllers cannot work with.
    pub fn validate(&self) -> Result<()> {
        let depth = &self.depth;
        if depth.min_depth == 0 || depth.min_depth > depth.max_depth {
            return Err(LiveCastError::Config(format!(
                "depth bounds must satisfy 0 < min <= max, got {}..={}",
                depth.min_depth, depth.max_depth
            )));
        }
        if !(depth.adjust_interval_secs.is_finite() && depth.log_interval_secs.is_finite()) {
            return Err(LiveCastError::Config("depth intervals must be finite".into()));
        }
        if let Some(fps) = depth.fixed_target_fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(LiveCastError::Config(format!(
                    "fixed target fps must be positive, got {fps}"
                )));
            }
        }

        let bitrate = &self.bitrate;
        if bitrate.min_bitrate > bitrate.max_video_bitrate {
            return Err(LiveCastError::Config(format!(
                "min bitrate {} exceeds max video bitrate {}",
                bitrate.min_bitrate, bitrate.max_video_bitrate
            )));
        }
        let durations = [
            bitrate.warmup_secs,
            bitrate.disconnect_timeout_secs,
            bitrate.watchdog_period_secs,
            self.audio.meter_interval_secs,
        ];
        if durations.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(LiveCastError::Config(
                "durations must be finite and non-negative".into(),
            ));
        }

        if (self.rotation.output_width == 0) != (self.rotation.output_height == 0) {
            return Err(LiveCastError::Config(
                "output width and height must both be set or both be 0".into(),
            ));
        }
        Ok(())
    }
}
