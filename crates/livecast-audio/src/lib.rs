//! LiveCast Audio - audio side-chain
//!
//! - `level`: gain, RMS, volume curve and PCM bitrate helpers
//! - `meter`: throttled per-track level publisher

pub mod level;
pub mod meter;

pub use level::{apply_gain, measure_rms, pcm_bitrate, percentage_to_volume, volume_to_percentage};
pub use meter::{AudioLevels, LevelMeter};
