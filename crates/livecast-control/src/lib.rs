//! LiveCast Control - feedback controllers for the outbound stream
//!
//! - `BufferDepthController`: learns the send queue depth from FPS and
//!   render latency
//! - `BitrateController`: adjusts the video encoder ceiling from network
//!   status reports, with a warm-up window and a disconnect watchdog
//! - `BitrateHandle`: serializes access to the bitrate controller through
//!   its own task

pub mod bitrate;
pub mod buffer_depth;
pub mod ema;
pub mod handle;

pub use bitrate::{bytes_to_kbps, BitrateController, BitrateSnapshot, DisconnectCallback};
pub use buffer_depth::{initial_depth_for, BufferDepthController, DepthTrend, PerformanceHistory};
pub use ema::Ema;
pub use handle::{spawn_watchdog, BitrateCommand, BitrateHandle};
