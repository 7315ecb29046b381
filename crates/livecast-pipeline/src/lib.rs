//! LiveCast Pipeline - processing tasks and session wiring
//!
//! - `VideoProcessor`: depth control and GPU rotation for captured frames
//! - `AudioProcessor`: gain, level metering and the audio bitrate ceiling
//! - `Session`: both processors plus the bitrate controller and watchdog

pub mod audio;
pub mod clock;
pub mod session;
pub mod video;

pub use audio::{AudioProcessor, AUDIO_QUEUE_CAPACITY};
pub use clock::{HostClock, MediaClock};
pub use session::{CapturedSample, Session};
pub use video::{VideoProcessor, VideoStats, VIDEO_QUEUE_CAPACITY};
