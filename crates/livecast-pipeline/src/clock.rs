//! Host clock shared by capture timestamps and latency measurement.

use tokio::time::Instant;

/// Seconds on the same time base as captured presentation timestamps.
pub trait MediaClock: Send + Sync + 'static {
    fn now_secs(&self) -> f64;
}

/// Monotonic seconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    epoch: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock for HostClock {
    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}
