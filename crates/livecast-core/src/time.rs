//! Media timestamps for captured samples.
//!
//! Capture sources deliver presentation timestamps as rational values
//! (value / timescale). Keeping them rational avoids drift when durations
//! are accumulated over long sessions.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// A point in media time, in seconds, stored as a rational number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MediaTime {
    value: Rational64,
}

impl MediaTime {
    /// Create a new MediaTime of `value / timescale` seconds.
    ///
    /// A zero timescale yields [`MediaTime::ZERO`].
    #[inline]
    pub fn new(value: i64, timescale: i64) -> Self {
        if timescale == 0 {
            return Self::ZERO;
        }
        Self {
            value: Rational64::new(value, timescale),
        }
    }

    /// Create a MediaTime from seconds as a float.
    /// Note: May introduce small precision errors.
    pub fn from_seconds_f64(seconds: f64) -> Self {
        const PRECISION: i64 = 1_000_000;
        if !seconds.is_finite() {
            return Self::ZERO;
        }
        Self {
            value: Rational64::new((seconds * PRECISION as f64).round() as i64, PRECISION),
        }
    }

    /// Convert to seconds as f64.
    #[inline]
    pub fn to_seconds_f64(self) -> f64 {
        *self.value.numer() as f64 / *self.value.denom() as f64
    }

    /// Zero time constant.
    pub const ZERO: Self = Self {
        value: Rational64::new_raw(0, 1),
    };

    /// Check if this time is zero.
    #[inline]
    pub fn is_zero(self) -> bool {
        *self.value.numer() == 0
    }

    /// Whether this time lies strictly after zero.
    #[inline]
    pub fn is_positive(self) -> bool {
        *self.value.numer() > 0
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for MediaTime {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
        }
    }
}

impl Sub for MediaTime {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
        }
    }
}

impl Mul<i64> for MediaTime {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        Self {
            value: self.value * rhs,
        }
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.to_seconds_f64())
    }
}

/// Frame rate as a rational number (e.g., 30000/1001 for 29.97 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Convert to frames per second as f64.
    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Duration of a single frame.
    #[inline]
    pub fn frame_duration(self) -> MediaTime {
        MediaTime::new(self.denominator as i64, self.numerator as i64)
    }

    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

/// Timing metadata carried by every captured sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleTiming {
    /// Presentation timestamp.
    pub pts: MediaTime,
    /// Declared sample duration, when the source provides one.
    pub duration: Option<MediaTime>,
}

impl SampleTiming {
    pub fn new(pts: MediaTime, duration: Option<MediaTime>) -> Self {
        Self { pts, duration }
    }

    /// Declared duration in seconds, if positive.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration
            .filter(|d| d.is_positive())
            .map(MediaTime::to_seconds_f64)
    }
}
