//! Audio sample buffers delivered by the capture source.

use crate::time::SampleTiming;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Which capture track an audio frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AudioTrack {
    /// Audio produced by the captured application.
    App = 0,
    /// Microphone input.
    Mic = 1,
}

impl AudioTrack {
    pub const ALL: [AudioTrack; 2] = [Self::App, Self::Mic];

    pub fn name(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Mic => "mic",
        }
    }
}

/// Sample encoding of an audio block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    I16,
    F32,
    /// Anything else; only the bit depth is known.
    Other { bits_per_sample: u16 },
}

impl SampleFormat {
    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::I16 => 16,
            Self::F32 => 32,
            Self::Other { bits_per_sample } => bits_per_sample,
        }
    }
}

/// One buffer of interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBlock {
    I16(Vec<i16>),
    F32(Vec<f32>),
    /// Samples in a format the pipeline cannot classify.
    Raw { bits_per_sample: u16, bytes: Vec<u8> },
}

impl SampleBlock {
    pub fn format(&self) -> SampleFormat {
        match self {
            Self::I16(_) => SampleFormat::I16,
            Self::F32(_) => SampleFormat::F32,
            Self::Raw {
                bits_per_sample, ..
            } => SampleFormat::Other {
                bits_per_sample: *bits_per_sample,
            },
        }
    }

    /// Number of samples, or `None` for raw blocks.
    pub fn sample_count(&self) -> Option<usize> {
        match self {
            Self::I16(s) => Some(s.len()),
            Self::F32(s) => Some(s.len()),
            Self::Raw { .. } => None,
        }
    }
}

/// Stream description of an audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::I16,
        }
    }
}

/// A captured audio frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    /// One block for interleaved audio, one per channel for planar audio.
    pub blocks: SmallVec<[SampleBlock; 2]>,
    pub timing: Option<SampleTiming>,
}

impl AudioFrame {
    /// Interleaved 16-bit frame.
    pub fn from_i16(sample_rate: u32, channels: u16, samples: Vec<i16>) -> Self {
        Self {
            format: AudioFormat {
                sample_rate,
                channels,
                sample_format: SampleFormat::I16,
            },
            blocks: smallvec::smallvec![SampleBlock::I16(samples)],
            timing: None,
        }
    }

    /// Interleaved float frame.
    pub fn from_f32(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            format: AudioFormat {
                sample_rate,
                channels,
                sample_format: SampleFormat::F32,
            },
            blocks: smallvec::smallvec![SampleBlock::F32(samples)],
            timing: None,
        }
    }

    pub fn with_timing(mut self, timing: SampleTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Total samples across all blocks, `None` if any block is raw.
    pub fn sample_count(&self) -> Option<usize> {
        self.blocks.iter().map(SampleBlock::sample_count).sum()
    }
}
