//! Gain and level measurement on captured audio frames.
//!
//! Only 16-bit integer and 32-bit float samples are understood. Blocks in
//! any other encoding are passed through by [`apply_gain`] and make
//! [`measure_rms`] give up.

use livecast_core::{AudioFormat, AudioFrame, SampleBlock};

/// Exponent of the UI volume curve.
pub const VOLUME_CURVE_EXPONENT: f64 = 2.5;

/// Multiply every sample by `gain`, saturating at the format's range.
///
/// A non-finite gain counts as unity.
pub fn apply_gain(mut frame: AudioFrame, gain: f32) -> AudioFrame {
    let gain = if gain.is_finite() { gain } else { 1.0 };
    if gain == 1.0 {
        return frame;
    }

    for block in frame.blocks.iter_mut() {
        match block {
            SampleBlock::I16(samples) => {
                for s in samples.iter_mut() {
                    *s = (*s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                }
            }
            SampleBlock::F32(samples) => {
                for s in samples.iter_mut() {
                    *s = (*s * gain).clamp(-1.0, 1.0);
                }
            }
            SampleBlock::Raw { .. } => {}
        }
    }
    frame
}

/// Root mean square over all blocks, normalized to full scale.
///
/// Returns `None` when the frame holds no samples, carries a raw block or
/// the result is not a number.
pub fn measure_rms(frame: &AudioFrame) -> Option<f32> {
    let mut sum = 0.0f64;
    let mut count = 0usize;

    for block in &frame.blocks {
        match block {
            SampleBlock::I16(samples) => {
                let full_scale = i16::MAX as f64;
                sum += samples
                    .iter()
                    .map(|&s| {
                        let x = s as f64 / full_scale;
                        x * x
                    })
                    .sum::<f64>();
                count += samples.len();
            }
            SampleBlock::F32(samples) => {
                sum += samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
                count += samples.len();
            }
            SampleBlock::Raw { .. } => return None,
        }
    }

    if count == 0 {
        return None;
    }
    let rms = (sum / count as f64).sqrt() as f32;
    rms.is_finite().then(|| rms.clamp(0.0, 1.0))
}

/// Map a UI slider position in `[0, 1]` onto a linear volume.
pub fn percentage_to_volume(percentage: f64) -> f64 {
    percentage.clamp(0.0, 1.0).powf(VOLUME_CURVE_EXPONENT)
}

/// Inverse of [`percentage_to_volume`].
pub fn volume_to_percentage(volume: f64) -> f64 {
    volume.clamp(0.0, 1.0).powf(VOLUME_CURVE_EXPONENT.recip())
}

/// Uncompressed bitrate of a PCM stream in bits per second.
pub fn pcm_bitrate(format: &AudioFormat) -> u32 {
    format
        .sample_rate
        .saturating_mul(format.sample_format.bits_per_sample() as u32)
        .saturating_mul(format.channels as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecast_core::SampleFormat;

    #[test]
    fn test_gain_scales_i16() {
        let frame = AudioFrame::from_i16(48_000, 2, vec![100, -100, 1000, 0]);
        let out = apply_gain(frame, 2.0);
        assert_eq!(out.blocks[0], SampleBlock::I16(vec![200, -200, 2000, 0]));
    }

    #[test]
    fn test_gain_saturates() {
        let frame = AudioFrame::from_i16(48_000, 1, vec![20_000, -20_000]);
        let out = apply_gain(frame, 4.0);
        assert_eq!(out.blocks[0], SampleBlock::I16(vec![i16::MAX, i16::MIN]));

        let frame = AudioFrame::from_f32(48_000, 1, vec![0.5, -0.75, 0.1]);
        let out = apply_gain(frame, 3.0);
        match &out.blocks[0] {
            SampleBlock::F32(s) => {
                assert_eq!(s[0], 1.0);
                assert_eq!(s[1], -1.0);
                assert!((s[2] - 0.3).abs() < 1e-6);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_gain_is_unity() {
        let frame = AudioFrame::from_i16(48_000, 2, vec![1, 2, 3, 4]);
        assert_eq!(apply_gain(frame.clone(), f32::INFINITY), frame);
        assert_eq!(apply_gain(frame.clone(), f32::NAN), frame);
        assert_eq!(apply_gain(frame.clone(), 1.0), frame);
    }

    #[test]
    fn test_raw_blocks_untouched() {
        let mut frame = AudioFrame::from_i16(48_000, 1, vec![10]);
        frame.blocks.push(SampleBlock::Raw {
            bits_per_sample: 24,
            bytes: vec![1, 2, 3],
        });
        let out = apply_gain(frame, 0.5);
        assert_eq!(out.blocks[0], SampleBlock::I16(vec![5]));
        assert_eq!(
            out.blocks[1],
            SampleBlock::Raw {
                bits_per_sample: 24,
                bytes: vec![1, 2, 3],
            }
        );
    }

    #[test]
    fn test_rms_full_scale_square() {
        let frame = AudioFrame::from_i16(48_000, 1, vec![i16::MAX, -i16::MAX, i16::MAX, -i16::MAX]);
        let rms = measure_rms(&frame).unwrap();
        assert!((rms - 1.0).abs() < 1e-6);

        let frame = AudioFrame::from_f32(48_000, 1, vec![0.5, -0.5]);
        assert!((measure_rms(&frame).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_clamped() {
        // Out-of-range floats still report at most full scale.
        let frame = AudioFrame::from_f32(48_000, 1, vec![4.0, -4.0]);
        assert_eq!(measure_rms(&frame), Some(1.0));
    }

    #[test]
    fn test_rms_none_cases() {
        let empty = AudioFrame::from_i16(48_000, 2, Vec::new());
        assert_eq!(measure_rms(&empty), None);

        let mut raw = AudioFrame::from_i16(48_000, 1, vec![100; 8]);
        raw.blocks.push(SampleBlock::Raw {
            bits_per_sample: 24,
            bytes: vec![0; 6],
        });
        assert_eq!(measure_rms(&raw), None);

        let nan = AudioFrame::from_f32(48_000, 1, vec![f32::NAN]);
        assert_eq!(measure_rms(&nan), None);
    }

    #[test]
    fn test_volume_curve() {
        assert_eq!(percentage_to_volume(0.0), 0.0);
        assert_eq!(percentage_to_volume(1.0), 1.0);
        assert_eq!(percentage_to_volume(2.0), 1.0);
        assert_eq!(percentage_to_volume(-1.0), 0.0);
        assert!((percentage_to_volume(0.5) - 0.5f64.powf(2.5)).abs() < 1e-12);

        for p in [0.1, 0.25, 0.5, 0.9] {
            let back = volume_to_percentage(percentage_to_volume(p));
            assert!((back - p).abs() < 1e-9, "{p} -> {back}");
        }
    }

    #[test]
    fn test_pcm_bitrate() {
        let format = AudioFormat::default();
        assert_eq!(pcm_bitrate(&format), 48_000 * 16 * 2);

        let format = AudioFormat {
            sample_rate: 44_100,
            channels: 1,
            sample_format: SampleFormat::Other { bits_per_sample: 24 },
        };
        assert_eq!(pcm_bitrate(&format), 44_100 * 24);
    }
}
