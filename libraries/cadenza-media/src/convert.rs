//! Format conversion
//!
//! [`LinearConverter`] performs channel remixing (mono/stereo) and linear
//! interpolation resampling on interleaved f32 audio. Linear interpolation
//! trades a little high-frequency accuracy for statelessness: every chunk
//! converts independently, which is what the per-sink fan-out needs.

use cadenza_core::{AudioFormat, ChannelLayout, ConvertFrames, CoreError, Result};

const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 384_000;

/// Stateless linear resampler and channel remixer
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearConverter;

impl LinearConverter {
    pub fn new() -> Self {
        Self
    }

    /// Remix interleaved audio between mono and stereo
    fn remix(samples: &[f32], from: ChannelLayout, to: ChannelLayout) -> Vec<f32> {
        match (from, to) {
            (ChannelLayout::Mono, ChannelLayout::Stereo) => {
                let mut out = Vec::with_capacity(samples.len() * 2);
                for &s in samples {
                    out.push(s);
                    out.push(s);
                }
                out
            }
            (ChannelLayout::Stereo, ChannelLayout::Mono) => samples
                .chunks_exact(2)
                .map(|pair| (pair[0] + pair[1]) * 0.5)
                .collect(),
            _ => samples.to_vec(),
        }
    }

    /// Per-channel linear interpolation between sample rates
    fn resample(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
        if from_rate == to_rate {
            return samples.to_vec();
        }
        let in_frames = samples.len() / channels;
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let out_frames = (in_frames as f64 * ratio).ceil() as usize;
        let mut out = Vec::with_capacity(out_frames * channels);

        for frame in 0..out_frames {
            let src_pos = frame as f64 / ratio;
            let src_idx = src_pos.floor() as usize;
            let frac = (src_pos - src_idx as f64) as f32;
            for ch in 0..channels {
                let a = sample_at(samples, channels, in_frames, src_idx, ch);
                let b = sample_at(samples, channels, in_frames, src_idx + 1, ch);
                out.push(a * (1.0 - frac) + b * frac);
            }
        }
        out
    }
}

fn sample_at(samples: &[f32], channels: usize, frames: usize, frame: usize, ch: usize) -> f32 {
    if frame >= frames {
        // Hold the last frame past the end of the chunk
        if frames == 0 {
            return 0.0;
        }
        return samples[(frames - 1) * channels + ch];
    }
    samples[frame * channels + ch]
}

impl ConvertFrames for LinearConverter {
    fn supports(&self, format: &AudioFormat) -> bool {
        (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&format.sample_rate)
    }

    fn convert(&self, samples: &[f32], from: &AudioFormat, to: &AudioFormat) -> Result<Vec<f32>> {
        if !self.supports(from) || !self.supports(to) {
            return Err(CoreError::unsupported_format(format!(
                "cannot convert {from} to {to}"
            )));
        }
        if from == to {
            return Ok(samples.to_vec());
        }
        let remixed = Self::remix(samples, from.layout, to.layout);
        Ok(Self::resample(
            &remixed,
            to.channels(),
            from.sample_rate,
            to.sample_rate,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_conversion_is_lossless() {
        let fmt = AudioFormat::stereo_f32(44100);
        let samples = vec![0.1, -0.1, 0.2, -0.2];
        let out = LinearConverter::new()
            .convert(&samples, &fmt, &fmt)
            .unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let out = LinearConverter::new()
            .convert(
                &[0.5, -0.5],
                &AudioFormat::mono_f32(44100),
                &AudioFormat::stereo_f32(44100),
            )
            .unwrap();
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let out = LinearConverter::new()
            .convert(
                &[1.0, 0.0, 0.0, 1.0],
                &AudioFormat::stereo_f32(44100),
                &AudioFormat::mono_f32(44100),
            )
            .unwrap();
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn downsampling_halves_frame_count() {
        let from = AudioFormat::mono_f32(44100);
        let to = AudioFormat::mono_f32(22050);
        let samples = vec![0.0; 4410];
        let out = LinearConverter::new().convert(&samples, &from, &to).unwrap();
        assert_eq!(out.len(), 2205);
    }

    #[test]
    fn upsampling_interpolates_between_frames() {
        let from = AudioFormat::mono_f32(22050);
        let to = AudioFormat::mono_f32(44100);
        let out = LinearConverter::new()
            .convert(&[0.0, 1.0], &from, &to)
            .unwrap();
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let converter = LinearConverter::new();
        assert!(!converter.supports(&AudioFormat::mono_f32(4000)));
        assert!(converter
            .convert(
                &[0.0],
                &AudioFormat::mono_f32(4000),
                &AudioFormat::mono_f32(44100)
            )
            .is_err());
    }
}
