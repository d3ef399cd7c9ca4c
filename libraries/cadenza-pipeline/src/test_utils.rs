//! Deterministic sources and converters for tests
//!
//! Available to this crate's own tests and, behind the `test-utils`
//! feature, to downstream crates' test suites.

use cadenza_core::{AudioFormat, ConvertFrames, DecodedChunk, MediaSource, Result, TagMap};

/// A pure sine tone of fixed length
///
/// Fully deterministic: the same configuration always yields the same
/// samples, which makes loudness and fingerprint results reproducible.
pub struct ToneSource {
    identifier: String,
    format: AudioFormat,
    frequency: f64,
    amplitude: f32,
    total_frames: usize,
    cursor: usize,
    tags: TagMap,
    dirty: bool,
}

impl ToneSource {
    pub fn new(format: AudioFormat, frequency: f64, amplitude: f32, seconds: f64) -> Self {
        Self {
            identifier: format!("tone://{frequency}"),
            format,
            frequency,
            amplitude,
            total_frames: (seconds * f64::from(format.sample_rate)) as usize,
            cursor: 0,
            tags: TagMap::new(),
            dirty: false,
        }
    }

    pub fn with_tags(mut self, tags: &[(&str, &str)]) -> Self {
        for (key, value) in tags {
            self.tags.set(key, Some(value));
        }
        self
    }
}

impl MediaSource for ToneSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn decoded_format(&self) -> AudioFormat {
        self.format
    }

    fn duration(&self) -> Option<f64> {
        Some(self.total_frames as f64 / f64::from(self.format.sample_rate))
    }

    fn read_chunk(&mut self, max_frames: usize) -> Result<Option<DecodedChunk>> {
        if self.cursor >= self.total_frames {
            return Ok(None);
        }
        let frames = max_frames.min(self.total_frames - self.cursor);
        let channels = self.format.channels();
        let mut samples = Vec::with_capacity(frames * channels);
        let step = std::f64::consts::TAU * self.frequency / f64::from(self.format.sample_rate);
        for frame in 0..frames {
            let t = (self.cursor + frame) as f64 * step;
            let value = self.amplitude * t.sin() as f32;
            for _ in 0..channels {
                samples.push(value);
            }
        }
        self.cursor += frames;
        Ok(Some(DecodedChunk { samples, frames }))
    }

    fn seek(&mut self, seconds: f64) -> Result<f64> {
        let frame = (seconds * f64::from(self.format.sample_rate)) as usize;
        self.cursor = frame.min(self.total_frames);
        Ok(self.cursor as f64 / f64::from(self.format.sample_rate))
    }

    fn tags(&self) -> &TagMap {
        &self.tags
    }

    fn set_tag(&mut self, key: &str, value: Option<&str>) {
        self.tags.set(key, value);
        self.dirty = true;
    }

    fn dirty(&self) -> bool {
        self.dirty
    }

    fn save(&mut self) -> Result<()> {
        self.dirty = false;
        Ok(())
    }
}

/// Nearest-neighbor converter good enough for structural tests
pub struct TestConverter;

impl ConvertFrames for TestConverter {
    fn supports(&self, _format: &AudioFormat) -> bool {
        true
    }

    fn convert(&self, samples: &[f32], from: &AudioFormat, to: &AudioFormat) -> Result<Vec<f32>> {
        if from == to {
            return Ok(samples.to_vec());
        }
        let in_ch = from.channels();
        let out_ch = to.channels();
        let in_frames = samples.len() / in_ch;
        let out_frames =
            (in_frames as u64 * u64::from(to.sample_rate) / u64::from(from.sample_rate)) as usize;
        let mut out = Vec::with_capacity(out_frames * out_ch);
        for frame in 0..out_frames {
            let src = (frame as u64 * u64::from(from.sample_rate) / u64::from(to.sample_rate))
                as usize;
            let src = src.min(in_frames.saturating_sub(1));
            let mono: f32 =
                samples[src * in_ch..src * in_ch + in_ch].iter().sum::<f32>() / in_ch as f32;
            for ch in 0..out_ch {
                if in_ch == out_ch {
                    out.push(samples[src * in_ch + ch]);
                } else {
                    out.push(mono);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) fn tone_source_for_tests() -> crate::playlist::SharedSource {
    crate::playlist::shared_source(ToneSource::new(
        AudioFormat::stereo_f32(44100),
        440.0,
        0.5,
        1.0,
    ))
}
