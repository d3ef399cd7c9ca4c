//! Audio format descriptions
//!
//! Every buffer flowing through the pipeline carries an [`AudioFormat`].
//! Decoded audio is always interleaved `f32` in memory; the sample format
//! recorded here describes the *logical* format, which matters for
//! `bytes_per_sec` accounting and for encoder output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical sample format of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit
    S16,
    /// Signed 32-bit
    S32,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Channel layout of an audio stream
///
/// The pipeline downmixes everything beyond stereo at the decode boundary,
/// so only mono and stereo flow through sink queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// Single channel
    Mono,
    /// Two channels, interleaved L R L R ...
    Stereo,
}

impl ChannelLayout {
    /// Number of channels in the layout
    pub fn count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }

    /// Layout for a channel count, if representable
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

/// Complete audio format: sample rate, channel layout and sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel layout
    pub layout: ChannelLayout,
    /// Logical sample format
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Create a new format
    pub const fn new(sample_rate: u32, layout: ChannelLayout, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            layout,
            sample_format,
        }
    }

    /// Interleaved stereo f32 at the given rate
    pub const fn stereo_f32(sample_rate: u32) -> Self {
        Self::new(sample_rate, ChannelLayout::Stereo, SampleFormat::F32)
    }

    /// Mono f32 at the given rate
    pub const fn mono_f32(sample_rate: u32) -> Self {
        Self::new(sample_rate, ChannelLayout::Mono, SampleFormat::F32)
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.layout.count()
    }

    /// Size of one frame (one sample per channel) in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.channels() * self.sample_format.bytes_per_sample()
    }

    /// Data rate in bytes per second
    pub fn bytes_per_sec(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz {:?} {:?}",
            self.sample_rate, self.layout, self.sample_format
        )
    }
}
