//! Collaborator traits
//!
//! The pipeline core delegates all decoding and format conversion to
//! collaborators behind these traits. `cadenza-media` provides the real
//! implementations (Symphonia decode, linear conversion); tests substitute
//! deterministic stubs.

use crate::error::Result;
use crate::format::AudioFormat;
use crate::tags::TagMap;

/// One decoded chunk of interleaved `f32` audio in the source's decoded format
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    /// Interleaved samples, `frames * channels` long
    pub samples: Vec<f32>,
    /// Number of frames in the chunk
    pub frames: usize,
}

/// An opened, decodable media resource
///
/// Implementations own their decode-level state. The playlist holds sources
/// behind shared handles but never closes them; the caller controls source
/// lifetime.
pub trait MediaSource: Send {
    /// Identifier the source was opened from (path or URI)
    fn identifier(&self) -> &str;

    /// Format of chunks produced by [`read_chunk`](Self::read_chunk)
    fn decoded_format(&self) -> AudioFormat;

    /// Best-effort duration in seconds, derived from headers and heuristics
    fn duration(&self) -> Option<f64>;

    /// Decode up to `max_frames` frames
    ///
    /// Returns `Ok(None)` at end of source. Recoverable decode errors are
    /// the implementation's concern; an `Err` here means the chunk should be
    /// skipped, not that the source is dead.
    fn read_chunk(&mut self, max_frames: usize) -> Result<Option<DecodedChunk>>;

    /// Seek to the given position, returning the actual position reached
    fn seek(&mut self, seconds: f64) -> Result<f64>;

    /// Current tag set
    fn tags(&self) -> &TagMap;

    /// Set a tag (`None` deletes); marks the source dirty
    fn set_tag(&mut self, key: &str, value: Option<&str>);

    /// True if there are unsaved tag edits
    fn dirty(&self) -> bool;

    /// Persist tag edits back to the underlying resource
    fn save(&mut self) -> Result<()>;
}

/// Audio format converter (channel remix + resample)
pub trait ConvertFrames: Send + Sync {
    /// True if the converter can produce the given target format
    fn supports(&self, format: &AudioFormat) -> bool;

    /// Convert interleaved samples from one format to another
    fn convert(&self, samples: &[f32], from: &AudioFormat, to: &AudioFormat) -> Result<Vec<f32>>;
}
