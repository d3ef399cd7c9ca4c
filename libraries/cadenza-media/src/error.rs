//! Error types for media decoding and tag persistence

use cadenza_core::CoreError;
use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Errors that can occur while opening, decoding or tagging media files
#[derive(Debug, Error)]
pub enum MediaError {
    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Container probing failed
    #[error("failed to probe file: {0}")]
    Probe(String),

    /// The container has no decodable audio track
    #[error("no audio tracks found in {0}")]
    NoAudioTrack(String),

    /// Unrecoverable decode failure
    #[error("decode error: {0}")]
    Decode(String),

    /// Seek failure
    #[error("seek error: {0}")]
    Seek(String),

    /// Tag read or write failure
    #[error("tag error: {0}")]
    Tag(#[from] lofty::error::LoftyError),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for CoreError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Io(io) => CoreError::Io(io),
            MediaError::FileNotFound(path) => {
                CoreError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, path))
            }
            MediaError::Probe(msg) | MediaError::NoAudioTrack(msg) => {
                CoreError::unsupported_format(msg)
            }
            MediaError::Decode(msg) => CoreError::decode(msg),
            MediaError::Seek(msg) => CoreError::seek(msg),
            MediaError::Tag(err) => CoreError::metadata(err.to_string()),
        }
    }
}
