//! Core error types for the Cadenza pipeline

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by media sources and format converters
#[derive(Error, Debug)]
pub enum CoreError {
    /// I/O error while opening or reading a source
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Decoding error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Seek error
    #[error("Seek error: {0}")]
    Seek(String),

    /// Metadata read/write error
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A format the converter cannot produce or the source cannot deliver
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl CoreError {
    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a seek error
    pub fn seek(msg: impl Into<String>) -> Self {
        Self::Seek(msg.into())
    }

    /// Create a metadata error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create an unsupported-format error
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }
}
