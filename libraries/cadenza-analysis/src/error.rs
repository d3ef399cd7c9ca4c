//! Error types for analysis and encoding consumers

use thiserror::Error;

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur in the loudness, fingerprint and encode consumers
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// EBU R128 analysis failed
    #[error("loudness analysis failed: {0}")]
    Loudness(String),

    /// Chromaprint fingerprinting failed
    #[error("fingerprinting failed: {0}")]
    Fingerprint(String),

    /// Encoding failed
    #[error("encoding failed: {0}")]
    Encode(String),

    /// The consumer is already attached to a playlist
    #[error("consumer is already attached to a playlist")]
    AlreadyAttached,

    /// The operation requires an attached consumer
    #[error("consumer is not attached to a playlist")]
    NotAttached,

    /// Error propagated from the pipeline
    #[error(transparent)]
    Pipeline(#[from] cadenza_pipeline::PipelineError),
}

impl From<ebur128::Error> for AnalysisError {
    fn from(err: ebur128::Error) -> Self {
        Self::Loudness(format!("{err:?}"))
    }
}

impl From<hound::Error> for AnalysisError {
    fn from(err: hound::Error) -> Self {
        Self::Encode(err.to_string())
    }
}
