//! Pipeline error types

use thiserror::Error;

/// Errors raised by playlist, sink and scheduler operations
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No converter can produce the format a sink asked for
    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),

    /// The sink is already attached to a playlist
    #[error("sink is already attached to a playlist")]
    AlreadyAttached,

    /// The operation requires an attached sink
    #[error("sink is not attached to a playlist")]
    NotAttached,

    /// The item handle refers to a removed or never-existing item
    #[error("stale playlist item handle")]
    StaleItem,

    /// Error propagated from a media source or converter
    #[error(transparent)]
    Core(#[from] cadenza_core::CoreError),
}

/// Convenience alias for pipeline results
pub type Result<T> = std::result::Result<T, PipelineError>;
