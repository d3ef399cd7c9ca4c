//! Cadenza Analysis
//!
//! Sink-driven playlist consumers:
//! - [`LoudnessDetector`]: per-item and aggregate EBU R128 measurement
//! - [`Fingerprinter`]: AcoustID-compatible acoustic fingerprints
//! - [`Encoder`]: containerized encoding through an [`EncodeBackend`]
//!
//! Each consumer owns a sink, a worker thread, and a bounded result queue.
//! Because the result queues are bounded, a reader that stops consuming
//! eventually stalls the decode pipeline instead of buffering without
//! limit.

#![forbid(unsafe_code)]

pub mod encode;
pub mod error;
pub mod fingerprint;
pub mod loudness;

pub use encode::{EncodeBackend, EncodedChunk, Encoder, EncoderConfig, WavBackend};
pub use error::{AnalysisError, Result};
pub use fingerprint::{
    decode_fingerprint, encode_fingerprint, FingerprintConfig, FingerprintInfo, Fingerprinter,
};
pub use loudness::{loudness_to_gain, LoudnessConfig, LoudnessDetector, LoudnessInfo};
