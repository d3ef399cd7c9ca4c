//! Cadenza Core
//!
//! Shared types, collaborator traits, and error handling for the Cadenza
//! audio pipeline.
//!
//! This crate defines:
//! - **Audio types**: [`AudioFormat`], [`SampleFormat`], [`ChannelLayout`]
//! - **Collaborator traits**: [`MediaSource`] (decode side), [`ConvertFrames`]
//!   (format conversion side)
//! - **Gain math**: dB/linear conversion and clipping-safe gain application
//! - **Tag handling**: ordered, case-insensitive [`TagMap`]
//! - **Error handling**: unified [`CoreError`] and [`Result`] types

#![forbid(unsafe_code)]

pub mod error;
pub mod format;
pub mod gain;
pub mod tags;
pub mod traits;

pub use error::{CoreError, Result};
pub use gain::{apply_gain, db_to_linear, linear_to_db};
pub use format::{AudioFormat, ChannelLayout, SampleFormat};
pub use tags::TagMap;
pub use traits::{ConvertFrames, DecodedChunk, MediaSource};
