//! Cadenza Pipeline
//!
//! The playlist-driven decode pipeline: an ordered playlist of media
//! sources, a background decode scheduler, and any number of attached
//! sinks each receiving the same audio converted to its own format.
//!
//! The flow is pull-through-queues:
//!
//! ```text
//! Playlist (decode thread) --> Sink queue --> consumer
//!                          \-> Sink queue --> consumer
//! ```
//!
//! Backpressure is governed by the playlist's [`FillMode`]: by default the
//! decode loop runs while any sink has room; in
//! [`FillMode::AnySinkFull`] it stalls the moment one sink is full, which
//! keeps every consumer within one queue's worth of the slowest.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod error;
pub mod playlist;
pub mod queue;
pub mod sink;
mod scheduler;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use buffer::FrameBuffer;
pub use error::{PipelineError, Result};
pub use playlist::{shared_source, FillMode, ItemId, PipelineContext, Playlist, SharedSource};
pub use queue::{BlockingQueue, GetResult, QueueWeight};
pub use sink::{Sink, SinkConfig, SinkEvents};
