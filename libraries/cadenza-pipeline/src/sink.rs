//! Sinks
//!
//! A [`Sink`] is an attachment point through which a consumer drains audio
//! from a playlist. Each sink names the format it wants, holds a bounded
//! queue of converted frame buffers, and exposes lifecycle hooks
//! ([`SinkEvents`]) that the playlist fires on flush, purge, play and
//! pause. Consumers block on [`Sink::get_buffer`]; the decode scheduler
//! fills every attached sink from a single pass over the source.

use crate::buffer::FrameBuffer;
use crate::error::{PipelineError, Result};
use crate::playlist::{ItemId, Playlist, Shared};
use crate::queue::{BlockingQueue, GetResult};
use cadenza_core::AudioFormat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Lifecycle notifications delivered to a sink's consumer
///
/// Hooks run on the thread performing the playlist operation and must not
/// block.
pub trait SinkEvents: Send + Sync {
    /// The sink's queue was flushed (seek or manual flush)
    fn on_flush(&self) {}
    /// Buffers for `item` were purged because the item was removed
    fn on_purge(&self, item: ItemId) {
        let _ = item;
    }
    /// The playlist transitioned to paused
    fn on_pause(&self) {}
    /// The playlist transitioned to playing
    fn on_play(&self) {}
}

/// Sink configuration
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Format the consumer wants buffers in
    pub format: AudioFormat,
    /// Deliver buffers in each source's decoded format instead of converting
    pub disable_resample: bool,
    /// Per-sink gain (linear)
    pub gain: f64,
    /// Queue capacity in frames
    pub capacity_frames: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::stereo_f32(44100),
            disable_resample: false,
            gain: 1.0,
            capacity_frames: 8192,
        }
    }
}

/// State shared between a sink handle, its playlist and the scheduler
pub(crate) struct SinkShared {
    format: AudioFormat,
    disable_resample: bool,
    gain: Mutex<f64>,
    queue: BlockingQueue<FrameBuffer>,
    events: Mutex<Option<Arc<dyn SinkEvents>>>,
    playlist: Mutex<Option<Weak<Shared>>>,
    /// Set once the end-of-stream sentinel has been delivered
    ended: AtomicBool,
}

impl SinkShared {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn pass_through(&self) -> bool {
        self.disable_resample
    }

    pub fn gain(&self) -> f64 {
        *self.gain.lock().unwrap()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Non-blocking enqueue from the scheduler; fullness is handled by the
    /// playlist's fill mode, not here
    pub fn push_buffer(&self, buffer: FrameBuffer) {
        self.queue.push(buffer);
    }

    pub fn purge_item(&self, item: ItemId) -> usize {
        self.queue.purge(|b| b.item() == Some(item)).len()
    }

    pub fn flush_queue(&self) -> usize {
        let dropped = self.queue.flush();
        self.fire_flush();
        dropped
    }

    pub fn abort_queue(&self) {
        self.queue.abort();
    }

    pub fn fire_flush(&self) {
        if let Some(events) = self.events.lock().unwrap().clone() {
            events.on_flush();
        }
    }

    pub fn fire_purge(&self, item: ItemId) {
        if let Some(events) = self.events.lock().unwrap().clone() {
            events.on_purge(item);
        }
    }

    pub fn fire_play(&self) {
        if let Some(events) = self.events.lock().unwrap().clone() {
            events.on_play();
        }
    }

    pub fn fire_pause(&self) {
        if let Some(events) = self.events.lock().unwrap().clone() {
            events.on_pause();
        }
    }
}

/// A consumer's attachment point on a playlist
pub struct Sink {
    shared: Arc<SinkShared>,
}

impl Sink {
    /// Create a detached sink
    pub fn new(config: SinkConfig) -> Self {
        Self {
            shared: Arc::new(SinkShared {
                format: config.format,
                disable_resample: config.disable_resample,
                gain: Mutex::new(config.gain),
                queue: BlockingQueue::bounded(config.capacity_frames.max(1)),
                events: Mutex::new(None),
                playlist: Mutex::new(None),
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// Install the consumer's lifecycle hooks
    pub fn set_events(&self, events: impl SinkEvents + 'static) {
        *self.shared.events.lock().unwrap() = Some(Arc::new(events));
    }

    /// Attach to a playlist and start receiving buffers
    ///
    /// # Errors
    ///
    /// [`PipelineError::AlreadyAttached`] if the sink is attached, or
    /// [`PipelineError::FormatNegotiation`] if no converter can produce the
    /// requested format.
    pub fn attach(&self, playlist: &Playlist) -> Result<()> {
        let mut attached = self.shared.playlist.lock().unwrap();
        if attached.is_some() {
            return Err(PipelineError::AlreadyAttached);
        }
        self.shared.queue.reset();
        self.shared.ended.store(false, Ordering::SeqCst);
        playlist.register_sink(Arc::clone(&self.shared))?;
        *attached = Some(Arc::downgrade(playlist.shared_handle()));
        tracing::debug!(format = %self.shared.format, "sink attached");
        Ok(())
    }

    /// Detach from the playlist
    ///
    /// Drops all queued buffers; any blocked [`get_buffer`](Self::get_buffer)
    /// call observes [`GetResult::End`].
    pub fn detach(&self) -> Result<()> {
        let mut attached = self.shared.playlist.lock().unwrap();
        let weak = attached.take().ok_or(PipelineError::NotAttached)?;
        if let Some(shared) = weak.upgrade() {
            Playlist::unregister_sink(&shared, &self.shared);
        }
        self.shared.queue.abort();
        tracing::debug!("sink detached");
        Ok(())
    }

    /// True while attached to a playlist
    pub fn is_attached(&self) -> bool {
        self.shared.playlist.lock().unwrap().is_some()
    }

    /// Dequeue the next buffer
    ///
    /// With `block = false` this returns [`GetResult::NotReady`] instead of
    /// waiting. Delivery of the end-of-stream sentinel surfaces as
    /// [`GetResult::End`] and latches [`reached_end`](Self::reached_end);
    /// once ended, every further call returns `End` until re-attach.
    pub fn get_buffer(&self, block: bool) -> GetResult<FrameBuffer> {
        if self.shared.ended.load(Ordering::SeqCst) {
            return GetResult::End;
        }
        let result = match self.shared.queue.get(block) {
            GetResult::Ready(buffer) => {
                if buffer.is_end_of_stream() {
                    self.shared.ended.store(true, Ordering::SeqCst);
                    GetResult::End
                } else {
                    GetResult::Ready(buffer)
                }
            }
            other => other,
        };
        self.notify_drain();
        result
    }

    /// Report buffer availability without consuming
    pub fn buffer_peek(&self, block: bool) -> bool {
        if self.shared.ended.load(Ordering::SeqCst) {
            return false;
        }
        self.shared.queue.peek(block)
    }

    /// True once the end-of-stream sentinel has been delivered
    ///
    /// Distinguishes a playlist that genuinely ran out of items from a
    /// detach, which also surfaces `End` from `get_buffer`.
    pub fn reached_end(&self) -> bool {
        self.shared.ended.load(Ordering::SeqCst)
    }

    /// Drop all queued buffers and fire `on_flush`
    pub fn flush(&self) -> usize {
        let dropped = self.shared.flush_queue();
        self.notify_drain();
        dropped
    }

    /// Format buffers are delivered in (unless pass-through is enabled)
    pub fn format(&self) -> AudioFormat {
        self.shared.format
    }

    /// Per-sink gain (linear)
    pub fn gain(&self) -> f64 {
        self.shared.gain()
    }

    /// Set per-sink gain (linear); applies to buffers produced afterwards
    pub fn set_gain(&self, gain: f64) {
        *self.shared.gain.lock().unwrap() = gain;
    }

    /// Bytes of queued audio per second at the sink's format
    pub fn bytes_per_sec(&self) -> u64 {
        self.shared.format.bytes_per_sec()
    }

    /// Number of buffers currently queued
    pub fn buffers_queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Total frames currently queued
    pub fn frames_queued(&self) -> usize {
        self.shared.queue.queued_weight()
    }

    /// Wake the decode loop after draining; a stalled any-sink-full playlist
    /// resumes the moment capacity frees up
    fn notify_drain(&self) {
        let weak = self.shared.playlist.lock().unwrap().clone();
        if let Some(shared) = weak.and_then(|w| w.upgrade()) {
            let _state = shared.state.lock().unwrap();
            shared.cond.notify_all();
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_engine_defaults() {
        let config = SinkConfig::default();
        assert_eq!(config.format, AudioFormat::stereo_f32(44100));
        assert!(!config.disable_resample);
        assert_eq!(config.capacity_frames, 8192);
    }

    #[test]
    fn detached_sink_operations() {
        let sink = Sink::new(SinkConfig::default());
        assert!(!sink.is_attached());
        assert!(matches!(sink.detach(), Err(PipelineError::NotAttached)));
        assert!(matches!(sink.get_buffer(false), GetResult::NotReady));
        assert!(!sink.reached_end());
    }

    #[test]
    fn sentinel_latches_end() {
        let sink = Sink::new(SinkConfig::default());
        sink.shared
            .push_buffer(FrameBuffer::end_of_stream(sink.format()));
        assert!(sink.get_buffer(true).is_end());
        assert!(sink.reached_end());
        assert!(sink.get_buffer(false).is_end());
    }

    #[test]
    fn bytes_per_sec_reflects_format() {
        let sink = Sink::new(SinkConfig::default());
        // 44100 frames/s * 2 channels * 4 bytes
        assert_eq!(sink.bytes_per_sec(), 352_800);
    }
}
