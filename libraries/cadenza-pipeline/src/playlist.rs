//! Playlists
//!
//! A [`Playlist`] is an ordered sequence of items, each wrapping an opened
//! media source with its own gain and peak. The playlist owns a background
//! decode thread that pulls audio from the current item, applies gain, and
//! fans converted buffers out to every attached sink (see the scheduler
//! module).
//!
//! Items live in an arena-indexed doubly-linked list: [`ItemId`] handles are
//! stable integer indices with a generation counter, so a handle to a
//! removed item is detectable rather than dangling. Insert and remove are
//! O(1) given a handle.

use crate::error::{PipelineError, Result};
use crate::sink::SinkShared;
use cadenza_core::{ConvertFrames, MediaSource};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Shared handle to an opened media source
///
/// The playlist holds one per item but never closes the source; callers
/// keep their own clone for tag edits and control the source's lifetime.
pub type SharedSource = Arc<Mutex<dyn MediaSource>>;

/// Wrap a concrete source into a [`SharedSource`]
pub fn shared_source(source: impl MediaSource + 'static) -> SharedSource {
    Arc::new(Mutex::new(source))
}

/// Backpressure policy coordinating the decode loop with attached sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Decode as long as at least one sink is not full; full sinks simply
    /// accumulate backlog. The default.
    #[default]
    EverySinkFull,
    /// Stall the instant any sink is full; resume once every sink has
    /// drained below capacity. Keeps the slowest consumer in lockstep.
    AnySinkFull,
}

/// Stable handle to an item within a playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

impl ItemId {
    #[cfg(any(test, feature = "test-utils"))]
    pub fn test_id(index: u32) -> Self {
        Self {
            index,
            generation: 0,
        }
    }
}

pub(crate) struct Entry {
    pub source: SharedSource,
    pub gain: f64,
    pub peak: f64,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Arena-backed doubly-linked item list
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl Arena {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn id_at(&self, index: u32) -> ItemId {
        ItemId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    pub fn resolve(&self, id: ItemId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn resolve_mut(&mut self, id: ItemId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    pub fn head_id(&self) -> Option<ItemId> {
        self.head.map(|i| self.id_at(i))
    }

    pub fn next_id(&self, id: ItemId) -> Option<ItemId> {
        self.resolve(id)?.next.map(|i| self.id_at(i))
    }

    pub fn prev_id(&self, id: ItemId) -> Option<ItemId> {
        self.resolve(id)?.prev.map(|i| self.id_at(i))
    }

    /// Insert before `before`, or append when `before` is `None`
    pub fn insert_before(
        &mut self,
        source: SharedSource,
        gain: f64,
        peak: f64,
        before: Option<ItemId>,
    ) -> Option<ItemId> {
        let next = match before {
            Some(id) => {
                self.resolve(id)?;
                Some(id.index)
            }
            None => None,
        };
        let prev = match next {
            Some(n) => self.slots[n as usize].entry.as_ref().unwrap().prev,
            None => self.tail,
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.slots[index as usize].entry = Some(Entry {
            source,
            gain,
            peak,
            prev,
            next,
        });

        match prev {
            Some(p) => self.slots[p as usize].entry.as_mut().unwrap().next = Some(index),
            None => self.head = Some(index),
        }
        match next {
            Some(n) => self.slots[n as usize].entry.as_mut().unwrap().prev = Some(index),
            None => self.tail = Some(index),
        }
        self.len += 1;
        Some(self.id_at(index))
    }

    /// Unlink and free a slot; bumps the generation so the handle goes stale
    pub fn remove(&mut self, id: ItemId) -> Option<Entry> {
        self.resolve(id)?;
        let entry = self.slots[id.index as usize].entry.take().unwrap();
        match entry.prev {
            Some(p) => self.slots[p as usize].entry.as_mut().unwrap().next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next {
            Some(n) => self.slots[n as usize].entry.as_mut().unwrap().prev = entry.prev,
            None => self.tail = entry.prev,
        }
        self.slots[id.index as usize].generation += 1;
        self.free.push(id.index);
        self.len -= 1;
        Some(entry)
    }

    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            ids.push(self.id_at(index));
            cursor = self.slots[index as usize].entry.as_ref().unwrap().next;
        }
        ids
    }
}

/// Mutable playlist state; every structural call and the decode loop
/// serialize on this one mutex
pub(crate) struct State {
    pub arena: Arena,
    pub gain: f64,
    pub playing: bool,
    pub fill_mode: FillMode,
    pub sinks: Vec<Arc<SinkShared>>,
    /// Decode cursor
    pub current: Option<ItemId>,
    /// Decode offset within the current item, seconds
    pub offset: f64,
    /// The source must be (re)positioned to `offset` before the next read
    pub reposition: bool,
    pub pending_seek: Option<(ItemId, f64)>,
    pub end_sent: bool,
    pub shutdown: bool,
}

pub(crate) struct Shared {
    pub state: Mutex<State>,
    pub cond: Condvar,
    pub converter: Arc<dyn ConvertFrames>,
    pub chunk_frames: usize,
}

/// Context object holding the collaborators a playlist needs
///
/// Constructed once by the hosting application and handed to each playlist;
/// there is no ambient global state.
#[derive(Clone)]
pub struct PipelineContext {
    converter: Arc<dyn ConvertFrames>,
    chunk_frames: usize,
}

impl PipelineContext {
    /// Create a context around a format converter
    pub fn new(converter: Arc<dyn ConvertFrames>) -> Self {
        Self {
            converter,
            chunk_frames: 1024,
        }
    }

    /// Override the number of frames decoded per scheduler step
    pub fn with_chunk_frames(mut self, chunk_frames: usize) -> Self {
        self.chunk_frames = chunk_frames.max(1);
        self
    }
}

/// An ordered, gain-aware sequence of media sources with a background
/// decode loop
pub struct Playlist {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Playlist {
    /// Create an empty playlist and start its decode thread
    ///
    /// The playlist starts in the playing state, like the original engine:
    /// decoding begins as soon as an item is appended and a sink attached.
    pub fn new(context: PipelineContext) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                arena: Arena::new(),
                gain: 1.0,
                playing: true,
                fill_mode: FillMode::default(),
                sinks: Vec::new(),
                current: None,
                offset: 0.0,
                reposition: false,
                pending_seek: None,
                end_sent: false,
                shutdown: false,
            }),
            cond: Condvar::new(),
            converter: context.converter,
            chunk_frames: context.chunk_frames,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("cadenza-decode".into())
            .spawn(move || crate::scheduler::run(&worker_shared))
            .expect("failed to spawn decode thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    pub(crate) fn shared_handle(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Append a source to the end of the playlist
    pub fn append(&self, source: SharedSource, gain: f64, peak: f64) -> ItemId {
        let mut state = self.shared.state.lock().unwrap();
        let id = state
            .arena
            .insert_before(source, gain, peak, None)
            .expect("append cannot fail");
        // An idle decode head picks up at the new item, not at the list head
        if state.current.is_none() {
            state.current = Some(id);
            state.offset = 0.0;
            state.reposition = true;
            state.end_sent = false;
        }
        self.shared.cond.notify_all();
        id
    }

    /// Insert a source before an existing item
    pub fn insert_before(
        &self,
        source: SharedSource,
        gain: f64,
        peak: f64,
        before: ItemId,
    ) -> Result<ItemId> {
        let mut state = self.shared.state.lock().unwrap();
        let id = state
            .arena
            .insert_before(source, gain, peak, Some(before))
            .ok_or(PipelineError::StaleItem)?;
        self.shared.cond.notify_all();
        Ok(id)
    }

    /// Remove an item
    ///
    /// Any of the item's buffers still queued in attached sinks are purged
    /// first and each sink's `on_purge` hook fires, so no consumer ever
    /// observes a buffer for a destroyed item. Removing the item currently
    /// being decoded advances the cursor.
    pub fn remove(&self, item: ItemId) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        state.arena.resolve(item).ok_or(PipelineError::StaleItem)?;

        for sink in &state.sinks {
            let dropped = sink.purge_item(item);
            if dropped > 0 {
                tracing::debug!(?item, dropped, "purged buffers for removed item");
            }
            sink.fire_purge(item);
        }

        if state.current == Some(item) {
            state.current = state.arena.next_id(item);
            state.offset = 0.0;
            state.reposition = state.current.is_some();
        }
        state.arena.remove(item);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Remove every item, purging all queued buffers
    pub fn clear(&self) {
        let mut state = self.shared.state.lock().unwrap();
        let ids = state.arena.ids();
        for id in ids {
            for sink in &state.sinks {
                sink.purge_item(id);
                sink.fire_purge(id);
            }
            state.arena.remove(id);
        }
        state.current = None;
        state.offset = 0.0;
        state.end_sent = false;
        self.shared.cond.notify_all();
    }

    /// Item handles in playlist order
    pub fn items(&self) -> Vec<ItemId> {
        self.shared.state.lock().unwrap().arena.ids()
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().arena.len()
    }

    /// True if the playlist has no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First item, if any
    pub fn first(&self) -> Option<ItemId> {
        self.shared.state.lock().unwrap().arena.head_id()
    }

    /// Item after `item`, if any
    pub fn next_item(&self, item: ItemId) -> Option<ItemId> {
        self.shared.state.lock().unwrap().arena.next_id(item)
    }

    /// Item before `item`, if any
    pub fn prev_item(&self, item: ItemId) -> Option<ItemId> {
        self.shared.state.lock().unwrap().arena.prev_id(item)
    }

    /// Shared source handle of an item
    pub fn source(&self, item: ItemId) -> Result<SharedSource> {
        let state = self.shared.state.lock().unwrap();
        state
            .arena
            .resolve(item)
            .map(|e| Arc::clone(&e.source))
            .ok_or(PipelineError::StaleItem)
    }

    /// Per-item gain (linear)
    pub fn item_gain(&self, item: ItemId) -> Result<f64> {
        let state = self.shared.state.lock().unwrap();
        state
            .arena
            .resolve(item)
            .map(|e| e.gain)
            .ok_or(PipelineError::StaleItem)
    }

    /// Set per-item gain (linear)
    pub fn set_item_gain(&self, item: ItemId, gain: f64) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        state
            .arena
            .resolve_mut(item)
            .map(|e| e.gain = gain)
            .ok_or(PipelineError::StaleItem)
    }

    /// Per-item assumed sample peak
    pub fn item_peak(&self, item: ItemId) -> Result<f64> {
        let state = self.shared.state.lock().unwrap();
        state
            .arena
            .resolve(item)
            .map(|e| e.peak)
            .ok_or(PipelineError::StaleItem)
    }

    /// Set per-item assumed sample peak
    ///
    /// Defaults to 1.0. A known-lower peak lets gain application use a pure
    /// amplifier instead of the soft-knee curve.
    pub fn set_item_peak(&self, item: ItemId, peak: f64) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        state
            .arena
            .resolve_mut(item)
            .map(|e| e.peak = peak)
            .ok_or(PipelineError::StaleItem)
    }

    /// Aggregate playlist gain (linear)
    pub fn gain(&self) -> f64 {
        self.shared.state.lock().unwrap().gain
    }

    /// Set aggregate playlist gain (linear)
    pub fn set_gain(&self, gain: f64) {
        self.shared.state.lock().unwrap().gain = gain;
    }

    /// Resume decoding; idempotent. Fires `on_play` on each sink only on an
    /// actual transition.
    pub fn play(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.playing {
            state.playing = true;
            for sink in &state.sinks {
                sink.fire_play();
            }
            self.shared.cond.notify_all();
        }
    }

    /// Pause decoding; idempotent. Fires `on_pause` on each sink only on an
    /// actual transition.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.playing {
            state.playing = false;
            for sink in &state.sinks {
                sink.fire_pause();
            }
            self.shared.cond.notify_all();
        }
    }

    /// True while in the playing state
    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().unwrap().playing
    }

    /// Set the backpressure policy
    pub fn set_fill_mode(&self, mode: FillMode) {
        let mut state = self.shared.state.lock().unwrap();
        state.fill_mode = mode;
        self.shared.cond.notify_all();
    }

    /// Reposition the decode cursor
    ///
    /// The scheduler flushes every attached sink's queue and fires its
    /// `on_flush` hook before any post-seek buffer is produced, so no stale
    /// pre-seek buffer is ever observed downstream.
    pub fn seek(&self, item: ItemId, seconds: f64) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        state.arena.resolve(item).ok_or(PipelineError::StaleItem)?;
        state.pending_seek = Some((item, seconds.max(0.0)));
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Current decode-head position as `(item, seconds)`
    ///
    /// Returns `(None, -1.0)` when the playlist is empty or exhausted.
    pub fn position(&self) -> (Option<ItemId>, f64) {
        let state = self.shared.state.lock().unwrap();
        match state.current {
            Some(item) => (Some(item), state.offset),
            None => (None, -1.0),
        }
    }

    pub(crate) fn register_sink(&self, sink: Arc<SinkShared>) -> Result<()> {
        if !sink.pass_through() && !self.shared.converter.supports(&sink.format()) {
            return Err(PipelineError::FormatNegotiation(format!(
                "converter cannot produce {}",
                sink.format()
            )));
        }
        let mut state = self.shared.state.lock().unwrap();
        // A sink attaching after the playlist already ended still gets the
        // sentinel
        if state.end_sent {
            sink.push_buffer(crate::buffer::FrameBuffer::end_of_stream(sink.format()));
        }
        state.sinks.push(sink);
        self.shared.cond.notify_all();
        Ok(())
    }

    pub(crate) fn unregister_sink(shared: &Arc<Shared>, sink: &Arc<SinkShared>) {
        let mut state = shared.state.lock().unwrap();
        state.sinks.retain(|s| !Arc::ptr_eq(s, sink));
        shared.cond.notify_all();
    }
}

impl Drop for Playlist {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            self.shared.cond.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // Wake any consumer still blocked on a sink that was never detached
        let state = self.shared.state.lock().unwrap();
        for sink in &state.sinks {
            sink.abort_queue();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(n: usize) -> (Arena, Vec<ItemId>) {
        let mut arena = Arena::new();
        let mut ids = Vec::new();
        for _ in 0..n {
            let source = crate::test_utils::tone_source_for_tests();
            ids.push(arena.insert_before(source, 1.0, 1.0, None).unwrap());
        }
        (arena, ids)
    }

    #[test]
    fn arena_preserves_insertion_order() {
        let (arena, ids) = arena_with(3);
        assert_eq!(arena.ids(), ids);
        assert_eq!(arena.head_id(), Some(ids[0]));
        assert_eq!(arena.next_id(ids[0]), Some(ids[1]));
        assert_eq!(arena.prev_id(ids[2]), Some(ids[1]));
    }

    #[test]
    fn arena_remove_relinks_neighbors() {
        let (mut arena, ids) = arena_with(3);
        arena.remove(ids[1]).unwrap();
        assert_eq!(arena.ids(), vec![ids[0], ids[2]]);
        assert_eq!(arena.next_id(ids[0]), Some(ids[2]));
        assert_eq!(arena.prev_id(ids[2]), Some(ids[0]));
    }

    #[test]
    fn stale_handle_does_not_resolve_after_slot_reuse() {
        let (mut arena, ids) = arena_with(2);
        arena.remove(ids[0]).unwrap();
        let replacement = arena
            .insert_before(crate::test_utils::tone_source_for_tests(), 1.0, 1.0, None)
            .unwrap();
        // Slot was reused but the old handle stays stale
        assert!(arena.resolve(ids[0]).is_none());
        assert!(arena.resolve(replacement).is_some());
        assert_ne!(ids[0], replacement);
    }

    #[test]
    fn insert_before_links_in_middle() {
        let (mut arena, ids) = arena_with(2);
        let mid = arena
            .insert_before(
                crate::test_utils::tone_source_for_tests(),
                1.0,
                1.0,
                Some(ids[1]),
            )
            .unwrap();
        assert_eq!(arena.ids(), vec![ids[0], mid, ids[1]]);
    }
}
