//! EBU R128 loudness detection
//!
//! [`LoudnessDetector`] attaches a sink to a playlist and measures
//! integrated loudness, sample peak and duration per item, plus an
//! aggregate result over everything played (the "album" result). Results
//! arrive on a bounded info queue; a slow reader therefore backpressures
//! the detector's sink, which in turn backpressures the decode loop under
//! [`FillMode::AnySinkFull`](cadenza_pipeline::FillMode::AnySinkFull).

use crate::error::{AnalysisError, Result};
use cadenza_core::AudioFormat;
use cadenza_pipeline::{
    BlockingQueue, GetResult, ItemId, Playlist, QueueWeight, Sink, SinkConfig, SinkEvents,
};
use ebur128::{EbuR128, Mode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Loudness detector configuration
#[derive(Debug, Clone)]
pub struct LoudnessConfig {
    /// Maximum number of undelivered results before analysis stalls
    pub info_queue_size: usize,
    /// Sink queue capacity in frames
    pub sink_frames: usize,
    /// Analysis sample rate
    pub sample_rate: u32,
    /// Skip the aggregate result over the whole playlist
    pub disable_album: bool,
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self {
            info_queue_size: 64,
            sink_frames: 8192,
            sample_rate: 48000,
            disable_album: false,
        }
    }
}

/// One loudness measurement
#[derive(Debug, Clone)]
pub struct LoudnessInfo {
    /// Measured item; `None` for the aggregate result, which is always last
    pub item: Option<ItemId>,
    /// Integrated loudness in LUFS
    pub loudness: f64,
    /// Maximum sample peak across channels (linear)
    pub peak: f64,
    /// Analyzed duration in seconds
    pub duration: f64,
}

impl QueueWeight for LoudnessInfo {}

/// Convert a loudness measurement to a ReplayGain-style gain suggestion
///
/// Targets -18 LUFS and clamps the correction to ±51 dB.
pub fn loudness_to_gain(loudness: f64) -> f64 {
    (-18.0 - loudness).clamp(-51.0, 51.0)
}

struct RestartEvents {
    restart: Arc<AtomicBool>,
}

impl SinkEvents for RestartEvents {
    fn on_flush(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }

    fn on_purge(&self, _item: ItemId) {
        self.restart.store(true, Ordering::SeqCst);
    }
}

struct TrackMeter {
    item: ItemId,
    meter: EbuR128,
    frames: u64,
}

/// Playlist consumer measuring per-item and aggregate loudness
pub struct LoudnessDetector {
    config: LoudnessConfig,
    sink: Option<Arc<Sink>>,
    results: Arc<BlockingQueue<LoudnessInfo>>,
    position: Arc<Mutex<(Option<ItemId>, f64)>>,
    restart: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl LoudnessDetector {
    /// Create a detached detector
    pub fn new(config: LoudnessConfig) -> Self {
        let results = Arc::new(BlockingQueue::bounded(config.info_queue_size.max(1)));
        Self {
            config,
            sink: None,
            results,
            position: Arc::new(Mutex::new((None, 0.0))),
            restart: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Attach to a playlist and start analyzing
    ///
    /// # Errors
    ///
    /// [`AnalysisError::AlreadyAttached`] if already attached, or
    /// [`AnalysisError::Loudness`] if no meter can be created at the
    /// configured sample rate.
    pub fn attach(&mut self, playlist: &Playlist) -> Result<()> {
        if self.sink.is_some() {
            return Err(AnalysisError::AlreadyAttached);
        }
        // Surface an unusable analysis rate here rather than in the worker
        let _ = new_meter(self.config.sample_rate)?;
        let sink = Arc::new(Sink::new(SinkConfig {
            format: AudioFormat::stereo_f32(self.config.sample_rate),
            disable_resample: false,
            gain: 1.0,
            capacity_frames: self.config.sink_frames,
        }));
        sink.set_events(RestartEvents {
            restart: Arc::clone(&self.restart),
        });
        sink.attach(playlist)?;

        self.results.reset();
        let worker = Worker {
            sink: Arc::clone(&sink),
            results: Arc::clone(&self.results),
            position: Arc::clone(&self.position),
            restart: Arc::clone(&self.restart),
            sample_rate: self.config.sample_rate,
            disable_album: self.config.disable_album,
        };
        self.worker = Some(
            std::thread::Builder::new()
                .name("cadenza-loudness".into())
                .spawn(move || worker.run())
                .expect("failed to spawn loudness thread"),
        );
        self.sink = Some(sink);
        Ok(())
    }

    /// Detach from the playlist, discarding pending results
    pub fn detach(&mut self) -> Result<()> {
        let sink = self.sink.take().ok_or(AnalysisError::NotAttached)?;
        sink.detach()?;
        self.results.abort();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }

    /// Dequeue the next result
    ///
    /// Returns [`GetResult::End`] once every item and the aggregate result
    /// have been delivered.
    pub fn info_get(&self, block: bool) -> GetResult<LoudnessInfo> {
        self.results.get(block)
    }

    /// Report result availability without consuming
    pub fn info_peek(&self, block: bool) -> bool {
        self.results.peek(block)
    }

    /// Item and offset most recently analyzed
    pub fn position(&self) -> (Option<ItemId>, f64) {
        *self.position.lock().unwrap()
    }
}

impl Drop for LoudnessDetector {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

struct Worker {
    sink: Arc<Sink>,
    results: Arc<BlockingQueue<LoudnessInfo>>,
    position: Arc<Mutex<(Option<ItemId>, f64)>>,
    restart: Arc<AtomicBool>,
    sample_rate: u32,
    disable_album: bool,
}

impl Worker {
    fn run(self) {
        let mut track: Option<TrackMeter> = None;
        let mut album = if self.disable_album {
            None
        } else {
            new_meter(self.sample_rate).ok()
        };
        let mut album_frames: u64 = 0;

        loop {
            if self.restart.swap(false, Ordering::SeqCst) {
                // Seek or purge invalidated the running measurement
                track = None;
            }
            match self.sink.get_buffer(true) {
                GetResult::Ready(buffer) => {
                    let Some(item) = buffer.item() else { continue };
                    if track.as_ref().map(|t| t.item) != Some(item) {
                        if let Some(done) = track.take() {
                            if !self.results.put(finalize(&done, self.sample_rate)) {
                                return;
                            }
                        }
                        track = new_meter(self.sample_rate).ok().map(|meter| TrackMeter {
                            item,
                            meter,
                            frames: 0,
                        });
                    }
                    let frames = buffer.frame_count() as u64;
                    if let Some(t) = track.as_mut() {
                        feed(&mut t.meter, buffer.samples());
                        t.frames += frames;
                    }
                    if let Some(a) = album.as_mut() {
                        feed(a, buffer.samples());
                    }
                    album_frames += frames;
                    *self.position.lock().unwrap() = (Some(item), buffer.position());
                }
                GetResult::NotReady => {}
                GetResult::End => {
                    if !self.sink.reached_end() {
                        self.results.abort();
                        return;
                    }
                    if let Some(done) = track.take() {
                        if !self.results.put(finalize(&done, self.sample_rate)) {
                            return;
                        }
                    }
                    if let Some(a) = album.take() {
                        let info = LoudnessInfo {
                            item: None,
                            loudness: a.loudness_global().unwrap_or(f64::NEG_INFINITY),
                            peak: max_peak(&a),
                            duration: album_frames as f64 / f64::from(self.sample_rate),
                        };
                        if !self.results.put(info) {
                            return;
                        }
                    }
                    self.results.finish();
                    return;
                }
            }
        }
    }
}

fn new_meter(sample_rate: u32) -> Result<EbuR128> {
    // Integrated loudness plus per-channel sample peak
    EbuR128::new(2, sample_rate, Mode::I | Mode::SAMPLE_PEAK).map_err(AnalysisError::from)
}

fn feed(meter: &mut EbuR128, samples: &[f32]) {
    if let Err(err) = meter.add_frames_f32(samples) {
        tracing::warn!(?err, "loudness meter rejected frames");
    }
}

fn max_peak(meter: &EbuR128) -> f64 {
    (0..2u32)
        .map(|ch| meter.sample_peak(ch).unwrap_or(0.0))
        .fold(0.0, f64::max)
}

fn finalize(track: &TrackMeter, sample_rate: u32) -> LoudnessInfo {
    LoudnessInfo {
        item: Some(track.item),
        loudness: track.meter.loudness_global().unwrap_or(f64::NEG_INFINITY),
        peak: max_peak(&track.meter),
        duration: track.frames as f64 / f64::from(sample_rate),
    }
}
