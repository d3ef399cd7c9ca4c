//! Chromaprint audio fingerprinting
//!
//! [`Fingerprinter`] attaches a sink at 11025 Hz mono and computes an
//! AcoustID-compatible fingerprint per playlist item. A final marker with
//! no item follows the last per-item result, mirroring the loudness
//! detector's aggregate result.

use crate::error::{AnalysisError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cadenza_core::{AudioFormat, ChannelLayout, SampleFormat};
use cadenza_pipeline::{
    BlockingQueue, GetResult, ItemId, Playlist, QueueWeight, Sink, SinkConfig, SinkEvents,
};
use rusty_chromaprint::{Configuration, Fingerprinter as Chromaprint};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Chromaprint's canonical analysis rate
const FINGERPRINT_SAMPLE_RATE: u32 = 11025;

/// Fingerprinter configuration
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    /// Maximum number of undelivered results before analysis stalls
    pub info_queue_size: usize,
    /// Sink queue capacity in frames
    pub sink_frames: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            info_queue_size: 64,
            sink_frames: 8192,
        }
    }
}

/// One fingerprint result
#[derive(Debug, Clone)]
pub struct FingerprintInfo {
    /// Fingerprinted item; `None` for the final end-of-playlist marker
    pub item: Option<ItemId>,
    /// Raw fingerprint words; empty for the final marker
    pub fingerprint: Vec<u32>,
    /// Analyzed duration in seconds
    pub duration: f64,
}

impl QueueWeight for FingerprintInfo {}

/// Encode a raw fingerprint for storage or transmission
pub fn encode_fingerprint(fingerprint: &[u32]) -> String {
    let bytes: Vec<u8> = fingerprint.iter().flat_map(|&w| w.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Decode a fingerprint produced by [`encode_fingerprint`]
pub fn decode_fingerprint(encoded: &str) -> Result<Vec<u32>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| AnalysisError::Fingerprint(e.to_string()))?;
    if bytes.len() % 4 != 0 {
        return Err(AnalysisError::Fingerprint(
            "invalid fingerprint length".to_string(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
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

/// Playlist consumer computing per-item acoustic fingerprints
pub struct Fingerprinter {
    config: FingerprintConfig,
    sink: Option<Arc<Sink>>,
    results: Arc<BlockingQueue<FingerprintInfo>>,
    position: Arc<Mutex<(Option<ItemId>, f64)>>,
    restart: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Fingerprinter {
    /// Create a detached fingerprinter
    pub fn new(config: FingerprintConfig) -> Self {
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

    /// Attach to a playlist and start fingerprinting
    pub fn attach(&mut self, playlist: &Playlist) -> Result<()> {
        if self.sink.is_some() {
            return Err(AnalysisError::AlreadyAttached);
        }
        let sink = Arc::new(Sink::new(SinkConfig {
            format: AudioFormat::new(
                FINGERPRINT_SAMPLE_RATE,
                ChannelLayout::Mono,
                SampleFormat::F32,
            ),
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
        };
        self.worker = Some(
            std::thread::Builder::new()
                .name("cadenza-fingerprint".into())
                .spawn(move || worker.run())
                .expect("failed to spawn fingerprint thread"),
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
    pub fn info_get(&self, block: bool) -> GetResult<FingerprintInfo> {
        self.results.get(block)
    }

    /// Report result availability without consuming
    pub fn info_peek(&self, block: bool) -> bool {
        self.results.peek(block)
    }

    /// Item and offset most recently fingerprinted
    pub fn position(&self) -> (Option<ItemId>, f64) {
        *self.position.lock().unwrap()
    }
}

impl Drop for Fingerprinter {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

struct Track {
    item: ItemId,
    printer: Chromaprint,
    frames: u64,
}

struct Worker {
    sink: Arc<Sink>,
    results: Arc<BlockingQueue<FingerprintInfo>>,
    position: Arc<Mutex<(Option<ItemId>, f64)>>,
    restart: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let mut track: Option<Track> = None;
        let mut total_frames: u64 = 0;

        loop {
            if self.restart.swap(false, Ordering::SeqCst) {
                track = None;
            }
            match self.sink.get_buffer(true) {
                GetResult::Ready(buffer) => {
                    let Some(item) = buffer.item() else { continue };
                    if track.as_ref().map(|t| t.item) != Some(item) {
                        if let Some(done) = track.take() {
                            if !self.results.put(finish_track(done)) {
                                return;
                            }
                        }
                        track = start_track(item);
                    }
                    if let Some(t) = track.as_mut() {
                        let pcm: Vec<i16> = buffer
                            .samples()
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
                            .collect();
                        t.printer.consume(&pcm);
                        t.frames += buffer.frame_count() as u64;
                    }
                    total_frames += buffer.frame_count() as u64;
                    *self.position.lock().unwrap() = (Some(item), buffer.position());
                }
                GetResult::NotReady => {}
                GetResult::End => {
                    if !self.sink.reached_end() {
                        self.results.abort();
                        return;
                    }
                    if let Some(done) = track.take() {
                        if !self.results.put(finish_track(done)) {
                            return;
                        }
                    }
                    let marker = FingerprintInfo {
                        item: None,
                        fingerprint: Vec::new(),
                        duration: total_frames as f64 / f64::from(FINGERPRINT_SAMPLE_RATE),
                    };
                    if self.results.put(marker) {
                        self.results.finish();
                    }
                    return;
                }
            }
        }
    }
}

fn start_track(item: ItemId) -> Option<Track> {
    let mut printer = Chromaprint::new(&Configuration::preset_test2());
    match printer.start(FINGERPRINT_SAMPLE_RATE, 1) {
        Ok(()) => Some(Track {
            item,
            printer,
            frames: 0,
        }),
        Err(err) => {
            tracing::warn!(?item, ?err, "failed to start fingerprinter");
            None
        }
    }
}

fn finish_track(mut track: Track) -> FingerprintInfo {
    track.printer.finish();
    FingerprintInfo {
        item: Some(track.item),
        fingerprint: track.printer.fingerprint().to_vec(),
        duration: track.frames as f64 / f64::from(FINGERPRINT_SAMPLE_RATE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fingerprint_codec_round_trips() {
        let fingerprint = vec![0xdead_beef, 0x0102_0304, 0, u32::MAX];
        let encoded = encode_fingerprint(&fingerprint);
        assert_eq!(decode_fingerprint(&encoded).unwrap(), fingerprint);
    }

    proptest! {
        #[test]
        fn codec_round_trips_arbitrary_words(
            words in proptest::collection::vec(any::<u32>(), 0..128),
        ) {
            let encoded = encode_fingerprint(&words);
            prop_assert_eq!(decode_fingerprint(&encoded).unwrap(), words);
        }
    }

    #[test]
    fn empty_fingerprint_encodes_to_empty_string() {
        assert_eq!(encode_fingerprint(&[]), "");
        assert_eq!(decode_fingerprint("").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn truncated_encoding_is_rejected() {
        // Three bytes cannot hold a whole u32 word
        let encoded = STANDARD.encode([1u8, 2, 3]);
        assert!(decode_fingerprint(&encoded).is_err());
    }
}
