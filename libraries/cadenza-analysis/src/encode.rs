//! Sink-driven encoding
//!
//! [`Encoder`] attaches a sink to a playlist and feeds the decoded audio
//! through an [`EncodeBackend`], exposing the resulting bytes on a bounded
//! byte-weighted queue. The stream is framed as: optional header chunk
//! (no item), audio chunks (tagged with their item), optional trailer
//! chunk (no item), then end.
//!
//! [`WavBackend`] writes a RIFF/WAVE container through hound. WAV cannot
//! be finalized incrementally, so the backend accumulates samples and
//! emits the whole container as the trailer chunk.

use crate::error::{AnalysisError, Result};
use cadenza_core::{AudioFormat, SampleFormat, TagMap};
use cadenza_pipeline::{
    BlockingQueue, GetResult, ItemId, Playlist, QueueWeight, Sink, SinkConfig, SinkEvents,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Format to encode at; ignored when `disable_resample` is set
    pub format: AudioFormat,
    /// Encode each source at its own decoded format instead of converting
    pub disable_resample: bool,
    /// Advisory bit rate for lossy backends, bits per second
    pub bit_rate: u32,
    /// Sink queue capacity in frames
    pub sink_frames: usize,
    /// Encoded output queue capacity in bytes
    pub encoded_queue_bytes: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::stereo_f32(44100),
            disable_resample: false,
            bit_rate: 256_000,
            sink_frames: 8192,
            encoded_queue_bytes: 16384,
        }
    }
}

/// One chunk of encoded output
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Originating item; `None` for container header and trailer chunks
    pub item: Option<ItemId>,
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Presentation timestamp of the first encoded frame, seconds
    pub pts: f64,
}

impl QueueWeight for EncodedChunk {
    fn weight(&self) -> usize {
        self.bytes.len()
    }
}

/// A pluggable encoding backend
pub trait EncodeBackend: Send {
    /// Begin a stream; returns container header bytes (may be empty)
    ///
    /// `bit_rate` is advisory; lossless backends ignore it.
    fn open(&mut self, format: AudioFormat, bit_rate: u32, metadata: &TagMap) -> Result<Vec<u8>>;

    /// Encode interleaved samples; returns any bytes ready so far
    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>>;

    /// Finalize the stream; returns trailer bytes (may be empty)
    fn finish(&mut self) -> Result<Vec<u8>>;

    /// Discard buffered state after a seek or purge
    fn reset(&mut self) {}
}

/// RIFF/WAVE backend
///
/// Accumulates the whole stream and emits the container at
/// [`finish`](EncodeBackend::finish), since WAV headers carry lengths that
/// are unknown until then.
pub struct WavBackend {
    format: Option<AudioFormat>,
    samples: Vec<f32>,
}

impl WavBackend {
    pub fn new() -> Self {
        Self {
            format: None,
            samples: Vec::new(),
        }
    }

    fn spec(format: AudioFormat) -> Result<hound::WavSpec> {
        let (bits, sample_format) = match format.sample_format {
            SampleFormat::S16 => (16, hound::SampleFormat::Int),
            SampleFormat::S32 => (32, hound::SampleFormat::Int),
            SampleFormat::F32 => (32, hound::SampleFormat::Float),
            other => {
                return Err(AnalysisError::Encode(format!(
                    "WAV backend cannot write {other:?} samples"
                )))
            }
        };
        Ok(hound::WavSpec {
            channels: format.channels() as u16,
            sample_rate: format.sample_rate,
            bits_per_sample: bits,
            sample_format,
        })
    }
}

impl Default for WavBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeBackend for WavBackend {
    fn open(&mut self, format: AudioFormat, _bit_rate: u32, _metadata: &TagMap) -> Result<Vec<u8>> {
        Self::spec(format)?;
        self.format = Some(format);
        self.samples.clear();
        Ok(Vec::new())
    }

    fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        self.samples.extend_from_slice(samples);
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let format = self
            .format
            .take()
            .ok_or_else(|| AnalysisError::Encode("stream was never opened".to_string()))?;
        let spec = Self::spec(format)?;

        let mut bytes = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut bytes);
            let mut writer = hound::WavWriter::new(cursor, spec)?;
            match format.sample_format {
                SampleFormat::F32 => {
                    for &s in &self.samples {
                        writer.write_sample(s)?;
                    }
                }
                SampleFormat::S32 => {
                    for &s in &self.samples {
                        let v = (f64::from(s.clamp(-1.0, 1.0)) * f64::from(i32::MAX)) as i32;
                        writer.write_sample(v)?;
                    }
                }
                _ => {
                    for &s in &self.samples {
                        let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                        writer.write_sample(v)?;
                    }
                }
            }
            writer.finalize()?;
        }
        self.samples = Vec::new();
        Ok(bytes)
    }

    fn reset(&mut self) {
        self.samples.clear();
    }
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

/// Playlist consumer encoding audio into a container stream
pub struct Encoder {
    config: EncoderConfig,
    sink: Option<Arc<Sink>>,
    output: Arc<BlockingQueue<EncodedChunk>>,
    position: Arc<Mutex<(Option<ItemId>, f64)>>,
    metadata: TagMap,
    actual_format: Option<AudioFormat>,
    backend: Option<Box<dyn EncodeBackend>>,
    restart: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Encoder {
    /// Create a detached encoder around a backend
    pub fn new(config: EncoderConfig, backend: Box<dyn EncodeBackend>) -> Self {
        let output = Arc::new(BlockingQueue::bounded(config.encoded_queue_bytes.max(1)));
        Self {
            config,
            sink: None,
            output,
            position: Arc::new(Mutex::new((None, 0.0))),
            metadata: TagMap::new(),
            actual_format: None,
            backend: Some(backend),
            restart: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Set a metadata tag on the encoded stream (`None` deletes)
    ///
    /// Takes effect on the next attach. Tags set here win over tags copied
    /// from the source.
    pub fn set_tag(&mut self, key: &str, value: Option<&str>) {
        self.metadata.set(key, value);
    }

    /// Metadata that will be (or was) handed to the backend
    pub fn metadata(&self) -> &TagMap {
        &self.metadata
    }

    /// Format actually being encoded; set at attach
    pub fn actual_format(&self) -> Option<AudioFormat> {
        self.actual_format
    }

    /// Attach to a playlist and start encoding
    ///
    /// With `disable_resample` the encode format is copied from the first
    /// item's decoded format. Source tags of the first item are merged into
    /// the stream metadata, with explicitly set tags taking precedence.
    pub fn attach(&mut self, playlist: &Playlist) -> Result<()> {
        if self.sink.is_some() {
            return Err(AnalysisError::AlreadyAttached);
        }
        // The backend moves into the worker thread, so an encoder cannot be
        // reused after detach
        let mut backend = self.backend.take().ok_or_else(|| {
            AnalysisError::Encode("backend already consumed, create a new encoder".to_string())
        })?;

        let source_format = playlist.first().and_then(|item| {
            let source = playlist.source(item).ok()?;
            let source = source.lock().unwrap();
            let mut merged = source.tags().clone();
            merged.merge(&self.metadata);
            self.metadata = merged;
            Some(source.decoded_format())
        });
        let actual_format = if self.config.disable_resample {
            source_format.unwrap_or(self.config.format)
        } else {
            self.config.format
        };
        self.actual_format = Some(actual_format);

        let sink = Arc::new(Sink::new(SinkConfig {
            format: actual_format,
            disable_resample: self.config.disable_resample,
            gain: 1.0,
            capacity_frames: self.config.sink_frames,
        }));
        sink.set_events(RestartEvents {
            restart: Arc::clone(&self.restart),
        });
        sink.attach(playlist)?;

        let header = backend.open(actual_format, self.config.bit_rate, &self.metadata)?;
        self.output.reset();
        if !header.is_empty() {
            self.output.put(EncodedChunk {
                item: None,
                bytes: header,
                pts: 0.0,
            });
        }

        let worker = Worker {
            sink: Arc::clone(&sink),
            output: Arc::clone(&self.output),
            position: Arc::clone(&self.position),
            restart: Arc::clone(&self.restart),
            backend,
        };
        self.worker = Some(
            std::thread::Builder::new()
                .name("cadenza-encode".into())
                .spawn(move || worker.run())
                .expect("failed to spawn encode thread"),
        );
        self.sink = Some(sink);
        tracing::debug!(format = %actual_format, "encoder attached");
        Ok(())
    }

    /// Detach from the playlist, discarding pending output
    pub fn detach(&mut self) -> Result<()> {
        let sink = self.sink.take().ok_or(AnalysisError::NotAttached)?;
        sink.detach()?;
        self.output.abort();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.actual_format = None;
        Ok(())
    }

    /// Dequeue the next encoded chunk
    ///
    /// Returns [`GetResult::End`] after the trailer chunk.
    pub fn buffer_get(&self, block: bool) -> GetResult<EncodedChunk> {
        self.output.get(block)
    }

    /// Report chunk availability without consuming
    pub fn buffer_peek(&self, block: bool) -> bool {
        self.output.peek(block)
    }

    /// Item and offset most recently encoded
    pub fn position(&self) -> (Option<ItemId>, f64) {
        *self.position.lock().unwrap()
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

struct Worker {
    sink: Arc<Sink>,
    output: Arc<BlockingQueue<EncodedChunk>>,
    position: Arc<Mutex<(Option<ItemId>, f64)>>,
    restart: Arc<AtomicBool>,
    backend: Box<dyn EncodeBackend>,
}

impl Worker {
    fn run(mut self) {
        loop {
            if self.restart.swap(false, Ordering::SeqCst) {
                // Seek or purge invalidated buffered encoder state
                self.backend.reset();
            }
            match self.sink.get_buffer(true) {
                GetResult::Ready(buffer) => {
                    let bytes = match self.backend.encode(buffer.samples()) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            tracing::warn!(%err, "encode failed, dropping chunk");
                            continue;
                        }
                    };
                    *self.position.lock().unwrap() = (buffer.item(), buffer.position());
                    if !bytes.is_empty() {
                        let chunk = EncodedChunk {
                            item: buffer.item(),
                            bytes,
                            pts: buffer.pts(),
                        };
                        if !self.output.put(chunk) {
                            return;
                        }
                    }
                }
                GetResult::NotReady => {}
                GetResult::End => {
                    if !self.sink.reached_end() {
                        self.output.abort();
                        return;
                    }
                    match self.backend.finish() {
                        Ok(trailer) if !trailer.is_empty() => {
                            let (_, pts) = *self.position.lock().unwrap();
                            self.output.put(EncodedChunk {
                                item: None,
                                bytes: trailer,
                                pts,
                            });
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(%err, "failed to finalize encoded stream");
                        }
                    }
                    self.output.finish();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_backend_emits_container_at_finish() {
        let mut backend = WavBackend::new();
        let format = AudioFormat::stereo_f32(8000);
        assert!(backend.open(format, 256_000, &TagMap::new()).unwrap().is_empty());
        assert!(backend.encode(&[0.1, -0.1, 0.2, -0.2]).unwrap().is_empty());
        let bytes = backend.finish().unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn wav_backend_rejects_unsupported_sample_formats() {
        let mut backend = WavBackend::new();
        let format = AudioFormat::new(
            44100,
            cadenza_core::ChannelLayout::Stereo,
            SampleFormat::F64,
        );
        assert!(backend.open(format, 256_000, &TagMap::new()).is_err());
    }

    #[test]
    fn encoded_chunks_weigh_their_bytes() {
        let chunk = EncodedChunk {
            item: None,
            bytes: vec![0; 128],
            pts: 0.0,
        };
        assert_eq!(chunk.weight(), 128);
    }

    #[test]
    fn set_tag_wins_over_defaults() {
        let mut encoder = Encoder::new(EncoderConfig::default(), Box::new(WavBackend::new()));
        encoder.set_tag("title", Some("Rendered"));
        assert_eq!(encoder.metadata().get("title"), Some("Rendered"));
        encoder.set_tag("title", None);
        assert_eq!(encoder.metadata().get("title"), None);
    }
}
