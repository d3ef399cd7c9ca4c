//! Symphonia-backed media source
//!
//! [`FileSource`] opens an audio file, exposes streaming chunk decode with
//! accurate seeking, and carries the file's tag set with deferred
//! write-back through lofty.
//!
//! Supports: MP3, FLAC, OGG, OPUS, WAV, AAC, M4A

use crate::error::{MediaError, Result};
use cadenza_core::{
    AudioFormat, ChannelLayout, CoreError, DecodedChunk, MediaSource, SampleFormat, TagMap,
};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

/// ITU-R BS.775-1 coefficient for folding center/surround channels (-3dB)
const FOLD_MIX: f32 = 0.707;

/// A decodable audio file
pub struct FileSource {
    identifier: String,
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    /// Channel count of the raw track, before downmix
    source_channels: usize,
    decoded_format: AudioFormat,
    time_base: Option<TimeBase>,
    duration: Option<f64>,
    tags: TagMap,
    /// Tag edits applied since the last save, in application order
    edits: Vec<(String, Option<String>)>,
    /// Decoded samples beyond the last chunk boundary
    pending: Vec<f32>,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileSource {
    /// Open a file for streaming decode
    ///
    /// # Errors
    ///
    /// Fails when the file does not exist, cannot be probed, or contains no
    /// decodable audio track.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.display().to_string()));
        }

        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| MediaError::Probe(e.to_string()))?;

        let mut tags = TagMap::new();
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                for tag in revision.tags() {
                    tags.set(&tag.key.to_lowercase(), Some(&tag.value.to_string()));
                }
            }
        }
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| MediaError::NoAudioTrack(path.display().to_string()))?;
        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let source_channels = track.codec_params.channels.map_or(2, |c| c.count());
        let time_base = track.codec_params.time_base;
        let duration = track
            .codec_params
            .n_frames
            .map(|frames| frames as f64 / f64::from(sample_rate));

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| MediaError::Decode(e.to_string()))?;

        // Everything above stereo is folded down, so the exposed format is
        // at most two channels
        let layout = if source_channels == 1 {
            ChannelLayout::Mono
        } else {
            ChannelLayout::Stereo
        };
        let decoded_format = AudioFormat::new(sample_rate, layout, SampleFormat::F32);

        tracing::debug!(
            path = %path.display(),
            %decoded_format,
            source_channels,
            ?duration,
            "opened media source"
        );

        Ok(Self {
            identifier: path.display().to_string(),
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            source_channels,
            decoded_format,
            time_base,
            duration,
            tags,
            edits: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// Fold interleaved multi-channel audio down to the exposed layout
    ///
    /// Mono and stereo pass through; additional channels are mixed into
    /// both left and right at -3dB.
    fn downmix(&self, samples: &[f32]) -> Vec<f32> {
        let channels = self.source_channels;
        if channels <= 2 {
            return samples.to_vec();
        }
        let frames = samples.len() / channels;
        let mut out = Vec::with_capacity(frames * 2);
        for frame in 0..frames {
            let base = frame * channels;
            let mut left = samples[base];
            let mut right = samples[base + 1];
            for extra in &samples[base + 2..base + channels] {
                left += extra * FOLD_MIX;
                right += extra * FOLD_MIX;
            }
            out.push(left.clamp(-1.0, 1.0));
            out.push(right.clamp(-1.0, 1.0));
        }
        out
    }

    fn decode_next(&mut self, max_frames: usize) -> Result<Option<DecodedChunk>> {
        let channels = self.decoded_format.channels();
        let target_samples = max_frames * channels;
        let mut samples = std::mem::take(&mut self.pending);

        while samples.len() < target_samples {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(MediaError::Decode(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packets are skipped, not fatal
                    tracing::warn!(path = %self.path.display(), error = %e, "skipping corrupt packet");
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(MediaError::Decode(e.to_string())),
            };

            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(&self.downmix(buf.samples()));
        }

        if samples.is_empty() {
            return Ok(None);
        }
        if samples.len() > target_samples {
            self.pending = samples.split_off(target_samples);
        }
        let frames = samples.len() / channels;
        Ok(Some(DecodedChunk { samples, frames }))
    }

    fn seek_to(&mut self, seconds: f64) -> Result<f64> {
        let seconds = seconds.max(0.0);
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        let seeked_to = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| MediaError::Seek(e.to_string()))?;
        self.decoder.reset();
        self.pending.clear();

        let actual = match self.time_base {
            Some(tb) => seeked_to.actual_ts as f64 * f64::from(tb.numer) / f64::from(tb.denom),
            None => seeked_to.actual_ts as f64 / f64::from(self.decoded_format.sample_rate),
        };
        Ok(actual)
    }

    fn save_tags(&mut self) -> Result<()> {
        use lofty::{Probe, TagExt, TaggedFileExt};

        let mut tagged_file = Probe::open(&self.path)?.read()?;
        let tag_type = tagged_file.primary_tag_type();
        let tag = match tagged_file.tag_mut(tag_type) {
            Some(tag) => tag,
            None => {
                tagged_file.insert_tag(lofty::Tag::new(tag_type));
                tagged_file.tag_mut(tag_type).unwrap()
            }
        };

        for (key, value) in &self.edits {
            let item_key = item_key_for(key);
            match value {
                Some(value) => {
                    tag.insert_text(item_key, value.clone());
                }
                None => {
                    tag.remove_key(&item_key);
                }
            }
        }
        tag.save_to_path(&self.path)?;
        // Edits stay pending until the write actually lands
        self.edits.clear();
        tracing::debug!(path = %self.path.display(), "saved tag edits");
        Ok(())
    }
}

/// Map a conventional tag name onto lofty's key space
fn item_key_for(key: &str) -> lofty::ItemKey {
    use lofty::ItemKey;
    match key.to_lowercase().as_str() {
        "title" => ItemKey::TrackTitle,
        "artist" => ItemKey::TrackArtist,
        "album" => ItemKey::AlbumTitle,
        "albumartist" | "album_artist" => ItemKey::AlbumArtist,
        "genre" => ItemKey::Genre,
        "composer" => ItemKey::Composer,
        "comment" => ItemKey::Comment,
        "date" => ItemKey::RecordingDate,
        "year" => ItemKey::Year,
        "track" | "tracknumber" => ItemKey::TrackNumber,
        "disc" | "discnumber" => ItemKey::DiscNumber,
        other => ItemKey::Unknown(other.to_string()),
    }
}

impl MediaSource for FileSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn decoded_format(&self) -> AudioFormat {
        self.decoded_format
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn read_chunk(&mut self, max_frames: usize) -> cadenza_core::Result<Option<DecodedChunk>> {
        self.decode_next(max_frames).map_err(CoreError::from)
    }

    fn seek(&mut self, seconds: f64) -> cadenza_core::Result<f64> {
        self.seek_to(seconds).map_err(CoreError::from)
    }

    fn tags(&self) -> &TagMap {
        &self.tags
    }

    fn set_tag(&mut self, key: &str, value: Option<&str>) {
        self.tags.set(key, value);
        self.edits.push((key.to_string(), value.map(String::from)));
    }

    fn dirty(&self) -> bool {
        !self.edits.is_empty()
    }

    fn save(&mut self) -> cadenza_core::Result<()> {
        self.save_tags().map_err(CoreError::from)
    }
}
