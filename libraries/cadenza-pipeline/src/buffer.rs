//! Reference-counted audio frame buffers
//!
//! A [`FrameBuffer`] is produced once by the decode scheduler (per sink,
//! post-conversion) and is immutable from then on. Cloning is cheap — the
//! payload is behind an `Arc` — and dropping the last clone releases the
//! storage, which is the "unref exactly once" discipline of the original
//! engine expressed through ownership.

use crate::playlist::ItemId;
use crate::queue::QueueWeight;
use cadenza_core::AudioFormat;
use std::sync::Arc;

#[derive(Debug)]
enum Payload {
    /// Interleaved f32 samples
    Samples(Vec<f32>),
    /// Opaque encoded bytes
    Encoded(Vec<u8>),
}

#[derive(Debug)]
struct Inner {
    payload: Payload,
    format: AudioFormat,
    /// Originating item; `None` marks a header/trailer or the end-of-stream
    /// sentinel
    item: Option<ItemId>,
    /// Offset within the item in seconds
    position: f64,
    /// Presentation timestamp in seconds
    pts: f64,
}

/// One unit of decoded or encoded audio flowing through a sink queue
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    inner: Arc<Inner>,
}

impl FrameBuffer {
    /// Create a decoded-audio buffer
    pub fn from_samples(
        samples: Vec<f32>,
        format: AudioFormat,
        item: ItemId,
        position: f64,
        pts: f64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                payload: Payload::Samples(samples),
                format,
                item: Some(item),
                position,
                pts,
            }),
        }
    }

    /// Create an encoded-audio buffer; `item = None` marks a format header
    /// or trailer
    pub fn from_encoded(bytes: Vec<u8>, format: AudioFormat, item: Option<ItemId>, pts: f64) -> Self {
        Self {
            inner: Arc::new(Inner {
                payload: Payload::Encoded(bytes),
                format,
                item,
                position: pts,
                pts,
            }),
        }
    }

    /// The end-of-stream sentinel: no item, no payload
    pub fn end_of_stream(format: AudioFormat) -> Self {
        Self {
            inner: Arc::new(Inner {
                payload: Payload::Samples(Vec::new()),
                format,
                item: None,
                position: 0.0,
                pts: 0.0,
            }),
        }
    }

    /// True for the end-of-stream sentinel
    pub fn is_end_of_stream(&self) -> bool {
        self.inner.item.is_none() && self.size() == 0
    }

    /// Decoded samples; empty for encoded payloads
    pub fn samples(&self) -> &[f32] {
        match &self.inner.payload {
            Payload::Samples(samples) => samples,
            Payload::Encoded(_) => &[],
        }
    }

    /// Encoded bytes; empty for decoded payloads
    pub fn encoded(&self) -> &[u8] {
        match &self.inner.payload {
            Payload::Encoded(bytes) => bytes,
            Payload::Samples(_) => &[],
        }
    }

    /// Number of audio frames; 0 for encoded payloads
    pub fn frame_count(&self) -> usize {
        match &self.inner.payload {
            Payload::Samples(samples) => samples.len() / self.inner.format.channels(),
            Payload::Encoded(_) => 0,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        match &self.inner.payload {
            Payload::Samples(samples) => samples.len() * std::mem::size_of::<f32>(),
            Payload::Encoded(bytes) => bytes.len(),
        }
    }

    /// Audio format of the payload
    pub fn format(&self) -> AudioFormat {
        self.inner.format
    }

    /// Originating playlist item, if any
    pub fn item(&self) -> Option<ItemId> {
        self.inner.item
    }

    /// Offset within the originating item, in seconds
    pub fn position(&self) -> f64 {
        self.inner.position
    }

    /// Presentation timestamp in seconds
    pub fn pts(&self) -> f64 {
        self.inner.pts
    }

    /// Number of live references to the underlying storage
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl QueueWeight for FrameBuffer {
    /// Decoded audio weighs its frame count; encoded audio weighs its byte
    /// size. The sentinel weighs nothing so it can always be delivered.
    fn weight(&self) -> usize {
        match &self.inner.payload {
            Payload::Samples(_) => self.frame_count(),
            Payload::Encoded(bytes) => bytes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::ItemId;

    fn fmt() -> AudioFormat {
        AudioFormat::stereo_f32(44100)
    }

    #[test]
    fn sample_buffer_accounting() {
        let buf = FrameBuffer::from_samples(vec![0.0; 8], fmt(), ItemId::test_id(0), 0.0, 0.0);
        assert_eq!(buf.frame_count(), 4);
        assert_eq!(buf.size(), 32);
        assert_eq!(buf.weight(), 4);
        assert!(!buf.is_end_of_stream());
    }

    #[test]
    fn encoded_buffer_has_no_frames() {
        let buf = FrameBuffer::from_encoded(vec![1, 2, 3], fmt(), None, 0.0);
        assert_eq!(buf.frame_count(), 0);
        assert_eq!(buf.size(), 3);
        assert_eq!(buf.weight(), 3);
        assert!(!buf.is_end_of_stream());
    }

    #[test]
    fn sentinel_is_recognized() {
        let buf = FrameBuffer::end_of_stream(fmt());
        assert!(buf.is_end_of_stream());
        assert_eq!(buf.weight(), 0);
    }

    #[test]
    fn clones_share_storage() {
        let buf = FrameBuffer::from_samples(vec![0.5; 4], fmt(), ItemId::test_id(0), 0.0, 0.0);
        let clone = buf.clone();
        assert_eq!(buf.ref_count(), 2);
        drop(clone);
        assert_eq!(buf.ref_count(), 1);
    }
}
