//! End-to-end pipeline behavior: decode fan-out, fill modes, purge and
//! seek semantics.

use cadenza_core::{AudioFormat, CoreError, DecodedChunk, MediaSource, TagMap};
use cadenza_pipeline::test_utils::{TestConverter, ToneSource};
use cadenza_pipeline::{
    FillMode, GetResult, ItemId, PipelineContext, Playlist, PipelineError, SharedSource, Sink,
    SinkConfig, SinkEvents, shared_source,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn context() -> PipelineContext {
    PipelineContext::new(Arc::new(TestConverter)).with_chunk_frames(64)
}

fn tone(seconds: f64) -> SharedSource {
    shared_source(ToneSource::new(
        AudioFormat::stereo_f32(44100),
        440.0,
        0.25,
        seconds,
    ))
}

fn sink_with_capacity(frames: usize) -> Sink {
    Sink::new(SinkConfig {
        capacity_frames: frames,
        ..SinkConfig::default()
    })
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Clone, Default)]
struct Recorder {
    flushed: Arc<AtomicBool>,
    purged: Arc<Mutex<Vec<ItemId>>>,
}

impl SinkEvents for Recorder {
    fn on_flush(&self) {
        self.flushed.store(true, Ordering::SeqCst);
    }

    fn on_purge(&self, item: ItemId) {
        self.purged.lock().unwrap().push(item);
    }
}

/// A source whose reads always fail, as a dying drive's would
#[derive(Default)]
struct FailingSource {
    tags: TagMap,
}

impl MediaSource for FailingSource {
    fn identifier(&self) -> &str {
        "failing://bad-sector"
    }

    fn decoded_format(&self) -> AudioFormat {
        AudioFormat::stereo_f32(44100)
    }

    fn duration(&self) -> Option<f64> {
        None
    }

    fn read_chunk(&mut self, _max_frames: usize) -> cadenza_core::Result<Option<DecodedChunk>> {
        Err(CoreError::decode("bad sector"))
    }

    fn seek(&mut self, seconds: f64) -> cadenza_core::Result<f64> {
        Ok(seconds)
    }

    fn tags(&self) -> &TagMap {
        &self.tags
    }

    fn set_tag(&mut self, key: &str, value: Option<&str>) {
        self.tags.set(key, value);
    }

    fn dirty(&self) -> bool {
        false
    }

    fn save(&mut self) -> cadenza_core::Result<()> {
        Ok(())
    }
}

#[test]
fn sink_drains_playlist_in_order_then_ends() {
    let playlist = Playlist::new(context());
    let first = playlist.append(tone(0.01), 1.0, 1.0);
    let second = playlist.append(tone(0.01), 1.0, 1.0);

    let sink = sink_with_capacity(100_000);
    sink.attach(&playlist).unwrap();

    let mut frames = 0;
    let mut seen = Vec::new();
    loop {
        match sink.get_buffer(true) {
            GetResult::Ready(buffer) => {
                frames += buffer.frame_count();
                let item = buffer.item().unwrap();
                if seen.last() != Some(&item) {
                    seen.push(item);
                }
            }
            GetResult::End => break,
            GetResult::NotReady => unreachable!("blocking get never returns NotReady"),
        }
    }
    // Two items of 441 frames each
    assert_eq!(frames, 882);
    assert_eq!(seen, vec![first, second]);
    assert!(sink.reached_end());
}

#[test]
fn every_attached_sink_receives_the_whole_stream() {
    let playlist = Playlist::new(context());
    playlist.append(tone(0.01), 1.0, 1.0);

    let a = sink_with_capacity(100_000);
    let b = sink_with_capacity(100_000);
    a.attach(&playlist).unwrap();
    b.attach(&playlist).unwrap();

    for sink in [&a, &b] {
        let mut frames = 0;
        while let GetResult::Ready(buffer) = sink.get_buffer(true) {
            frames += buffer.frame_count();
        }
        assert_eq!(frames, 441);
        assert!(sink.reached_end());
    }
}

#[test]
fn any_sink_full_keeps_consumers_in_lockstep() {
    let playlist = Playlist::new(context());
    playlist.set_fill_mode(FillMode::AnySinkFull);
    playlist.append(tone(1.0), 1.0, 1.0);

    let fast = sink_with_capacity(256);
    let slow = sink_with_capacity(256);
    fast.attach(&playlist).unwrap();
    slow.attach(&playlist).unwrap();

    // Nobody reads: decode must stall once a queue fills
    assert!(wait_until(Duration::from_secs(2), || slow.frames_queued() >= 256));
    std::thread::sleep(Duration::from_millis(100));
    assert!(fast.frames_queued() <= 256 + 64);
    assert!(slow.frames_queued() <= 256 + 64);

    // Draining both queues resumes decode all the way to the end
    let drain = |sink: &Sink| {
        let mut frames = 0;
        while let GetResult::Ready(buffer) = sink.get_buffer(true) {
            frames += buffer.frame_count();
        }
        frames
    };
    let fast_frames = std::thread::scope(|scope| {
        let fast_frames = scope.spawn(|| drain(&fast));
        assert_eq!(drain(&slow), 44100);
        fast_frames.join().unwrap()
    });
    assert_eq!(fast_frames, 44100);
}

#[test]
fn every_sink_full_lets_fast_consumers_run_ahead() {
    let playlist = Playlist::new(context());
    playlist.append(tone(0.05), 1.0, 1.0);

    let fast = sink_with_capacity(1_000_000);
    let slow = sink_with_capacity(128);
    fast.attach(&playlist).unwrap();
    slow.attach(&playlist).unwrap();

    // The fast sink reaches the end even though the slow one is never read
    let mut frames = 0;
    while let GetResult::Ready(buffer) = fast.get_buffer(true) {
        frames += buffer.frame_count();
    }
    assert_eq!(frames, 2205);
    assert!(fast.reached_end());
    assert!(slow.frames_queued() >= 128);
}

#[test]
fn removing_an_item_purges_its_queued_buffers() {
    let playlist = Playlist::new(context());
    let keep = playlist.append(tone(0.01), 1.0, 1.0);
    let drop_me = playlist.append(tone(0.01), 1.0, 1.0);

    let sink = sink_with_capacity(100_000);
    let recorder = Recorder::default();
    sink.set_events(recorder.clone());
    sink.attach(&playlist).unwrap();

    // Let both items decode fully into the queue
    assert!(wait_until(Duration::from_secs(2), || sink.frames_queued() == 882));

    playlist.remove(drop_me).unwrap();
    assert_eq!(recorder.purged.lock().unwrap().as_slice(), &[drop_me]);

    let mut frames = 0;
    while let GetResult::Ready(buffer) = sink.get_buffer(true) {
        assert_eq!(buffer.item(), Some(keep));
        frames += buffer.frame_count();
    }
    assert_eq!(frames, 441);
    assert!(matches!(
        playlist.item_gain(drop_me),
        Err(PipelineError::StaleItem)
    ));
}

#[test]
fn seek_flushes_sinks_before_new_audio() {
    let playlist = Playlist::new(context());
    let item = playlist.append(tone(1.0), 1.0, 1.0);

    // Small queue: decode stays mid-item, so the sentinel cannot sneak in
    // ahead of the seek
    let sink = sink_with_capacity(512);
    let recorder = Recorder::default();
    sink.set_events(recorder.clone());
    sink.attach(&playlist).unwrap();

    // Consume a little pre-seek audio first
    let first = loop {
        if let GetResult::Ready(buffer) = sink.get_buffer(true) {
            break buffer;
        }
    };
    assert!(first.position() < 0.1);

    playlist.seek(item, 0.5).unwrap();

    loop {
        // Sample the flag before popping: if the flush already happened,
        // anything popped now survived it and must be post-seek audio
        let was_flushed = recorder.flushed.load(Ordering::SeqCst);
        match sink.get_buffer(true) {
            GetResult::Ready(buffer) => {
                if was_flushed {
                    assert!(buffer.position() >= 0.5 - 1e-6);
                    break;
                }
            }
            GetResult::End => panic!("stream ended before post-seek audio"),
            GetResult::NotReady => unreachable!(),
        }
    }
}

#[test]
fn persistently_failing_source_is_skipped() {
    let playlist = Playlist::new(context());
    playlist.append(shared_source(FailingSource::default()), 1.0, 1.0);
    let good = playlist.append(tone(0.01), 1.0, 1.0);

    let sink = sink_with_capacity(100_000);
    sink.attach(&playlist).unwrap();

    // The decode loop must give up on the broken item and still finish the
    // playlist rather than retrying it forever
    let mut frames = 0;
    while let GetResult::Ready(buffer) = sink.get_buffer(true) {
        assert_eq!(buffer.item(), Some(good));
        frames += buffer.frame_count();
    }
    assert_eq!(frames, 441);
    assert!(sink.reached_end());
}

#[test]
fn empty_playlist_delivers_the_sentinel() {
    let playlist = Playlist::new(context());
    let sink = sink_with_capacity(1024);
    sink.attach(&playlist).unwrap();
    assert!(sink.get_buffer(true).is_end());
    assert!(sink.reached_end());
}

#[test]
fn items_api_tracks_structure() {
    let playlist = Playlist::new(context());
    playlist.pause();
    let a = playlist.append(tone(0.01), 1.0, 1.0);
    let c = playlist.append(tone(0.01), 1.0, 1.0);
    let b = playlist.insert_before(tone(0.01), 0.5, 0.9, c).unwrap();

    assert_eq!(playlist.items(), vec![a, b, c]);
    assert_eq!(playlist.first(), Some(a));
    assert_eq!(playlist.next_item(b), Some(c));
    assert_eq!(playlist.prev_item(b), Some(a));
    assert_eq!(playlist.item_gain(b).unwrap(), 0.5);
    assert_eq!(playlist.item_peak(b).unwrap(), 0.9);

    playlist.set_item_gain(b, 0.25).unwrap();
    assert_eq!(playlist.item_gain(b).unwrap(), 0.25);

    playlist.clear();
    assert!(playlist.is_empty());
    assert!(matches!(
        playlist.seek(a, 0.0),
        Err(PipelineError::StaleItem)
    ));
}

#[test]
fn pause_and_play_fire_events_once_per_transition() {
    struct Counter {
        plays: Arc<AtomicUsizeWrapper>,
        pauses: Arc<AtomicUsizeWrapper>,
    }
    #[derive(Default)]
    struct AtomicUsizeWrapper(std::sync::atomic::AtomicUsize);
    impl SinkEvents for Counter {
        fn on_play(&self) {
            self.plays.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_pause(&self) {
            self.pauses.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let playlist = Playlist::new(context());
    let plays = Arc::new(AtomicUsizeWrapper::default());
    let pauses = Arc::new(AtomicUsizeWrapper::default());

    let sink = sink_with_capacity(1024);
    sink.set_events(Counter {
        plays: Arc::clone(&plays),
        pauses: Arc::clone(&pauses),
    });
    sink.attach(&playlist).unwrap();

    assert!(playlist.is_playing());
    playlist.play();
    playlist.pause();
    playlist.pause();
    playlist.play();

    assert_eq!(plays.0.load(Ordering::SeqCst), 1);
    assert_eq!(pauses.0.load(Ordering::SeqCst), 1);
}

#[test]
fn double_attach_is_rejected() {
    let playlist = Playlist::new(context());
    let sink = sink_with_capacity(1024);
    sink.attach(&playlist).unwrap();
    assert!(matches!(
        sink.attach(&playlist),
        Err(PipelineError::AlreadyAttached)
    ));
    sink.detach().unwrap();
    sink.attach(&playlist).unwrap();
}
