//! Decode scheduler
//!
//! One thread per playlist pulls chunks from the current item's source,
//! applies gain, converts once per distinct sink format, and fans the
//! resulting buffers out to every attached sink.
//!
//! The loop runs in two phases. Under the state lock it snapshots a decode
//! job (current item, offsets, sink list) and checks the fill-mode gate;
//! with the lock released it performs the actual seek/decode against the
//! source. Before committing the chunk it re-acquires the lock and
//! re-validates the snapshot: if the item was removed or a seek arrived in
//! the meantime, the chunk is discarded so no stale buffer ever lands in a
//! sink after a flush or purge.

use crate::buffer::FrameBuffer;
use crate::playlist::{FillMode, ItemId, Shared, SharedSource, State};
use crate::sink::SinkShared;
use cadenza_core::{apply_gain, AudioFormat, DecodedChunk};
use std::sync::{Arc, MutexGuard};

/// Give up on an item after this many consecutive failed reads
const MAX_DECODE_ERRORS: u32 = 3;

struct Job {
    item: ItemId,
    source: SharedSource,
    gain: f64,
    peak: f64,
    offset: f64,
    reposition: bool,
    sinks: Vec<Arc<SinkShared>>,
}

enum Decoded {
    Chunk(DecodedChunk, AudioFormat),
    EndOfItem,
    Skip,
}

pub(crate) fn run(shared: &Arc<Shared>) {
    tracing::debug!("decode thread started");
    let mut state = shared.state.lock().unwrap();
    let mut decode_errors: u32 = 0;
    loop {
        if state.shutdown {
            break;
        }

        if let Some((item, seconds)) = state.pending_seek.take() {
            apply_seek(&mut state, item, seconds);
        }

        if !state.playing || state.sinks.is_empty() {
            state = shared.cond.wait(state).unwrap();
            continue;
        }

        // `current == None` means the decode head fell off the end (or the
        // playlist is empty); it is re-armed by append and seek, never here
        if state.current.is_none() {
            if !state.end_sent {
                for sink in &state.sinks {
                    sink.push_buffer(FrameBuffer::end_of_stream(sink.format()));
                }
                state.end_sent = true;
                tracing::debug!("end of playlist reached");
            }
            state = shared.cond.wait(state).unwrap();
            continue;
        }

        if stalled(&state) {
            state = shared.cond.wait(state).unwrap();
            continue;
        }

        let Some(job) = snapshot(&state) else {
            // Current item vanished; re-resolve on the next pass
            state.current = None;
            continue;
        };

        drop(state);
        let decoded = decode(shared, &job);
        state = shared.state.lock().unwrap();

        // Discard the chunk if the world moved underneath the decode
        let valid = state.current == Some(job.item)
            && state.pending_seek.is_none()
            && state.arena.resolve(job.item).is_some()
            && !state.shutdown;
        if !valid {
            continue;
        }
        if job.reposition {
            state.reposition = false;
        }

        match decoded {
            Decoded::Chunk(chunk, decoded_format) => {
                decode_errors = 0;
                deliver(shared, &job, &chunk, decoded_format);
                state.offset = job.offset + chunk.frames as f64 / f64::from(decoded_format.sample_rate);
            }
            Decoded::EndOfItem => {
                decode_errors = 0;
                state.current = state.arena.next_id(job.item);
                state.offset = 0.0;
                state.reposition = state.current.is_some();
            }
            Decoded::Skip => {
                decode_errors += 1;
                if decode_errors >= MAX_DECODE_ERRORS {
                    tracing::warn!(item = ?job.item, "giving up on item after repeated decode errors");
                    decode_errors = 0;
                    state.current = state.arena.next_id(job.item);
                    state.offset = 0.0;
                    state.reposition = state.current.is_some();
                }
            }
        }
    }
    tracing::debug!("decode thread stopped");
}

/// Flush every sink before repositioning so nothing downstream observes a
/// pre-seek buffer
fn apply_seek(state: &mut MutexGuard<'_, State>, item: ItemId, seconds: f64) {
    if state.arena.resolve(item).is_none() {
        tracing::warn!(?item, "dropping seek to removed item");
        return;
    }
    for sink in &state.sinks {
        sink.flush_queue();
    }
    state.current = Some(item);
    state.offset = seconds;
    state.reposition = true;
    state.end_sent = false;
    tracing::debug!(?item, seconds, "seek applied");
}

/// Fill-mode gate: every-sink-full decodes while any sink has room,
/// any-sink-full stalls as soon as one sink is full
fn stalled(state: &MutexGuard<'_, State>) -> bool {
    match state.fill_mode {
        FillMode::EverySinkFull => state.sinks.iter().all(|s| s.is_full()),
        FillMode::AnySinkFull => state.sinks.iter().any(|s| s.is_full()),
    }
}

fn snapshot(state: &MutexGuard<'_, State>) -> Option<Job> {
    let item = state.current?;
    let entry = state.arena.resolve(item)?;
    Some(Job {
        item,
        source: Arc::clone(&entry.source),
        gain: state.gain * entry.gain,
        peak: entry.peak,
        offset: state.offset,
        reposition: state.reposition,
        sinks: state.sinks.clone(),
    })
}

fn decode(shared: &Arc<Shared>, job: &Job) -> Decoded {
    let mut source = job.source.lock().unwrap();
    if job.reposition {
        if let Err(err) = source.seek(job.offset) {
            tracing::warn!(item = ?job.item, %err, "seek failed, skipping item");
            return Decoded::EndOfItem;
        }
    }
    match source.read_chunk(shared.chunk_frames) {
        Ok(Some(chunk)) => Decoded::Chunk(chunk, source.decoded_format()),
        Ok(None) => Decoded::EndOfItem,
        Err(err) => {
            tracing::warn!(item = ?job.item, %err, "recoverable decode error, skipping chunk");
            Decoded::Skip
        }
    }
}

/// Convert and gain a chunk once per sink, then enqueue
fn deliver(shared: &Arc<Shared>, job: &Job, chunk: &DecodedChunk, decoded_format: AudioFormat) {
    for sink in &job.sinks {
        let target = if sink.pass_through() {
            decoded_format
        } else {
            sink.format()
        };
        let mut samples = if target == decoded_format {
            chunk.samples.clone()
        } else {
            match shared.converter.convert(&chunk.samples, &decoded_format, &target) {
                Ok(samples) => samples,
                Err(err) => {
                    tracing::warn!(%err, "conversion failed, dropping chunk for sink");
                    continue;
                }
            }
        };
        let gain = job.gain * sink.gain();
        apply_gain(&mut samples, gain as f32, job.peak as f32);
        sink.push_buffer(FrameBuffer::from_samples(
            samples, target, job.item, job.offset, job.offset,
        ));
    }
}
