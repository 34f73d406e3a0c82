//! Reader side of the pipeline: the source-facing context, the SDR
//! capture path, and the worker that turns packets into chunks.

use std::sync::Arc;

use crate::config::BASE_SAMPLES;
use crate::errors::IqPipeError;
use crate::io::input::InputSource;
use crate::pipeline::chunk::SampleChunk;
use crate::pipeline::codec::{
    read_packet, write_deinterleaved_packet, write_interleaved_packet, write_reset_event,
    ReadOutcome,
};
use crate::pipeline::{AppResources, PipelineMode};

/// Handle the Reader gives an [`InputSource`]. File-style sources pull
/// free chunks and fill them; live sources push packets and the context
/// routes them by pipeline mode: into the SDR ring in buffered mode
/// (packet dropped when it does not fit), or directly into the first
/// stage queue in realtime mode (whole chunk dropped when no free chunk
/// is immediately available).
pub struct SourceContext {
    resources: Arc<AppResources>,
}

impl SourceContext {
    pub(crate) fn new(resources: Arc<AppResources>) -> Self {
        Self { resources }
    }

    pub fn is_shutdown(&self) -> bool {
        self.resources.token.is_requested()
    }

    pub fn input_pair_bytes(&self) -> usize {
        self.resources.input_pair_bytes
    }

    /// Blocking; `None` means the pipeline is shutting down.
    pub fn acquire_chunk(&self) -> Option<Box<SampleChunk>> {
        self.resources.free_chunks.dequeue()
    }

    /// Hand a filled chunk to the pipeline. Returns `false` on shutdown.
    pub fn submit_chunk(&self, chunk: Box<SampleChunk>) -> bool {
        self.resources.count_frames_read(chunk.frames_read as u64);
        self.resources.raw_to_pre.enqueue(chunk)
    }

    /// Return an unused chunk to the free pool.
    pub fn recycle_chunk(&self, mut chunk: Box<SampleChunk>) {
        chunk.reset();
        let _ = self.resources.free_chunks.enqueue(chunk);
    }

    /// Push one interleaved packet from a live capture callback.
    pub fn push_interleaved(&self, payload: &[u8], num_samples: u32) {
        match self.resources.mode {
            PipelineMode::BufferedSdr => {
                let Some(ring) = &self.resources.sdr_ring else {
                    return;
                };
                self.flush_pending_reset(ring);
                if !write_interleaved_packet(ring, payload, num_samples) {
                    self.resources.record_overrun();
                }
            }
            PipelineMode::RealtimeSdr => self.push_direct(|chunk| {
                let frames = (num_samples as usize).min(BASE_SAMPLES);
                let bytes = frames * self.resources.input_pair_bytes;
                chunk.raw_input_data[..bytes].copy_from_slice(&payload[..bytes]);
                chunk.frames_read = frames;
            }),
            PipelineMode::File => {}
        }
    }

    /// Push one de-interleaved packet (little-endian i16 planes).
    pub fn push_deinterleaved(&self, i_plane: &[u8], q_plane: &[u8]) {
        match self.resources.mode {
            PipelineMode::BufferedSdr => {
                let Some(ring) = &self.resources.sdr_ring else {
                    return;
                };
                self.flush_pending_reset(ring);
                if !write_deinterleaved_packet(ring, i_plane, q_plane) {
                    self.resources.record_overrun();
                }
            }
            PipelineMode::RealtimeSdr => self.push_direct(|chunk| {
                let frames = (i_plane.len() / 2).min(BASE_SAMPLES);
                for k in 0..frames {
                    chunk.raw_input_data[4 * k..4 * k + 2]
                        .copy_from_slice(&i_plane[2 * k..2 * k + 2]);
                    chunk.raw_input_data[4 * k + 2..4 * k + 4]
                        .copy_from_slice(&q_plane[2 * k..2 * k + 2]);
                }
                chunk.frames_read = frames;
            }),
            PipelineMode::File => {}
        }
    }

    /// Signal a driver stream reset (overrun / restart).
    pub fn push_stream_reset(&self) {
        match self.resources.mode {
            PipelineMode::BufferedSdr => {
                let Some(ring) = &self.resources.sdr_ring else {
                    return;
                };
                if !write_reset_event(ring) {
                    self.resources.set_pending_reset();
                }
            }
            PipelineMode::RealtimeSdr => self.resources.set_pending_reset(),
            PipelineMode::File => {}
        }
    }

    /// A reset that could not be stored earlier is emitted before the
    /// next packet so the discontinuity keeps its place in the stream.
    fn flush_pending_reset(&self, ring: &crate::pipeline::ring::ByteRing) {
        if self.resources.take_pending_reset() && !write_reset_event(ring) {
            self.resources.set_pending_reset();
        }
    }

    fn push_direct(&self, fill: impl FnOnce(&mut SampleChunk)) {
        match self.resources.free_chunks.try_dequeue() {
            Some(mut chunk) => {
                fill(&mut chunk);
                chunk.input_bytes_per_sample_pair = self.resources.input_pair_bytes;
                chunk.stream_discontinuity_event = self.resources.take_pending_reset();
                let _ = self.submit_chunk(chunk);
            }
            None => {
                // Whole-chunk drop; the gap is a discontinuity.
                self.resources.record_overrun();
                self.resources.set_pending_reset();
            }
        }
    }

    /// End-of-stream marker from a live capture path.
    pub(crate) fn finish_capture(&self) {
        match self.resources.mode {
            PipelineMode::BufferedSdr => {
                if let Some(ring) = &self.resources.sdr_ring {
                    ring.close();
                }
            }
            PipelineMode::RealtimeSdr => {
                if let Some(mut chunk) = self.resources.free_chunks.dequeue() {
                    chunk.is_last_chunk = true;
                    chunk.stream_discontinuity_event = self.resources.take_pending_reset();
                    let _ = self.resources.raw_to_pre.enqueue(chunk);
                }
            }
            PipelineMode::File => {}
        }
    }
}

/// Drives a file-style source through its lifecycle. The source itself
/// submits the sentinel on EOF; errors surface as a fatal pipeline
/// failure after a sentinel is flushed so downstream stages drain.
pub(crate) fn run_file_reader(resources: Arc<AppResources>, mut source: Box<dyn InputSource>) {
    let ctx = SourceContext::new(Arc::clone(&resources));
    let outcome = drive_source(&mut source, &ctx);
    finish_reader(&resources, outcome, "reader");
}

/// Capture worker for the live modes: runs the driver loop pushing
/// packets, then marks end of stream.
pub(crate) fn run_capture(resources: Arc<AppResources>, mut source: Box<dyn InputSource>) {
    let ctx = SourceContext::new(Arc::clone(&resources));
    let outcome = drive_source(&mut source, &ctx);
    ctx.finish_capture();
    finish_reader(&resources, outcome, "capture");
}

fn drive_source(
    source: &mut Box<dyn InputSource>,
    ctx: &SourceContext,
) -> Result<(), IqPipeError> {
    let run = source
        .initialize(ctx)
        .and_then(|_| source.start_stream(ctx))
        .and_then(|_| source.stop_stream(ctx));
    source.cleanup(ctx);
    run
}

fn finish_reader(resources: &Arc<AppResources>, outcome: Result<(), IqPipeError>, stage: &str) {
    match outcome {
        Ok(()) => {
            if !resources.token.is_requested() {
                resources.mark_natural_eof();
            }
        }
        Err(e) => {
            resources
                .logger
                .error(format!("{} failed", stage), Some(e.to_string()));
            emit_sentinel(resources);
            resources.fail_with(e);
        }
    }
}

fn emit_sentinel(resources: &Arc<AppResources>) {
    if let Some(mut chunk) = resources.free_chunks.try_dequeue() {
        chunk.reset();
        chunk.is_last_chunk = true;
        let _ = resources.raw_to_pre.enqueue(chunk);
    }
}

/// Buffered-SDR Reader: drains the SDR ring through the packet codec
/// and forwards uniform chunks, tagging the one that follows a reset
/// event with the discontinuity flag.
pub(crate) fn run_ring_reader(resources: Arc<AppResources>, mut temp: Vec<u8>) {
    let Some(ring) = &resources.sdr_ring else {
        return;
    };
    let pair_bytes = resources.input_pair_bytes;
    let mut pending_discontinuity = false;

    loop {
        let Some(mut chunk) = resources.free_chunks.dequeue() else {
            break;
        };
        match read_packet(ring, &mut chunk, pair_bytes, &mut temp, &resources.logger) {
            Ok(ReadOutcome::Frames(_)) => {
                chunk.stream_discontinuity_event = pending_discontinuity;
                pending_discontinuity = false;
                resources.count_frames_read(chunk.frames_read as u64);
                if !resources.raw_to_pre.enqueue(chunk) {
                    break;
                }
            }
            Ok(ReadOutcome::ResetEvent) => {
                pending_discontinuity = true;
                chunk.reset();
                let _ = resources.free_chunks.enqueue(chunk);
            }
            Ok(ReadOutcome::Eof) => {
                chunk.reset();
                chunk.is_last_chunk = true;
                chunk.stream_discontinuity_event = pending_discontinuity;
                let _ = resources.raw_to_pre.enqueue(chunk);
                if !resources.token.is_requested() {
                    resources.mark_natural_eof();
                }
                break;
            }
            Err(e) => {
                chunk.reset();
                chunk.is_last_chunk = true;
                let _ = resources.raw_to_pre.enqueue(chunk);
                let err = IqPipeError::Pipeline(e);
                resources
                    .logger
                    .error("SDR packet stream corrupt", Some(err.to_string()));
                resources.fail_with(err);
                break;
            }
        }
    }
}
