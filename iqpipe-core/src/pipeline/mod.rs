//! The streaming pipeline: chunk pool, queues, rings, stage workers and
//! the orchestrator that wires them together.
//!
//! Data flows left to right through one dedicated thread per stage:
//!
//! ```text
//! [InputSource] -> (SDR ring) -> [Reader]
//!   -> raw_to_pre -> [PreProcessor] -> pre_to_resample -> [Resampler]
//!   -> resample_to_post -> [PostProcessor] -> (stdout queue | write ring)
//!   -> [Writer] -> sink            `-> iq blocks -> [IqOptimizer]
//! ```

pub mod chunk;
pub mod codec;
pub mod queue;
pub mod ring;
pub mod shutdown;

pub(crate) mod iq_worker;
pub(crate) mod postprocess;
pub(crate) mod preprocess;
pub mod reader;
pub(crate) mod resample_stage;
pub(crate) mod writer;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::arena::SetupArena;
use crate::config::{
    AppConfig, OutputDestination, BASE_SAMPLES, IO_FILE_WRITER_CHUNK_SIZE,
    RESAMPLER_OUTPUT_SAFETY_MARGIN,
};
use crate::dsp::{
    build_filter_plan, DcBlocker, FftFilter, FilterImplementation, FilterPlan, FirFilter,
    IqCorrectionState, IqEstimator, Nco, RationalResampler,
};
use crate::errors::{IqPipeError, PipelineError, Result};
use crate::io::input::{create_source, InputSource};
use crate::io::output::{create_writer, FileWriter};
use crate::logging::{LogEvent, PipelineLogger, SummaryEvent};

pub use chunk::{build_chunk_pool, SampleChunk};
pub use queue::ChunkQueue;
pub use reader::SourceContext;
pub use ring::ByteRing;
pub use shutdown::ShutdownToken;

use preprocess::{PreStage, StageFilter};

/// Operational mode, fixed at startup from the source kind and output
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// File source; back-pressure is natural, overruns cannot occur.
    File,
    /// Live source decoupled through the SDR ring buffer.
    BufferedSdr,
    /// Live source feeding the stage queue directly for lowest latency.
    RealtimeSdr,
}

#[derive(Debug, Default)]
struct ProgressCounters {
    total_frames_read: u64,
    total_output_frames: u64,
}

/// Drop accounting for the live capture paths, with log output limited
/// to one line per second.
pub struct OverrunCounters {
    start: Instant,
    last_log_ms: AtomicU64,
    dropped_since_log: AtomicU64,
    dropped_total: AtomicU64,
}

const OVERRUN_NEVER_LOGGED: u64 = u64::MAX;

impl OverrunCounters {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_log_ms: AtomicU64::new(OVERRUN_NEVER_LOGGED),
            dropped_since_log: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    fn record(&self, logger: &PipelineLogger) {
        self.dropped_since_log.fetch_add(1, Ordering::Relaxed);
        let total = self.dropped_total.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);
        let due = last == OVERRUN_NEVER_LOGGED || now.saturating_sub(last) >= 1000;
        if due
            && self
                .last_log_ms
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            let since = self.dropped_since_log.swap(0, Ordering::Relaxed);
            logger.log(LogEvent::Overrun {
                dropped_since_last: since,
                dropped_total: total,
            });
        }
    }

    pub fn total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

/// Shared handles every worker holds: queues, rings, counters and the
/// cancellation token. Read-mostly; the mutable pieces are counters.
pub struct AppResources {
    pub mode: PipelineMode,
    pub output_is_stdout: bool,
    pub raw_passthrough: bool,
    pub input_pair_bytes: usize,
    pub output_pair_bytes: usize,

    pub free_chunks: ChunkQueue<Box<SampleChunk>>,
    pub raw_to_pre: ChunkQueue<Box<SampleChunk>>,
    pub pre_to_resample: ChunkQueue<Box<SampleChunk>>,
    pub resample_to_post: ChunkQueue<Box<SampleChunk>>,
    pub stdout_queue: ChunkQueue<Box<SampleChunk>>,

    pub sdr_ring: Option<ByteRing>,
    pub write_ring: Option<ByteRing>,

    pub token: Arc<ShutdownToken>,
    pub iq_state: Arc<IqCorrectionState>,
    pub logger: Arc<PipelineLogger>,

    progress: Mutex<ProgressCounters>,
    overruns: OverrunCounters,
    pending_reset: AtomicBool,
    natural_eof: AtomicBool,
    bytes_written: AtomicU64,
    first_error: Mutex<Option<IqPipeError>>,
}

impl AppResources {
    pub fn count_frames_read(&self, frames: u64) {
        self.progress.lock().total_frames_read += frames;
    }

    pub fn count_frames_written(&self, frames: u64) {
        self.progress.lock().total_output_frames += frames;
    }

    pub fn progress_snapshot(&self) -> (u64, u64) {
        let counters = self.progress.lock();
        (counters.total_frames_read, counters.total_output_frames)
    }

    pub fn record_overrun(&self) {
        self.overruns.record(&self.logger);
    }

    pub fn overruns_dropped(&self) -> u64 {
        self.overruns.total()
    }

    pub(crate) fn set_pending_reset(&self) {
        self.pending_reset.store(true, Ordering::Release);
    }

    pub(crate) fn take_pending_reset(&self) -> bool {
        self.pending_reset.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_natural_eof(&self) {
        self.natural_eof.store(true, Ordering::Release);
    }

    pub(crate) fn set_bytes_written(&self, bytes: u64) {
        self.bytes_written.store(bytes, Ordering::Release);
    }

    /// Broadcast shutdown to every blocking point. Safe to call from
    /// any thread, including a signal handler thread.
    pub fn request_shutdown(&self) {
        self.token.request();
        self.broadcast();
    }

    /// Record a fatal stage error (first one wins) and shut down.
    pub fn fail_with(&self, error: IqPipeError) {
        {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.token.fail();
        self.broadcast();
    }

    fn broadcast(&self) {
        self.free_chunks.signal_shutdown();
        self.raw_to_pre.signal_shutdown();
        self.pre_to_resample.signal_shutdown();
        self.resample_to_post.signal_shutdown();
        self.stdout_queue.signal_shutdown();
        if let Some(ring) = &self.sdr_ring {
            ring.signal_shutdown();
        }
        if let Some(ring) = &self.write_ring {
            ring.signal_shutdown();
        }
    }
}

/// Clonable handle for signal handlers and embedders.
#[derive(Clone)]
pub struct ShutdownHandle {
    resources: Arc<AppResources>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.resources.request_shutdown();
    }
}

/// Periodic progress sample delivered to the optional callback.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub frames_read: u64,
    pub frames_written: u64,
    pub percent: Option<f64>,
}

pub type ProgressFn = Box<dyn Fn(ProgressUpdate) + Send>;

/// Final accounting returned by [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub overruns_dropped: u64,
    pub duration_secs: f64,
    pub cancelled: bool,
}

/// Fully constructed pipeline, ready to run. Construction performs all
/// validation, sizing and allocation; `run` only spawns and joins.
pub struct Pipeline {
    resources: Arc<AppResources>,
    source: Option<Box<dyn InputSource>>,
    file_writer: Option<Box<dyn FileWriter>>,
    pre_stage: Option<PreStage>,
    post_stage: Option<postprocess::PostStage>,
    resampler: Option<RationalResampler>,
    resample_active: bool,
    iq_channels: Option<iq_worker::IqWorkerChannels>,
    ring_reader_temp: Option<Vec<u8>>,
    writer_scratch: Option<Vec<u8>>,
    source_summary: Vec<(String, String)>,
    known_total_frames: Option<u64>,
}

impl Pipeline {
    pub fn new(config: AppConfig, logger: Arc<PipelineLogger>) -> Result<Self> {
        let source = create_source(&config)?;
        Self::with_source(config, source, logger)
    }

    /// Build the pipeline around an already-constructed source (used by
    /// embedders and tests that provide their own driver).
    pub fn with_source(
        mut config: AppConfig,
        source: Box<dyn InputSource>,
        logger: Arc<PipelineLogger>,
    ) -> Result<Self> {
        // A WAV header overrides the configured raw format and rate,
        // and no-resample pins the output rate to whatever came in.
        config.input_format = source.resolved_format();
        config.input_rate = source.resolved_rate();
        if config.no_resample {
            config.output_rate = config.input_rate;
        }
        config.validate()?;
        source.validate_options(&config)?;

        let mode = if config.input.is_live() {
            if matches!(config.output, OutputDestination::Stdout) {
                PipelineMode::RealtimeSdr
            } else {
                PipelineMode::BufferedSdr
            }
        } else {
            PipelineMode::File
        };
        let output_is_stdout = matches!(config.output, OutputDestination::Stdout);

        let arena = SetupArena::new(config.arena_bytes);
        let ratio = config.resample_ratio();
        let resample_active = !config.no_resample && ratio != 1.0;
        let resampler = if resample_active {
            Some(RationalResampler::new(ratio)?)
        } else {
            None
        };

        let plan = build_filter_plan(&config)?;
        let filter_carry = match &plan {
            Some(FilterPlan {
                implementation: FilterImplementation::Fft { block_size },
                ..
            }) => *block_size,
            _ => 0,
        };

        // Chunk buffer sizing: the pre buffer holds a chunk plus any
        // FFT-filter carry; the resampled buffer additionally holds the
        // resampler's worst-case burst for that much input.
        let pre_peak = BASE_SAMPLES + filter_carry;
        let resampled_peak = match &resampler {
            Some(r) => r.worst_case_output(pre_peak),
            None => pre_peak,
        };
        let max_out_samples =
            pre_peak.max(resampled_peak) + filter_carry + RESAMPLER_OUTPUT_SAFETY_MARGIN;

        let input_pair_bytes = config.input_format.pair_bytes();
        let output_pair_bytes = config.output_format.pair_bytes();

        // Fixed-lifetime setup allocations are charged to the arena;
        // the chunk pool and the two rings are the separately-released
        // data plane.
        let num_chunks = config.num_chunks.max(2);
        arena.charge(5 * num_chunks * std::mem::size_of::<Box<SampleChunk>>())?;
        let ring_reader_temp = if mode == PipelineMode::BufferedSdr {
            Some(arena.alloc_bytes(BASE_SAMPLES * 2)?)
        } else {
            None
        };
        let writer_scratch = if output_is_stdout {
            None
        } else {
            Some(arena.alloc_bytes(IO_FILE_WRITER_CHUNK_SIZE)?)
        };

        let free_chunks = ChunkQueue::new(num_chunks);
        for chunk in build_chunk_pool(
            num_chunks,
            BASE_SAMPLES * input_pair_bytes,
            max_out_samples,
            output_pair_bytes,
        ) {
            free_chunks.enqueue(chunk);
        }

        let sdr_ring = if mode == PipelineMode::BufferedSdr {
            Some(ByteRing::new(config.sdr_ring_bytes))
        } else {
            None
        };
        let write_ring = if output_is_stdout {
            None
        } else {
            Some(ByteRing::new(config.write_ring_bytes))
        };

        let file_writer = if output_is_stdout {
            None
        } else {
            Some(create_writer(&config)?)
        };

        let iq_state = IqCorrectionState::new();
        let (forwarder, iq_channels) = if config.iq_correction {
            let (forwarder, channels) = iq_worker::forwarding_channels();
            (Some(forwarder), Some(channels))
        } else {
            (None, None)
        };

        let stage_filter = |plan: &FilterPlan| -> Result<StageFilter> {
            Ok(match plan.implementation {
                FilterImplementation::Fir => {
                    StageFilter::Fir(FirFilter::new(&plan.taps, max_out_samples))
                }
                FilterImplementation::Fft { block_size } => {
                    StageFilter::Fft(FftFilter::new(&plan.taps, block_size)?)
                }
            })
        };
        let (pre_filter, post_filter) = match &plan {
            None => (None, None),
            Some(plan) if plan.apply_post_resample => (None, Some(stage_filter(plan)?)),
            Some(plan) => (Some(stage_filter(plan)?), None),
        };

        let pre_nco = (config.freq_shift_hz != 0.0 && !config.shift_after_resample)
            .then(|| Nco::new(config.freq_shift_hz, config.input_rate));
        let post_nco = (config.freq_shift_hz != 0.0 && config.shift_after_resample)
            .then(|| Nco::new(config.freq_shift_hz, config.output_rate));

        let pre_stage = PreStage {
            input_format: config.input_format,
            gain: config.gain,
            raw_passthrough: config.raw_passthrough,
            dc: config
                .dc_block
                .then(|| DcBlocker::new(crate::config::DC_BLOCK_CUTOFF_HZ, config.input_rate)),
            nco: pre_nco,
            filter: pre_filter,
            iq_enabled: config.iq_correction,
            forwarder,
            samples_until_forward: 1,
        };
        let post_stage = postprocess::PostStage {
            output_format: config.output_format,
            raw_passthrough: config.raw_passthrough,
            filter: post_filter,
            nco: post_nco,
        };

        let source_summary = source.summary_info();
        let known_total_frames = source.has_known_length().then(|| source.total_frames()).flatten();

        let resources = Arc::new(AppResources {
            mode,
            output_is_stdout,
            raw_passthrough: config.raw_passthrough,
            input_pair_bytes,
            output_pair_bytes,
            free_chunks,
            raw_to_pre: ChunkQueue::new(num_chunks),
            pre_to_resample: ChunkQueue::new(num_chunks),
            resample_to_post: ChunkQueue::new(num_chunks),
            stdout_queue: ChunkQueue::new(num_chunks),
            sdr_ring,
            write_ring,
            token: ShutdownToken::new(),
            iq_state,
            logger,
            progress: Mutex::new(ProgressCounters::default()),
            overruns: OverrunCounters::new(),
            pending_reset: AtomicBool::new(false),
            natural_eof: AtomicBool::new(false),
            bytes_written: AtomicU64::new(0),
            first_error: Mutex::new(None),
        });

        Ok(Self {
            resources,
            source: Some(source),
            file_writer,
            pre_stage: Some(pre_stage),
            post_stage: Some(post_stage),
            resampler,
            resample_active,
            iq_channels,
            ring_reader_temp,
            writer_scratch,
            source_summary,
            known_total_frames,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            resources: Arc::clone(&self.resources),
        }
    }

    /// Spawn all workers, pump progress until the Writer finishes, join
    /// everything and return the run summary.
    pub fn run(mut self, progress: Option<ProgressFn>) -> Result<RunSummary> {
        let resources = Arc::clone(&self.resources);
        let started = Instant::now();

        resources.logger.log(LogEvent::SourceInfo {
            entries: self.source_summary.clone(),
        });

        let mut handles: Vec<(&'static str, thread::JoinHandle<()>)> = Vec::new();
        let mut spawn = |name: &'static str, body: Box<dyn FnOnce() + Send>| {
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(body)
                .expect("spawning a pipeline worker thread");
            handles.push((name, handle));
        };

        let source = self.source.take().expect("pipeline run consumed twice");
        match resources.mode {
            PipelineMode::File => {
                let r = Arc::clone(&resources);
                spawn("reader", Box::new(move || reader::run_file_reader(r, source)));
            }
            PipelineMode::BufferedSdr => {
                let r = Arc::clone(&resources);
                spawn("capture", Box::new(move || reader::run_capture(r, source)));
                let r = Arc::clone(&resources);
                let temp = self.ring_reader_temp.take().unwrap_or_default();
                spawn("reader", Box::new(move || reader::run_ring_reader(r, temp)));
            }
            PipelineMode::RealtimeSdr => {
                let r = Arc::clone(&resources);
                spawn("capture", Box::new(move || reader::run_capture(r, source)));
            }
        }

        let pre_stage = self.pre_stage.take().expect("pre stage present");
        let r = Arc::clone(&resources);
        spawn(
            "preprocessor",
            Box::new(move || preprocess::run_preprocessor(r, pre_stage)),
        );

        let resampler = if self.resample_active {
            self.resampler.take()
        } else {
            None
        };
        let r = Arc::clone(&resources);
        spawn(
            "resampler",
            Box::new(move || resample_stage::run_resampler(r, resampler)),
        );

        let post_stage = self.post_stage.take().expect("post stage present");
        let r = Arc::clone(&resources);
        spawn(
            "postprocessor",
            Box::new(move || postprocess::run_postprocessor(r, post_stage)),
        );

        let writer_name = "writer";
        if resources.output_is_stdout {
            let r = Arc::clone(&resources);
            spawn(writer_name, Box::new(move || writer::run_stdout_writer(r)));
        } else {
            let sink = self.file_writer.take().expect("file writer present");
            let scratch = self.writer_scratch.take().unwrap_or_default();
            let r = Arc::clone(&resources);
            spawn(
                writer_name,
                Box::new(move || writer::run_file_writer(r, sink, scratch)),
            );
        }

        if let Some(channels) = self.iq_channels.take() {
            let state = Arc::clone(&resources.iq_state);
            spawn(
                "iq-optimizer",
                Box::new(move || iq_worker::run_iq_worker(state, channels, IqEstimator::new())),
            );
        }

        // The Writer finishing (EOF or shutdown) marks the end of data.
        let writer_done = |handles: &[(&'static str, thread::JoinHandle<()>)]| {
            handles
                .iter()
                .find(|(name, _)| *name == writer_name)
                .map(|(_, handle)| handle.is_finished())
                .unwrap_or(true)
        };
        let total = self.known_total_frames;
        while !writer_done(&handles) {
            thread::sleep(Duration::from_millis(200));
            let (frames_read, frames_written) = resources.progress_snapshot();
            let percent = total.filter(|t| *t > 0).map(|t| {
                (frames_read as f64 / t as f64 * 100.0).min(100.0)
            });
            if let Some(callback) = &progress {
                callback(ProgressUpdate {
                    frames_read,
                    frames_written,
                    percent,
                });
            }
            resources.logger.log(LogEvent::Progress {
                frames_read,
                frames_written,
                percent,
            });
        }

        // Writer exit means upstream stages have drained (or a fatal
        // shutdown was broadcast); release anything still blocked.
        resources.request_shutdown();
        for (name, handle) in handles {
            if handle.join().is_err() {
                resources.fail_with(IqPipeError::Pipeline(PipelineError::WorkerPanicked {
                    stage: name,
                }));
            }
        }

        if let Some(error) = self.resources.first_error.lock().take() {
            return Err(error);
        }

        let (frames_read, frames_written) = resources.progress_snapshot();
        let cancelled = resources.token.is_requested()
            && !resources.natural_eof.load(Ordering::Acquire);
        let summary = RunSummary {
            frames_read,
            frames_written,
            bytes_written: resources.bytes_written.load(Ordering::Acquire),
            overruns_dropped: resources.overruns_dropped(),
            duration_secs: started.elapsed().as_secs_f64(),
            cancelled,
        };
        resources.logger.log(LogEvent::Summary(SummaryEvent {
            timestamp: chrono::Utc::now(),
            duration_secs: summary.duration_secs,
            frames_read: summary.frames_read,
            frames_written: summary.frames_written,
            bytes_written: summary.bytes_written,
            overruns_dropped: summary.overruns_dropped,
            cancelled: summary.cancelled,
        }));
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrun_log_rate_limited() {
        let counters = OverrunCounters::new();
        let logger = PipelineLogger::disabled();
        for _ in 0..100 {
            counters.record(&logger);
        }
        assert_eq!(counters.total(), 100);
        // First record logs immediately, the rest accumulate.
        assert!(counters.dropped_since_log.load(Ordering::Relaxed) >= 99);
    }
}
