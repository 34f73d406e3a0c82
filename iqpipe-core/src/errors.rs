//! iqpipe error types with granular categories

use thiserror::Error;

/// Top-level error type for all iqpipe operations
#[derive(Debug, Error)]
pub enum IqPipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input source error: {0}")]
    Source(#[from] SourceError),

    #[error("Output sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("DSP setup error: {0}")]
    Dsp(#[from] DspError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration validation errors, raised before any worker starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid sample rate: {rate} Hz (must be > 0)")]
    InvalidSampleRate { rate: f64 },

    #[error("Resample ratio {ratio} out of range [{min}, {max}]")]
    RatioOutOfRange { ratio: f64, min: f64, max: f64 },

    #[error("Unsupported sample format name: {name}")]
    UnknownSampleFormat { name: String },

    #[error("Output container {container} does not support sample format {format}")]
    ContainerFormatMismatch { container: String, format: String },

    #[error("Filter chain has {count} entries, maximum is {max}")]
    FilterChainTooLong { count: usize, max: usize },

    #[error("Invalid filter parameter: {reason}")]
    InvalidFilter { reason: String },

    #[error("FFT block size {size} invalid: {reason}")]
    InvalidFftBlockSize { size: usize, reason: String },

    #[error("Raw passthrough requires matching formats and an empty DSP chain: {reason}")]
    InvalidPassthrough { reason: String },

    #[error("Setup arena exhausted: requested {requested} bytes, {remaining} of {capacity} remaining")]
    ArenaExhausted {
        requested: usize,
        remaining: usize,
        capacity: usize,
    },

    #[error("Missing required option: {name}")]
    MissingOption { name: String },
}

/// Errors raised by an input source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Cannot open input {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Input read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Unsupported input container layout: {reason}")]
    UnsupportedLayout { reason: String },

    #[error("Source option rejected: {reason}")]
    BadOptions { reason: String },
}

/// Errors raised by an output sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Cannot open output {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Output write failed after {bytes_written} bytes: {reason}")]
    WriteFailed { bytes_written: u64, reason: String },

    #[error("Failed to finalize output container: {reason}")]
    FinalizeFailed { reason: String },
}

/// DSP construction errors, raised at setup time only
#[derive(Debug, Error)]
pub enum DspError {
    #[error("Resampler construction failed: {reason}")]
    ResamplerConstruction { reason: String },

    #[error("Filter design failed: {reason}")]
    FilterDesignFailed { reason: String },

    #[error("FFT size {size} is not a power of 2")]
    InvalidFftSize { size: usize },

    #[error("Filter passband edge {edge_hz} Hz exceeds Nyquist {nyquist_hz} Hz")]
    PassbandBeyondNyquist { edge_hz: f64, nyquist_hz: f64 },
}

/// Runtime pipeline failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("SDR packet stream is corrupt: {reason}")]
    CorruptSdrStream { reason: String },

    #[error("Worker thread panicked: {stage}")]
    WorkerPanicked { stage: &'static str },

    #[error("Pipeline aborted after a fatal stage error")]
    Aborted,
}

/// Result type alias for iqpipe operations
pub type Result<T> = std::result::Result<T, IqPipeError>;
