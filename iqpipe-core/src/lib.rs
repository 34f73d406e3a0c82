//! iqpipe core library
//!
//! Streaming I/Q sample processing for software-defined radio: a
//! multi-threaded producer/consumer pipeline that reads complex
//! baseband samples from files or live sources, runs an optional DSP
//! chain (DC block, I/Q correction, frequency translation, FIR/FFT
//! filtering, rate conversion, gain), converts to a target sample
//! format and writes raw, WAV or RF64 output or streams to stdout.

pub mod arena;
pub mod config;
pub mod convert;
pub mod dsp;
pub mod errors;
pub mod io;
pub mod logging;
pub mod pipeline;

pub use config::{
    AppConfig, FilterSpec, InputSelection, OutputContainer, OutputDestination, SampleFormat,
};
pub use errors::{IqPipeError, Result};
pub use pipeline::{Pipeline, ProgressFn, ProgressUpdate, RunSummary, ShutdownHandle};
