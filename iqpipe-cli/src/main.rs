mod config;

use clap::Parser;
use color_eyre::eyre::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use config::{parse_filter, Preset};
use iqpipe_core::config::{
    AppConfig, InputSelection, OutputContainer, OutputDestination, SampleFormat,
    FILE_WRITE_RING_DEFAULT, PIPELINE_NUM_CHUNKS, SDR_INPUT_RING_DEFAULT, SETUP_ARENA_DEFAULT,
};
use iqpipe_core::logging::{LogConfig, LogFormat, LogLevel, LogTarget, PipelineLogger};
use iqpipe_core::pipeline::{Pipeline, ProgressFn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming I/Q sample processor", long_about = None)]
struct Cli {
    /// Input sample file (raw I/Q or WAV; WAV supplies format and rate)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Generate a test tone at this baseband frequency instead of
    /// reading a file (behaves like a live source)
    #[arg(long)]
    tone_freq: Option<f64>,

    /// Tone source duration in seconds (default: until cancelled)
    #[arg(long)]
    tone_duration: Option<f64>,

    /// Output path, or '-' for stdout
    #[arg(short, long)]
    output: String,

    /// Sample format of raw input (ignored for WAV input; default cs16)
    #[arg(long)]
    input_sample_format: Option<String>,

    /// Sample rate of raw input in Hz (ignored for WAV input)
    #[arg(long)]
    input_rate: Option<f64>,

    /// Target output sample rate in Hz
    #[arg(long)]
    output_rate: Option<f64>,

    /// Output sample format (default cs16)
    #[arg(long)]
    output_sample_format: Option<String>,

    /// Output container: raw, wav or rf64 (default raw)
    #[arg(long)]
    output_container: Option<String>,

    /// Linear gain factor applied before the DSP chain
    #[arg(long)]
    gain: Option<f32>,

    /// Frequency translation in Hz
    #[arg(long)]
    freq_shift: Option<f64>,

    /// Apply the frequency shift after the resampler
    #[arg(long)]
    shift_after_resample: bool,

    /// Enable the DC blocker
    #[arg(long)]
    dc_block: bool,

    /// Enable automatic I/Q imbalance correction
    #[arg(long)]
    iq_correction: bool,

    /// Filter chain entry (repeatable): lowpass:<hz>, highpass:<hz>,
    /// bandpass:<center>:<width>, bandstop:<center>:<width>
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Force the FFT overlap-save filter implementation
    #[arg(long)]
    filter_fft: bool,

    /// FFT filter block size (power of two)
    #[arg(long)]
    filter_block_size: Option<usize>,

    /// Bypass the resampler even when rates differ
    #[arg(long)]
    no_resample: bool,

    /// Copy input bytes straight through (formats must match, no DSP)
    #[arg(long)]
    raw_passthrough: bool,

    /// Load defaults from a TOML preset (name or path)
    #[arg(short, long)]
    preset: Option<String>,

    /// Log format: json, logfmt or pretty
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Log level: debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let preset = match &args.preset {
        Some(name) => Preset::load(name)?,
        None => Preset::default(),
    };
    let config = build_config(&args, &preset)?;
    let logger = Arc::new(
        PipelineLogger::new(&log_config(&args)?).wrap_err("Failed to initialize logging")?,
    );

    let pipeline = Pipeline::new(config, Arc::clone(&logger)).wrap_err("Pipeline setup failed")?;

    let handle = pipeline.shutdown_handle();
    ctrlc::set_handler(move || handle.shutdown()).wrap_err("Failed to install signal handler")?;

    let progress = if args.no_progress {
        None
    } else {
        Some(progress_callback())
    };

    let summary = pipeline.run(progress).wrap_err("Pipeline failed")?;
    if summary.cancelled {
        logger.info("cancelled by user; output finalized");
    }
    Ok(())
}

fn build_config(args: &Cli, preset: &Preset) -> Result<AppConfig> {
    let input = match (&args.input, args.tone_freq) {
        (Some(_), Some(_)) => bail!("--input and --tone-freq are mutually exclusive"),
        (Some(path), None) => InputSelection::File { path: path.clone() },
        (None, Some(freq_hz)) => InputSelection::Tone {
            freq_hz,
            rate: args
                .input_rate
                .or(preset.input_rate)
                .unwrap_or(2_000_000.0),
            duration_secs: args.tone_duration,
        },
        (None, None) => bail!("either --input or --tone-freq is required"),
    };

    let output = if args.output == "-" {
        OutputDestination::Stdout
    } else {
        OutputDestination::File {
            path: PathBuf::from(&args.output),
        }
    };

    let pick_format = |cli: &Option<String>, preset: &Option<String>| -> Result<SampleFormat> {
        let name = cli.as_deref().or(preset.as_deref()).unwrap_or("cs16");
        SampleFormat::parse(name).map_err(color_eyre::eyre::Report::from)
    };
    let input_format = pick_format(&args.input_sample_format, &preset.input_sample_format)?;
    let output_format = pick_format(&args.output_sample_format, &preset.output_sample_format)?;

    let container_name = args
        .output_container
        .as_deref()
        .or(preset.output_container.as_deref())
        .unwrap_or("raw");
    let output_container = match container_name {
        "raw" => OutputContainer::Raw,
        "wav" => OutputContainer::Wav,
        "rf64" => OutputContainer::Rf64,
        other => bail!("Unknown output container '{}'", other),
    };

    let no_resample = args.no_resample || preset.no_resample.unwrap_or(false);
    let input_rate = args.input_rate.or(preset.input_rate).unwrap_or(0.0);
    let output_rate = args.output_rate.or(preset.output_rate).unwrap_or(0.0);
    if !no_resample && output_rate <= 0.0 {
        bail!("--output-rate is required unless --no-resample is set");
    }

    let mut filters = Vec::new();
    let filter_args = if args.filters.is_empty() {
        &preset.filter
    } else {
        &args.filters
    };
    for spec in filter_args {
        filters.push(parse_filter(spec)?);
    }

    Ok(AppConfig {
        input,
        input_format,
        // Raw file input needs a rate; WAV and tone sources resolve
        // their own during pipeline setup.
        input_rate,
        output,
        output_format,
        output_container,
        output_rate: if no_resample { 1.0 } else { output_rate },
        gain: args.gain.or(preset.gain).unwrap_or(1.0),
        freq_shift_hz: args.freq_shift.or(preset.freq_shift).unwrap_or(0.0),
        shift_after_resample: args.shift_after_resample
            || preset.shift_after_resample.unwrap_or(false),
        dc_block: args.dc_block || preset.dc_block.unwrap_or(false),
        iq_correction: args.iq_correction || preset.iq_correction.unwrap_or(false),
        filters,
        force_fft_filter: args.filter_fft || preset.filter_fft.unwrap_or(false),
        fft_block_size: args.filter_block_size.or(preset.filter_block_size),
        no_resample,
        raw_passthrough: args.raw_passthrough || preset.raw_passthrough.unwrap_or(false),
        arena_bytes: SETUP_ARENA_DEFAULT,
        sdr_ring_bytes: SDR_INPUT_RING_DEFAULT,
        write_ring_bytes: FILE_WRITE_RING_DEFAULT,
        num_chunks: PIPELINE_NUM_CHUNKS,
    })
}

fn log_config(args: &Cli) -> Result<LogConfig> {
    let format = match args.log_format.as_str() {
        "json" => LogFormat::Json,
        "logfmt" => LogFormat::Logfmt,
        "pretty" => LogFormat::Pretty,
        other => bail!("Unknown log format '{}'", other),
    };
    let level = match args.log_level.as_str() {
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        other => bail!("Unknown log level '{}'", other),
    };
    // Samples may be going to stdout, so logs never do.
    let (target, file_path) = match &args.log_file {
        Some(path) => (LogTarget::File, Some(path.clone())),
        None => (LogTarget::Stderr, None),
    };
    Ok(LogConfig {
        target,
        file_path,
        format,
        level,
    })
}

fn progress_callback() -> ProgressFn {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {percent:>3}% | {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    Box::new(move |update| {
        match update.percent {
            Some(percent) => bar.set_position(percent as u64),
            None => bar.tick(),
        }
        bar.set_message(format!(
            "{} in / {} out",
            update.frames_read, update.frames_written
        ));
    })
}
