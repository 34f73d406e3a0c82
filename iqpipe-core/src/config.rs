//! Configuration types for the iqpipe pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::ConfigError;

/// I/Q frames read from the source per chunk.
pub const BASE_SAMPLES: usize = 16_384;

/// Number of pre-allocated chunks cycling through the pipeline.
pub const PIPELINE_NUM_CHUNKS: usize = 512;

/// Default size of the SDR input ring buffer (buffered-SDR mode).
pub const SDR_INPUT_RING_DEFAULT: usize = 256 * 1024 * 1024;

/// Default size of the file-write ring buffer (file-output mode).
pub const FILE_WRITE_RING_DEFAULT: usize = 1024 * 1024 * 1024;

/// Bytes drained from the output ring per file write.
pub const IO_FILE_WRITER_CHUNK_SIZE: usize = 1024 * 1024;

/// Extra output frames the resampler may produce beyond `ceil(n * ratio)`.
pub const RESAMPLER_OUTPUT_SAFETY_MARGIN: usize = 128;

/// Default byte budget of the setup arena.
pub const SETUP_ARENA_DEFAULT: usize = 16 * 1024 * 1024;

/// Samples between blocks forwarded to the I/Q optimization worker.
pub const IQ_CORRECTION_DEFAULT_PERIOD: u64 = 2_000_000;

pub const IQ_CORRECTION_FFT_SIZE: usize = 1024;
pub const IQ_CORRECTION_PEAK_THRESHOLD_DB: f32 = -60.0;
pub const IQ_MAX_PASSES: usize = 25;
pub const IQ_BASE_INCREMENT: f32 = 0.0001;
pub const IQ_CORRECTION_SMOOTHING_FACTOR: f32 = 0.05;

/// Maximum number of entries in a user filter chain.
pub const MAX_FILTER_CHAIN: usize = 5;

/// DC blocker cutoff frequency.
pub const DC_BLOCK_CUTOFF_HZ: f64 = 10.0;

/// Valid resample ratio range.
pub const RESAMPLE_RATIO_MIN: f64 = 0.001;
pub const RESAMPLE_RATIO_MAX: f64 = 1000.0;

/// Default stopband attenuation for the resampler, in dB.
pub const RESAMPLER_STOPBAND_DB: f64 = 60.0;

/// On-the-wire sample formats, all little-endian, complex formats
/// interleaved I then Q.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    F32,
    Cs8,
    Cu8,
    Cs16,
    Cu16,
    Cs32,
    Cu32,
    Cf32,
    /// Signed 16-bit with an implicit Q4.11 fixed point (BladeRF native).
    Sc16Q11,
}

impl SampleFormat {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let fmt = match name {
            "s8" => Self::S8,
            "u8" => Self::U8,
            "s16" => Self::S16,
            "u16" => Self::U16,
            "s32" => Self::S32,
            "u32" => Self::U32,
            "f32" => Self::F32,
            "cs8" => Self::Cs8,
            "cu8" => Self::Cu8,
            "cs16" => Self::Cs16,
            "cu16" => Self::Cu16,
            "cs32" => Self::Cs32,
            "cu32" => Self::Cu32,
            "cf32" => Self::Cf32,
            "sc16q11" => Self::Sc16Q11,
            _ => {
                return Err(ConfigError::UnknownSampleFormat {
                    name: name.to_string(),
                })
            }
        };
        Ok(fmt)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::S8 => "s8",
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::U16 => "u16",
            Self::S32 => "s32",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::Cs8 => "cs8",
            Self::Cu8 => "cu8",
            Self::Cs16 => "cs16",
            Self::Cu16 => "cu16",
            Self::Cs32 => "cs32",
            Self::Cu32 => "cu32",
            Self::Cf32 => "cf32",
            Self::Sc16Q11 => "sc16q11",
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Self::Cs8
                | Self::Cu8
                | Self::Cs16
                | Self::Cu16
                | Self::Cs32
                | Self::Cu32
                | Self::Cf32
                | Self::Sc16Q11
        )
    }

    /// Width of one scalar component in bytes.
    pub fn component_bytes(&self) -> usize {
        match self {
            Self::S8 | Self::U8 | Self::Cs8 | Self::Cu8 => 1,
            Self::S16 | Self::U16 | Self::Cs16 | Self::Cu16 | Self::Sc16Q11 => 2,
            Self::S32 | Self::U32 | Self::F32 | Self::Cs32 | Self::Cu32 | Self::Cf32 => 4,
        }
    }

    /// Bytes occupied by one I/Q frame. Real formats carry one scalar
    /// per frame (Q is implied zero on input, dropped on output).
    pub fn pair_bytes(&self) -> usize {
        if self.is_complex() {
            2 * self.component_bytes()
        } else {
            self.component_bytes()
        }
    }
}

/// Output container written around the converted sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputContainer {
    #[default]
    Raw,
    Wav,
    Rf64,
}

impl OutputContainer {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Wav => "wav",
            Self::Rf64 => "rf64",
        }
    }

    /// WAV and RF64 carry only PCM layouts the tool commits to.
    pub fn supports(&self, format: SampleFormat) -> bool {
        match self {
            Self::Raw => true,
            Self::Wav | Self::Rf64 => matches!(format, SampleFormat::Cs16 | SampleFormat::Cu8),
        }
    }
}

/// One entry of the user filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterSpec {
    Lowpass { cutoff_hz: f64 },
    Highpass { cutoff_hz: f64 },
    Bandpass { center_hz: f64, width_hz: f64 },
    Bandstop { center_hz: f64, width_hz: f64 },
}

impl FilterSpec {
    /// Highest passband frequency of this element, used for the
    /// pre-vs-post-resample placement decision.
    pub fn max_passband_hz(&self) -> f64 {
        match *self {
            Self::Lowpass { cutoff_hz } => cutoff_hz,
            // A highpass passes everything above the cutoff.
            Self::Highpass { .. } => f64::INFINITY,
            Self::Bandpass {
                center_hz,
                width_hz,
            } => center_hz.abs() + width_hz / 2.0,
            Self::Bandstop { .. } => f64::INFINITY,
        }
    }
}

/// Where the converted stream goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDestination {
    File { path: PathBuf },
    Stdout,
}

/// Which source feeds the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputSelection {
    /// Raw or WAV sample file. WAV is detected from the RIFF header and
    /// overrides `input_format` / `input_rate`.
    File { path: PathBuf },
    /// Synthetic continuous-wave source behaving like live hardware.
    Tone {
        freq_hz: f64,
        rate: f64,
        duration_secs: Option<f64>,
    },
}

impl InputSelection {
    /// Live sources select the SDR pipeline modes; file sources select
    /// file-processing mode with natural back-pressure.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Tone { .. })
    }
}

fn default_gain() -> f32 {
    1.0
}

fn default_arena_bytes() -> usize {
    SETUP_ARENA_DEFAULT
}

fn default_num_chunks() -> usize {
    PIPELINE_NUM_CHUNKS
}

fn default_sdr_ring_bytes() -> usize {
    SDR_INPUT_RING_DEFAULT
}

fn default_write_ring_bytes() -> usize {
    FILE_WRITE_RING_DEFAULT
}

/// Immutable-after-setup pipeline configuration. Built by the CLI (or a
/// preset file) and validated once before any worker starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub input: InputSelection,
    /// Sample format of the raw input stream. Ignored for WAV input.
    pub input_format: SampleFormat,
    /// Input sample rate in Hz. Ignored for WAV input.
    pub input_rate: f64,

    pub output: OutputDestination,
    pub output_format: SampleFormat,
    #[serde(default)]
    pub output_container: OutputContainer,
    /// Target sample rate in Hz. Equal rates (or `no_resample`) bypass
    /// the resampler entirely.
    pub output_rate: f64,

    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Frequency translation in Hz; 0 bypasses the oscillator.
    #[serde(default)]
    pub freq_shift_hz: f64,
    /// Apply the frequency shift after the resampler instead of before.
    #[serde(default)]
    pub shift_after_resample: bool,
    #[serde(default)]
    pub dc_block: bool,
    #[serde(default)]
    pub iq_correction: bool,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    /// Force the FFT overlap-save implementation even for a
    /// real-symmetric composite filter.
    #[serde(default)]
    pub force_fft_filter: bool,
    /// FFT block size override; must be a power of two at least twice
    /// the composite tap count minus one.
    #[serde(default)]
    pub fft_block_size: Option<usize>,
    #[serde(default)]
    pub no_resample: bool,
    /// Copy input bytes straight to the output, bypassing conversion
    /// and the DSP chain. Formats must match and the chain must be empty.
    #[serde(default)]
    pub raw_passthrough: bool,

    #[serde(default = "default_arena_bytes")]
    pub arena_bytes: usize,
    #[serde(default = "default_sdr_ring_bytes")]
    pub sdr_ring_bytes: usize,
    #[serde(default = "default_write_ring_bytes")]
    pub write_ring_bytes: usize,
    /// Chunk pool depth. The default trades memory for smoothing
    /// burstiness at every stage.
    #[serde(default = "default_num_chunks")]
    pub num_chunks: usize,
}

impl AppConfig {
    /// Output/input rate ratio after the `no_resample` override.
    pub fn resample_ratio(&self) -> f64 {
        if self.no_resample {
            1.0
        } else {
            self.output_rate / self.input_rate
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.input_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate {
                rate: self.input_rate,
            });
        }
        if !(self.output_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate {
                rate: self.output_rate,
            });
        }
        let ratio = self.resample_ratio();
        if !(RESAMPLE_RATIO_MIN..=RESAMPLE_RATIO_MAX).contains(&ratio) {
            return Err(ConfigError::RatioOutOfRange {
                ratio,
                min: RESAMPLE_RATIO_MIN,
                max: RESAMPLE_RATIO_MAX,
            });
        }
        if !self.output_container.supports(self.output_format) {
            return Err(ConfigError::ContainerFormatMismatch {
                container: self.output_container.name().to_string(),
                format: self.output_format.name().to_string(),
            });
        }
        if self.filters.len() > MAX_FILTER_CHAIN {
            return Err(ConfigError::FilterChainTooLong {
                count: self.filters.len(),
                max: MAX_FILTER_CHAIN,
            });
        }
        for filter in &self.filters {
            validate_filter(filter, self.input_rate)?;
        }
        if let Some(size) = self.fft_block_size {
            if !size.is_power_of_two() {
                return Err(ConfigError::InvalidFftBlockSize {
                    size,
                    reason: "not a power of two".to_string(),
                });
            }
        }
        if self.raw_passthrough {
            if self.input_format != self.output_format {
                return Err(ConfigError::InvalidPassthrough {
                    reason: format!(
                        "input format {} != output format {}",
                        self.input_format.name(),
                        self.output_format.name()
                    ),
                });
            }
            if !self.filters.is_empty()
                || self.freq_shift_hz != 0.0
                || self.dc_block
                || self.iq_correction
                || ratio != 1.0
            {
                return Err(ConfigError::InvalidPassthrough {
                    reason: "DSP stages or resampling are enabled".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn validate_filter(filter: &FilterSpec, input_rate: f64) -> Result<(), ConfigError> {
    let nyquist = input_rate / 2.0;
    let check = |value: f64, what: &str| -> Result<(), ConfigError> {
        if !(value > 0.0) {
            return Err(ConfigError::InvalidFilter {
                reason: format!("{what} must be positive, got {value}"),
            });
        }
        Ok(())
    };
    match *filter {
        FilterSpec::Lowpass { cutoff_hz } | FilterSpec::Highpass { cutoff_hz } => {
            check(cutoff_hz, "cutoff")?;
            if cutoff_hz >= nyquist {
                return Err(ConfigError::InvalidFilter {
                    reason: format!("cutoff {cutoff_hz} Hz is at or above Nyquist {nyquist} Hz"),
                });
            }
        }
        FilterSpec::Bandpass {
            center_hz,
            width_hz,
        }
        | FilterSpec::Bandstop {
            center_hz,
            width_hz,
        } => {
            check(width_hz, "width")?;
            if center_hz.abs() + width_hz / 2.0 >= nyquist {
                return Err(ConfigError::InvalidFilter {
                    reason: format!(
                        "band edge {} Hz is at or above Nyquist {nyquist} Hz",
                        center_hz.abs() + width_hz / 2.0
                    ),
                });
            }
        }
    }
    Ok(())
}
