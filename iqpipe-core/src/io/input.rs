//! Input sources: the `InputSource` trait, sample files (raw and WAV)
//! and a synthetic continuous-wave source that behaves like live
//! hardware for the SDR pipeline modes.

use hound::{SampleFormat as WavSampleFormat, WavReader};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{AppConfig, InputSelection, SampleFormat};
use crate::errors::{IqPipeError, Result, SourceError};
use crate::pipeline::reader::SourceContext;

/// A sample source driven by the Reader. File-style sources pull free
/// chunks from the context and fill them; live sources push packets
/// through the context, which routes them into the SDR ring (buffered
/// mode) or straight into the pipeline (realtime mode).
pub trait InputSource: Send {
    fn initialize(&mut self, ctx: &SourceContext) -> Result<()>;
    /// Blocks until end of stream or shutdown.
    fn start_stream(&mut self, ctx: &SourceContext) -> Result<()>;
    fn stop_stream(&mut self, ctx: &SourceContext) -> Result<()>;
    fn cleanup(&mut self, ctx: &SourceContext);
    fn summary_info(&self) -> Vec<(String, String)>;
    fn validate_options(&self, config: &AppConfig) -> Result<()>;
    /// True for files; governs whether total-frame progress is known.
    fn has_known_length(&self) -> bool;
    fn total_frames(&self) -> Option<u64> {
        None
    }
    /// Sample format after probing (a WAV header overrides the config).
    fn resolved_format(&self) -> SampleFormat;
    /// Sample rate after probing.
    fn resolved_rate(&self) -> f64;
}

/// Build the source selected by the configuration, probing files so the
/// resolved format and rate are available before the pipeline is sized.
pub fn create_source(config: &AppConfig) -> Result<Box<dyn InputSource>> {
    match &config.input {
        InputSelection::File { path } => Ok(Box::new(FileSource::open(
            path,
            config.input_format,
            config.input_rate,
        )?)),
        InputSelection::Tone {
            freq_hz,
            rate,
            duration_secs,
        } => Ok(Box::new(ToneSource::new(*freq_hz, *rate, *duration_secs))),
    }
}

enum FileBacking {
    Raw(BufReader<File>),
    Wav(WavReader<BufReader<File>>),
}

/// Raw or WAV sample file. The WAV data chunk is streamed through
/// hound; raw files are read as-is in the configured format.
pub struct FileSource {
    path: PathBuf,
    backing: FileBacking,
    format: SampleFormat,
    rate: f64,
    total_frames: u64,
}

impl FileSource {
    pub fn open(path: &Path, raw_format: SampleFormat, raw_rate: f64) -> Result<Self> {
        let open_err = |e: std::io::Error| {
            IqPipeError::Source(SourceError::OpenFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        };
        let mut file = File::open(path).map_err(open_err)?;
        let mut magic = [0u8; 4];
        let got = file.read(&mut magic).map_err(open_err)?;
        file.seek(SeekFrom::Start(0)).map_err(open_err)?;

        if got == 4 && (&magic == b"RIFF" || &magic == b"RF64") {
            let reader = WavReader::new(BufReader::new(file)).map_err(|e| {
                IqPipeError::Source(SourceError::OpenFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            })?;
            let spec = reader.spec();
            let format = wav_format(
                spec.channels,
                spec.bits_per_sample,
                spec.sample_format,
            )
            .ok_or_else(|| {
                IqPipeError::Source(SourceError::UnsupportedLayout {
                    reason: format!(
                        "{} ch / {} bit / {:?} WAV",
                        spec.channels, spec.bits_per_sample, spec.sample_format
                    ),
                })
            })?;
            let total_frames = reader.duration() as u64;
            Ok(Self {
                path: path.to_path_buf(),
                backing: FileBacking::Wav(reader),
                format,
                rate: spec.sample_rate as f64,
                total_frames,
            })
        } else {
            let len = file.metadata().map_err(open_err)?.len();
            Ok(Self {
                path: path.to_path_buf(),
                backing: FileBacking::Raw(BufReader::new(file)),
                format: raw_format,
                rate: raw_rate,
                total_frames: len / raw_format.pair_bytes() as u64,
            })
        }
    }

    /// Fill `buf` with as many whole frames as the file still holds.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.backing {
            FileBacking::Raw(reader) => {
                let mut filled = 0;
                while filled < buf.len() {
                    let n = reader.read(&mut buf[filled..]).map_err(|e| {
                        IqPipeError::Source(SourceError::ReadFailed {
                            reason: e.to_string(),
                        })
                    })?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                Ok(filled)
            }
            FileBacking::Wav(reader) => fill_from_wav(reader, self.format, buf),
        }
    }
}

fn wav_format(channels: u16, bits: u16, sample_format: WavSampleFormat) -> Option<SampleFormat> {
    let complex = match channels {
        1 => false,
        2 => true,
        _ => return None,
    };
    match (bits, sample_format, complex) {
        (16, WavSampleFormat::Int, true) => Some(SampleFormat::Cs16),
        (16, WavSampleFormat::Int, false) => Some(SampleFormat::S16),
        (8, WavSampleFormat::Int, true) => Some(SampleFormat::Cu8),
        (8, WavSampleFormat::Int, false) => Some(SampleFormat::U8),
        (32, WavSampleFormat::Float, true) => Some(SampleFormat::Cf32),
        (32, WavSampleFormat::Float, false) => Some(SampleFormat::F32),
        (32, WavSampleFormat::Int, true) => Some(SampleFormat::Cs32),
        (32, WavSampleFormat::Int, false) => Some(SampleFormat::S32),
        _ => None,
    }
}

fn fill_from_wav(
    reader: &mut WavReader<BufReader<File>>,
    format: SampleFormat,
    buf: &mut [u8],
) -> Result<usize> {
    let read_err = |e: hound::Error| {
        IqPipeError::Source(SourceError::ReadFailed {
            reason: e.to_string(),
        })
    };
    let mut written = 0;
    match format {
        SampleFormat::Cs16 | SampleFormat::S16 => {
            let mut samples = reader.samples::<i16>();
            // Pull a sample only when it still fits, so none are lost.
            while written + 2 <= buf.len() {
                let Some(sample) = samples.next() else { break };
                let bytes = sample.map_err(read_err)?.to_le_bytes();
                buf[written..written + 2].copy_from_slice(&bytes);
                written += 2;
            }
        }
        SampleFormat::Cu8 | SampleFormat::U8 => {
            let mut samples = reader.samples::<i8>();
            while written < buf.len() {
                let Some(sample) = samples.next() else { break };
                buf[written] = (sample.map_err(read_err)? as i16 + 128) as u8;
                written += 1;
            }
        }
        SampleFormat::Cf32 | SampleFormat::F32 => {
            let mut samples = reader.samples::<f32>();
            while written + 4 <= buf.len() {
                let Some(sample) = samples.next() else { break };
                let bytes = sample.map_err(read_err)?.to_le_bytes();
                buf[written..written + 4].copy_from_slice(&bytes);
                written += 4;
            }
        }
        SampleFormat::Cs32 | SampleFormat::S32 => {
            let mut samples = reader.samples::<i32>();
            while written + 4 <= buf.len() {
                let Some(sample) = samples.next() else { break };
                let bytes = sample.map_err(read_err)?.to_le_bytes();
                buf[written..written + 4].copy_from_slice(&bytes);
                written += 4;
            }
        }
        _ => {
            return Err(IqPipeError::Source(SourceError::UnsupportedLayout {
                reason: format!("{} cannot come from a WAV container", format.name()),
            }))
        }
    }
    Ok(written)
}

impl InputSource for FileSource {
    fn initialize(&mut self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }

    fn start_stream(&mut self, ctx: &SourceContext) -> Result<()> {
        let pair = self.format.pair_bytes();
        loop {
            if ctx.is_shutdown() {
                return Ok(());
            }
            let Some(mut chunk) = ctx.acquire_chunk() else {
                return Ok(());
            };
            let capacity = chunk.raw_capacity_bytes();
            let bytes = match self.fill(&mut chunk.raw_input_data[..capacity]) {
                Ok(bytes) => bytes,
                Err(e) => {
                    ctx.recycle_chunk(chunk);
                    return Err(e);
                }
            };
            let frames = bytes / pair;
            chunk.frames_read = frames;
            chunk.input_bytes_per_sample_pair = pair;
            if frames == 0 {
                chunk.is_last_chunk = true;
                ctx.submit_chunk(chunk);
                return Ok(());
            }
            if !ctx.submit_chunk(chunk) {
                return Ok(());
            }
        }
    }

    fn stop_stream(&mut self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &SourceContext) {}

    fn summary_info(&self) -> Vec<(String, String)> {
        vec![
            ("source".to_string(), "file".to_string()),
            ("path".to_string(), self.path.display().to_string()),
            (
                "container".to_string(),
                match self.backing {
                    FileBacking::Raw(_) => "raw".to_string(),
                    FileBacking::Wav(_) => "wav".to_string(),
                },
            ),
            ("format".to_string(), self.format.name().to_string()),
            ("rate".to_string(), format!("{}", self.rate)),
            ("frames".to_string(), format!("{}", self.total_frames)),
        ]
    }

    fn validate_options(&self, config: &AppConfig) -> Result<()> {
        if matches!(self.backing, FileBacking::Raw(_)) && !(config.input_rate > 0.0) {
            return Err(IqPipeError::Source(SourceError::BadOptions {
                reason: "raw input requires an input rate".to_string(),
            }));
        }
        Ok(())
    }

    fn has_known_length(&self) -> bool {
        true
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }

    fn resolved_format(&self) -> SampleFormat {
        self.format
    }

    fn resolved_rate(&self) -> f64 {
        self.rate
    }
}

/// Packet size the tone source emits, mirroring typical driver
/// callback granularity.
const TONE_PACKET_FRAMES: usize = 4096;

/// Synthetic continuous-wave source that behaves like live hardware:
/// it pushes cs16 packets through the capture path and never reports a
/// known length. `throttle` paces generation at the nominal rate.
pub struct ToneSource {
    freq_hz: f64,
    rate: f64,
    duration_secs: Option<f64>,
    pub throttle: bool,
    phase: f64,
    scratch: Vec<u8>,
}

impl ToneSource {
    pub fn new(freq_hz: f64, rate: f64, duration_secs: Option<f64>) -> Self {
        Self {
            freq_hz,
            rate,
            duration_secs,
            throttle: false,
            phase: 0.0,
            scratch: vec![0u8; TONE_PACKET_FRAMES * 4],
        }
    }
}

impl InputSource for ToneSource {
    fn initialize(&mut self, _ctx: &SourceContext) -> Result<()> {
        self.phase = 0.0;
        Ok(())
    }

    fn start_stream(&mut self, ctx: &SourceContext) -> Result<()> {
        use std::f64::consts::TAU;
        let increment = TAU * self.freq_hz / self.rate;
        let total = self
            .duration_secs
            .map(|secs| (secs * self.rate) as u64)
            .unwrap_or(u64::MAX);
        let mut generated = 0u64;

        while !ctx.is_shutdown() && generated < total {
            let frames = TONE_PACKET_FRAMES.min((total - generated) as usize);
            for k in 0..frames {
                let i = (self.phase.cos() * 0.9 * 32767.0) as i16;
                let q = (self.phase.sin() * 0.9 * 32767.0) as i16;
                self.scratch[4 * k..4 * k + 2].copy_from_slice(&i.to_le_bytes());
                self.scratch[4 * k + 2..4 * k + 4].copy_from_slice(&q.to_le_bytes());
                self.phase += increment;
                if self.phase >= TAU {
                    self.phase -= TAU;
                }
            }
            ctx.push_interleaved(&self.scratch[..frames * 4], frames as u32);
            generated += frames as u64;
            if self.throttle {
                std::thread::sleep(Duration::from_secs_f64(frames as f64 / self.rate));
            }
        }
        Ok(())
    }

    fn stop_stream(&mut self, _ctx: &SourceContext) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &SourceContext) {}

    fn summary_info(&self) -> Vec<(String, String)> {
        vec![
            ("source".to_string(), "tone".to_string()),
            ("freq".to_string(), format!("{} Hz", self.freq_hz)),
            ("rate".to_string(), format!("{}", self.rate)),
            ("format".to_string(), "cs16".to_string()),
        ]
    }

    fn validate_options(&self, _config: &AppConfig) -> Result<()> {
        if self.freq_hz.abs() >= self.rate / 2.0 {
            return Err(IqPipeError::Source(SourceError::BadOptions {
                reason: format!(
                    "tone at {} Hz is beyond Nyquist for {} sps",
                    self.freq_hz, self.rate
                ),
            }));
        }
        Ok(())
    }

    fn has_known_length(&self) -> bool {
        false
    }

    fn resolved_format(&self) -> SampleFormat {
        SampleFormat::Cs16
    }

    fn resolved_rate(&self) -> f64 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn raw_file_probe_uses_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.iq");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0u8; 64])
            .unwrap();
        let source = FileSource::open(&path, SampleFormat::Cs16, 48_000.0).unwrap();
        assert_eq!(source.resolved_format(), SampleFormat::Cs16);
        assert_eq!(source.resolved_rate(), 48_000.0);
        assert_eq!(source.total_frames(), Some(16));
        assert!(source.has_known_length());
    }

    #[test]
    fn wav_probe_overrides_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 96_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for v in [1i16, 2, 3, 4] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        // Deliberately wrong raw config; the header wins.
        let source = FileSource::open(&path, SampleFormat::Cu8, 8_000.0).unwrap();
        assert_eq!(source.resolved_format(), SampleFormat::Cs16);
        assert_eq!(source.resolved_rate(), 96_000.0);
        assert_eq!(source.total_frames(), Some(2));
    }

    #[test]
    fn wav_fill_streams_le_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for v in [100i16, -100, 2000, -2000] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = FileSource::open(&path, SampleFormat::Cs16, 48_000.0).unwrap();
        let mut buf = vec![0u8; 64];
        let n = source.fill(&mut buf).unwrap();
        assert_eq!(n, 8);
        let expected: Vec<u8> = [100i16, -100, 2000, -2000]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(&buf[..8], &expected[..]);
    }

    #[test]
    fn tone_rejects_beyond_nyquist() {
        let tone = ToneSource::new(30_000.0, 48_000.0, None);
        let config_err = tone.validate_options(&dummy_config());
        assert!(config_err.is_err());
    }

    fn dummy_config() -> AppConfig {
        use crate::config::*;
        AppConfig {
            input: InputSelection::Tone {
                freq_hz: 30_000.0,
                rate: 48_000.0,
                duration_secs: None,
            },
            input_format: SampleFormat::Cs16,
            input_rate: 48_000.0,
            output: OutputDestination::Stdout,
            output_format: SampleFormat::Cs16,
            output_container: OutputContainer::Raw,
            output_rate: 48_000.0,
            gain: 1.0,
            freq_shift_hz: 0.0,
            shift_after_resample: false,
            dc_block: false,
            iq_correction: false,
            filters: Vec::new(),
            force_fft_filter: false,
            fft_block_size: None,
            no_resample: true,
            raw_passthrough: false,
            arena_bytes: SETUP_ARENA_DEFAULT,
            sdr_ring_bytes: SDR_INPUT_RING_DEFAULT,
            write_ring_bytes: FILE_WRITE_RING_DEFAULT,
            num_chunks: 16,
        }
    }
}
