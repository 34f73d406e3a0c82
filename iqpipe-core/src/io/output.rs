//! Output sinks: raw passthrough, WAV and RF64-WAV containers.

use hound::{SampleFormat as WavSampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::config::{AppConfig, OutputContainer, OutputDestination, SampleFormat};
use crate::errors::{IqPipeError, Result, SinkError};

/// Byte sink behind the Writer stage. `write` accepts arbitrary byte
/// runs (the output ring hands over whatever it has); `close` finalizes
/// container trailers.
pub trait FileWriter: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;
    fn close(&mut self) -> Result<()>;
    /// Payload bytes accepted so far (container overhead excluded).
    fn total_bytes_written(&self) -> u64;
}

/// Build the sink selected by the configuration. Only called in
/// file-output mode; stdout output bypasses the `FileWriter` layer.
pub fn create_writer(config: &AppConfig) -> Result<Box<dyn FileWriter>> {
    let path = match &config.output {
        OutputDestination::File { path } => path,
        OutputDestination::Stdout => {
            return Err(IqPipeError::Sink(SinkError::OpenFailed {
                path: "-".to_string(),
                reason: "stdout output does not use a file writer".to_string(),
            }))
        }
    };
    match config.output_container {
        OutputContainer::Raw => Ok(Box::new(RawFileWriter::open(path)?)),
        OutputContainer::Wav => Ok(Box::new(WavFileWriter::open(
            path,
            config.output_format,
            config.output_rate as u32,
        )?)),
        OutputContainer::Rf64 => Ok(Box::new(Rf64FileWriter::open(
            path,
            config.output_format,
            config.output_rate as u32,
        )?)),
    }
}

fn open_failed(path: &Path, err: std::io::Error) -> IqPipeError {
    IqPipeError::Sink(SinkError::OpenFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}

fn write_failed(total: u64, err: impl std::fmt::Display) -> IqPipeError {
    IqPipeError::Sink(SinkError::WriteFailed {
        bytes_written: total,
        reason: err.to_string(),
    })
}

/// Straight byte passthrough.
pub struct RawFileWriter {
    file: BufWriter<File>,
    total: u64,
}

impl RawFileWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| open_failed(path, e))?;
        Ok(Self {
            file: BufWriter::new(file),
            total: 0,
        })
    }
}

impl FileWriter for RawFileWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.file
            .write_all(bytes)
            .map_err(|e| write_failed(self.total, e))?;
        self.total += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| {
            IqPipeError::Sink(SinkError::FinalizeFailed {
                reason: e.to_string(),
            })
        })
    }

    fn total_bytes_written(&self) -> u64 {
        self.total
    }
}

/// Classic 32-bit RIFF WAV, cs16 (stereo 16-bit PCM) or cu8 (stereo
/// 8-bit PCM) only. Byte runs from the ring may split a sample, so up
/// to one scalar of carry is held between calls.
pub struct WavFileWriter {
    writer: Option<WavWriter<BufWriter<File>>>,
    format: SampleFormat,
    carry: Vec<u8>,
    total: u64,
}

impl WavFileWriter {
    pub fn open(path: &Path, format: SampleFormat, sample_rate: u32) -> Result<Self> {
        debug_assert!(matches!(format, SampleFormat::Cs16 | SampleFormat::Cu8));
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 8 * format.component_bytes() as u16,
            sample_format: WavSampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(|e| {
            IqPipeError::Sink(SinkError::OpenFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        Ok(Self {
            writer: Some(writer),
            format,
            carry: Vec::with_capacity(4),
            total: 0,
        })
    }
}

impl FileWriter for WavFileWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| write_failed(self.total, "writer already closed"))?;
        self.carry.extend_from_slice(bytes);
        let unit = self.format.component_bytes();
        let whole = (self.carry.len() / unit) * unit;
        match self.format {
            SampleFormat::Cs16 => {
                for scalar in self.carry[..whole].chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([scalar[0], scalar[1]]))
                        .map_err(|e| write_failed(self.total, e))?;
                }
            }
            SampleFormat::Cu8 => {
                for &scalar in &self.carry[..whole] {
                    // hound carries 8-bit PCM as signed and re-biases.
                    writer
                        .write_sample((scalar as i16 - 128) as i8)
                        .map_err(|e| write_failed(self.total, e))?;
                }
            }
            _ => unreachable!("container validation admits cs16/cu8 only"),
        }
        self.carry.drain(..whole);
        self.total += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| {
                IqPipeError::Sink(SinkError::FinalizeFailed {
                    reason: e.to_string(),
                })
            })?;
        }
        Ok(())
    }

    fn total_bytes_written(&self) -> u64 {
        self.total
    }
}

/// RF64-WAV with 64-bit sizes carried in a ds64 chunk, for captures
/// beyond the 4 GiB RIFF limit. Sizes are patched on close.
pub struct Rf64FileWriter {
    file: Option<BufWriter<File>>,
    block_align: u16,
    data_bytes: u64,
    total: u64,
}

const RF64_DS64_OFFSET: u64 = 20;

impl Rf64FileWriter {
    pub fn open(path: &Path, format: SampleFormat, sample_rate: u32) -> Result<Self> {
        debug_assert!(matches!(format, SampleFormat::Cs16 | SampleFormat::Cu8));
        let file = File::create(path).map_err(|e| open_failed(path, e))?;
        let mut file = BufWriter::new(file);

        let bits = 8 * format.component_bytes() as u16;
        let block_align = 2 * format.component_bytes() as u16;
        let byte_rate = sample_rate * block_align as u32;

        let mut header = Vec::with_capacity(80);
        header.extend_from_slice(b"RF64");
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        header.extend_from_slice(b"WAVE");
        // ds64: 64-bit riff/data sizes and frame count, patched on close.
        header.extend_from_slice(b"ds64");
        header.extend_from_slice(&28u32.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes()); // riff size
        header.extend_from_slice(&0u64.to_le_bytes()); // data size
        header.extend_from_slice(&0u64.to_le_bytes()); // sample count
        header.extend_from_slice(&0u32.to_le_bytes()); // table length
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&2u16.to_le_bytes()); // channels
        header.extend_from_slice(&sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&block_align.to_le_bytes());
        header.extend_from_slice(&bits.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&u32::MAX.to_le_bytes());

        file.write_all(&header).map_err(|e| open_failed(path, e))?;
        Ok(Self {
            file: Some(file),
            block_align,
            data_bytes: 0,
            total: 0,
        })
    }

    fn header_len() -> u64 {
        // RF64 + size + WAVE + ds64(8 + 28) + fmt(8 + 16) + data header.
        12 + 36 + 24 + 8
    }
}

impl FileWriter for Rf64FileWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| write_failed(self.total, "writer already closed"))?;
        file.write_all(bytes)
            .map_err(|e| write_failed(self.total, e))?;
        self.data_bytes += bytes.len() as u64;
        self.total += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<()> {
        let finalize = |e: std::io::Error| {
            IqPipeError::Sink(SinkError::FinalizeFailed {
                reason: e.to_string(),
            })
        };
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(finalize)?;
            let riff_size = Self::header_len() - 8 + self.data_bytes;
            let frames = self.data_bytes / self.block_align as u64;
            let mut inner = file.into_inner().map_err(|e| {
                IqPipeError::Sink(SinkError::FinalizeFailed {
                    reason: e.to_string(),
                })
            })?;
            inner
                .seek(SeekFrom::Start(RF64_DS64_OFFSET))
                .map_err(finalize)?;
            inner.write_all(&riff_size.to_le_bytes()).map_err(finalize)?;
            inner
                .write_all(&self.data_bytes.to_le_bytes())
                .map_err(finalize)?;
            inner.write_all(&frames.to_le_bytes()).map_err(finalize)?;
            inner.sync_all().map_err(finalize)?;
        }
        Ok(())
    }

    fn total_bytes_written(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn raw_writer_passes_bytes_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut writer = RawFileWriter::open(&path).unwrap();
        writer.write(&[1, 2, 3]).unwrap();
        writer.write(&[4]).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.total_bytes_written(), 4);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn wav_writer_survives_split_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut writer = WavFileWriter::open(&path, SampleFormat::Cs16, 48_000).unwrap();
        let samples: Vec<u8> = [100i16, -100, 2000, -2000]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        // Split in the middle of a scalar.
        writer.write(&samples[..3]).unwrap();
        writer.write(&samples[3..]).unwrap();
        writer.close().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48_000);
        let back: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(back, vec![100, -100, 2000, -2000]);
    }

    #[test]
    fn rf64_header_and_sizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.w64");
        let mut writer = Rf64FileWriter::open(&path, SampleFormat::Cs16, 96_000).unwrap();
        let payload = vec![0u8; 1024];
        writer.write(&payload).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RF64");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"ds64");
        let data_size = u64::from_le_bytes(bytes[28..36].try_into().unwrap());
        assert_eq!(data_size, 1024);
        let frames = u64::from_le_bytes(bytes[36..44].try_into().unwrap());
        assert_eq!(frames, 256);
        assert_eq!(bytes.len() as u64, Rf64FileWriter::header_len() + 1024);
    }

    #[test]
    fn empty_wav_finalizes_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let mut writer = WavFileWriter::open(&path, SampleFormat::Cu8, 8_000).unwrap();
        writer.close().unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 0);
    }
}
