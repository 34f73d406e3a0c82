//! End-to-end file-processing tests for the iqpipe pipeline.
//!
//! These drive the whole worker graph: source -> reader -> preprocess
//! -> resample -> postprocess -> writer, and verify the output bytes.

use num_complex::Complex;
use std::f64::consts::TAU;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use iqpipe_core::config::{
    AppConfig, InputSelection, OutputContainer, OutputDestination, SampleFormat,
};
use iqpipe_core::logging::PipelineLogger;
use iqpipe_core::pipeline::{Pipeline, RunSummary};

fn quiet_logger() -> Arc<PipelineLogger> {
    Arc::new(PipelineLogger::disabled())
}

/// Base file-processing config with small test-sized buffers.
fn file_config(input: &Path, output: &Path) -> AppConfig {
    AppConfig {
        input: InputSelection::File {
            path: input.to_path_buf(),
        },
        input_format: SampleFormat::Cs16,
        input_rate: 48_000.0,
        output: OutputDestination::File {
            path: output.to_path_buf(),
        },
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
        no_resample: false,
        raw_passthrough: false,
        arena_bytes: 16 * 1024 * 1024,
        sdr_ring_bytes: 1024 * 1024,
        write_ring_bytes: 4 * 1024 * 1024,
        num_chunks: 16,
    }
}

fn run(config: AppConfig) -> RunSummary {
    let pipeline = Pipeline::new(config, quiet_logger()).expect("pipeline setup");
    pipeline.run(None).expect("pipeline run")
}

fn write_cs16_wav(path: &Path, sample_rate: u32, pairs: &[(i16, i16)]) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &(i, q) in pairs {
        writer.write_sample(i).unwrap();
        writer.write_sample(q).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_cs16_tone(path: &Path, freq: f64, rate: f64, count: usize) {
    let mut bytes = Vec::with_capacity(count * 4);
    for n in 0..count {
        let phase = TAU * freq * n as f64 / rate;
        let i = (phase.cos() * 0.5 * 32767.0) as i16;
        let q = (phase.sin() * 0.5 * 32767.0) as i16;
        bytes.extend_from_slice(&i.to_le_bytes());
        bytes.extend_from_slice(&q.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

fn read_cf32(path: &Path) -> Vec<Complex<f32>> {
    std::fs::read(path)
        .unwrap()
        .chunks_exact(8)
        .map(|c| {
            Complex::new(
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect()
}

fn paths(dir: &TempDir, input: &str, output: &str) -> (PathBuf, PathBuf) {
    (dir.path().join(input), dir.path().join(output))
}

#[test]
fn passthrough_wav_to_raw_cs16_is_bit_exact() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "in.wav", "out.iq");
    let pairs = [
        (1i16, 2i16),
        (3, 4),
        (5, 6),
        (7, 8),
        (-1, -2),
        (-3, -4),
        (-5, -6),
        (-7, -8),
    ];
    write_cs16_wav(&input, 48_000, &pairs);

    let mut config = file_config(&input, &output);
    config.no_resample = true;
    let summary = run(config);

    assert_eq!(summary.frames_read, 8);
    assert_eq!(summary.frames_written, 8);
    let expected: Vec<u8> = pairs
        .iter()
        .flat_map(|&(i, q)| {
            let mut frame = i.to_le_bytes().to_vec();
            frame.extend_from_slice(&q.to_le_bytes());
            frame
        })
        .collect();
    assert_eq!(std::fs::read(&output).unwrap(), expected);
}

#[test]
fn cu8_normalizes_to_cs16() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "in.cu8", "out.cs16");
    // (0,0), (+1,0), (0,-1), (-1,+1) at full scale.
    std::fs::write(&input, [128u8, 128, 255, 128, 128, 0, 0, 255]).unwrap();

    let mut config = file_config(&input, &output);
    config.input_format = SampleFormat::Cu8;
    config.no_resample = true;
    run(config);

    let got: Vec<(i16, i16)> = std::fs::read(&output)
        .unwrap()
        .chunks_exact(4)
        .map(|c| {
            (
                i16::from_le_bytes([c[0], c[1]]),
                i16::from_le_bytes([c[2], c[3]]),
            )
        })
        .collect();
    let expected = [(0i16, 0i16), (32767, 0), (0, -32768), (-32768, 32767)];
    assert_eq!(got.len(), 4);
    for ((gi, gq), (wi, wq)) in got.iter().zip(expected.iter()) {
        assert!((*gi as i32 - *wi as i32).abs() <= 1, "I {} vs {}", gi, wi);
        assert!((*gq as i32 - *wq as i32).abs() <= 1, "Q {} vs {}", gq, wq);
    }
}

#[test]
fn decimation_by_two_keeps_tone() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "in.cs16", "out.cf32");
    write_cs16_tone(&input, 6_000.0, 48_000.0, 1024);

    let mut config = file_config(&input, &output);
    config.output_rate = 24_000.0;
    config.output_format = SampleFormat::Cf32;
    let summary = run(config);

    let samples = read_cf32(&output);
    assert_eq!(samples.len() as u64, summary.frames_written);
    assert!(
        (samples.len() as i64 - 512).unsigned_abs() < 200,
        "expected about 512 samples, got {}",
        samples.len()
    );

    // The tone must advance 6 kHz worth of phase per 24 ksps sample.
    let expected_step = TAU * 6_000.0 / 24_000.0;
    let settled = &samples[samples.len() / 2..samples.len() - 8];
    for pair in settled.windows(2) {
        if pair[0].norm() < 0.05 || pair[1].norm() < 0.05 {
            continue;
        }
        let step = (pair[1] * pair[0].conj()).arg() as f64;
        assert!(
            (step - expected_step).abs() < 0.05,
            "phase step {} vs {}",
            step,
            expected_step
        );
    }
}

#[test]
fn shift_then_resample_moves_tone() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "in.cs16", "out.cf32");
    // 100 kHz CW at 2 Msps, shifted up 200 kHz, decimated to 1 Msps:
    // the tone lands at 300 kHz in the output.
    write_cs16_tone(&input, 100_000.0, 2_000_000.0, 32_768);

    let mut config = file_config(&input, &output);
    config.input_rate = 2_000_000.0;
    config.output_rate = 1_000_000.0;
    config.freq_shift_hz = 200_000.0;
    config.output_format = SampleFormat::Cf32;
    run(config);

    let samples = read_cf32(&output);
    assert!(samples.len() > 8_000, "only {} samples", samples.len());
    let expected_step = TAU * 300_000.0 / 1_000_000.0;
    let settled = &samples[samples.len() / 2..samples.len() - 64];
    let mut checked = 0;
    for pair in settled.windows(2) {
        if pair[0].norm() < 0.05 || pair[1].norm() < 0.05 {
            continue;
        }
        let step = (pair[1] * pair[0].conj()).arg() as f64;
        assert!(
            (step - expected_step).abs() < 0.05,
            "phase step {} vs {}",
            step,
            expected_step
        );
        checked += 1;
    }
    assert!(checked > 1_000);
}

#[test]
fn empty_input_finalizes_wav_container() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "empty.cs16", "out.wav");
    std::fs::write(&input, []).unwrap();

    let mut config = file_config(&input, &output);
    config.no_resample = true;
    config.output_container = OutputContainer::Wav;
    let summary = run(config);

    assert_eq!(summary.frames_read, 0);
    assert_eq!(summary.frames_written, 0);
    let reader = hound::WavReader::open(&output).unwrap();
    assert_eq!(reader.len(), 0);
}

#[test]
fn raw_passthrough_copies_bytes() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "in.cs16", "out.cs16");
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    std::fs::write(&input, &payload).unwrap();

    let mut config = file_config(&input, &output);
    config.no_resample = true;
    config.raw_passthrough = true;
    run(config);

    assert_eq!(std::fs::read(&output).unwrap(), payload);
}

#[test]
fn gain_scales_output() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "in.cs16", "out.cs16");
    let mut bytes = Vec::new();
    for _ in 0..16 {
        bytes.extend_from_slice(&1000i16.to_le_bytes());
        bytes.extend_from_slice(&(-1000i16).to_le_bytes());
    }
    std::fs::write(&input, bytes).unwrap();

    let mut config = file_config(&input, &output);
    config.no_resample = true;
    config.gain = 2.0;
    run(config);

    for frame in std::fs::read(&output).unwrap().chunks_exact(4) {
        let i = i16::from_le_bytes([frame[0], frame[1]]);
        let q = i16::from_le_bytes([frame[2], frame[3]]);
        assert!((i as i32 - 2000).abs() <= 1, "i = {}", i);
        assert!((q as i32 + 2000).abs() <= 1, "q = {}", q);
    }
}

#[test]
fn lowpass_filter_removes_out_of_band_tone() {
    let dir = TempDir::new().unwrap();
    let (input, output) = paths(&dir, "in.cs16", "out.cf32");
    // Two tones, 2 kHz and 18 kHz; a 6 kHz lowpass keeps only one.
    let rate = 48_000.0;
    let count = 32_768;
    let mut bytes = Vec::with_capacity(count * 4);
    for n in 0..count {
        let a = TAU * 2_000.0 * n as f64 / rate;
        let b = TAU * 18_000.0 * n as f64 / rate;
        let i = ((a.cos() + b.cos()) * 0.25 * 32767.0) as i16;
        let q = ((a.sin() + b.sin()) * 0.25 * 32767.0) as i16;
        bytes.extend_from_slice(&i.to_le_bytes());
        bytes.extend_from_slice(&q.to_le_bytes());
    }
    std::fs::write(&input, bytes).unwrap();

    let mut config = file_config(&input, &output);
    config.no_resample = true;
    config.output_format = SampleFormat::Cf32;
    config.filters = vec![iqpipe_core::config::FilterSpec::Lowpass { cutoff_hz: 6_000.0 }];
    run(config);

    let samples = read_cf32(&output);
    assert!(samples.len() > 16_384);
    let settled = &samples[8_192..24_576];
    let power_at = |freq: f64| -> f64 {
        let mut acc = Complex::new(0.0f64, 0.0);
        for (n, s) in settled.iter().enumerate() {
            let phase = -TAU * freq * n as f64 / rate;
            acc += Complex::new(s.re as f64, s.im as f64)
                * Complex::new(phase.cos(), phase.sin());
        }
        (acc / settled.len() as f64).norm()
    };
    let kept = power_at(2_000.0);
    let removed = power_at(18_000.0);
    assert!(kept > 0.2, "in-band tone lost: {}", kept);
    assert!(
        removed < kept / 100.0,
        "stopband leak: kept {} removed {}",
        kept,
        removed
    );
}
