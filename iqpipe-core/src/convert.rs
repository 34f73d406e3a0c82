//! Sample format conversion between wire bytes and interleaved complex f32.
//!
//! Integer inputs are normalized toward [-1.0, 1.0); integer outputs are
//! clamped and rounded to nearest. Signed formats use a half-LSB-centered
//! peak (127.5, 32767.5, ...) so the signed round trip is bit-exact.
//! Unsigned formats subtract the exact midpoint (128, 32768, ...) and scale
//! by midpoint-1, keeping the midpoint at exactly 0.0.

use num_complex::Complex;

use crate::config::SampleFormat;

/// Bytes occupied by one I/Q frame of `format`.
pub fn bytes_per_sample_pair(format: SampleFormat) -> usize {
    format.pair_bytes()
}

#[inline]
fn norm_s8(b: u8) -> f32 {
    (b as i8) as f32 / 127.5
}

#[inline]
fn norm_u8(b: u8) -> f32 {
    (b as f32 - 128.0) / 127.0
}

#[inline]
fn norm_s16(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / 32767.5
}

#[inline]
fn norm_u16(lo: u8, hi: u8) -> f32 {
    (u16::from_le_bytes([lo, hi]) as f32 - 32768.0) / 32767.0
}

#[inline]
fn norm_s32(b: &[u8]) -> f32 {
    (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / 2147483647.5) as f32
}

#[inline]
fn norm_u32(b: &[u8]) -> f32 {
    ((u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 - 2147483648.0) / 2147483647.0) as f32
}

#[inline]
fn norm_f32(b: &[u8]) -> f32 {
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
fn norm_sc16q11(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / 2048.0
}

/// Convert `raw` wire bytes to interleaved complex samples in `out`.
///
/// Real formats produce one complex sample per scalar with Q = 0.
/// Returns the number of frames written; trailing partial frames in
/// `raw` are ignored.
pub fn convert_in(raw: &[u8], format: SampleFormat, out: &mut [Complex<f32>]) -> usize {
    let pair = format.pair_bytes();
    let frames = (raw.len() / pair).min(out.len());
    let raw = &raw[..frames * pair];

    match format {
        SampleFormat::Cs8 => {
            for (frame, sample) in raw.chunks_exact(2).zip(out.iter_mut()) {
                *sample = Complex::new(norm_s8(frame[0]), norm_s8(frame[1]));
            }
        }
        SampleFormat::Cu8 => {
            for (frame, sample) in raw.chunks_exact(2).zip(out.iter_mut()) {
                *sample = Complex::new(norm_u8(frame[0]), norm_u8(frame[1]));
            }
        }
        SampleFormat::Cs16 => {
            for (frame, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                *sample = Complex::new(norm_s16(frame[0], frame[1]), norm_s16(frame[2], frame[3]));
            }
        }
        SampleFormat::Cu16 => {
            for (frame, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                *sample = Complex::new(norm_u16(frame[0], frame[1]), norm_u16(frame[2], frame[3]));
            }
        }
        SampleFormat::Cs32 => {
            for (frame, sample) in raw.chunks_exact(8).zip(out.iter_mut()) {
                *sample = Complex::new(norm_s32(&frame[0..4]), norm_s32(&frame[4..8]));
            }
        }
        SampleFormat::Cu32 => {
            for (frame, sample) in raw.chunks_exact(8).zip(out.iter_mut()) {
                *sample = Complex::new(norm_u32(&frame[0..4]), norm_u32(&frame[4..8]));
            }
        }
        SampleFormat::Cf32 => {
            for (frame, sample) in raw.chunks_exact(8).zip(out.iter_mut()) {
                *sample = Complex::new(norm_f32(&frame[0..4]), norm_f32(&frame[4..8]));
            }
        }
        SampleFormat::Sc16Q11 => {
            for (frame, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                *sample = Complex::new(
                    norm_sc16q11(frame[0], frame[1]),
                    norm_sc16q11(frame[2], frame[3]),
                );
            }
        }
        SampleFormat::S8 => {
            for (frame, sample) in raw.chunks_exact(1).zip(out.iter_mut()) {
                *sample = Complex::new(norm_s8(frame[0]), 0.0);
            }
        }
        SampleFormat::U8 => {
            for (frame, sample) in raw.chunks_exact(1).zip(out.iter_mut()) {
                *sample = Complex::new(norm_u8(frame[0]), 0.0);
            }
        }
        SampleFormat::S16 => {
            for (frame, sample) in raw.chunks_exact(2).zip(out.iter_mut()) {
                *sample = Complex::new(norm_s16(frame[0], frame[1]), 0.0);
            }
        }
        SampleFormat::U16 => {
            for (frame, sample) in raw.chunks_exact(2).zip(out.iter_mut()) {
                *sample = Complex::new(norm_u16(frame[0], frame[1]), 0.0);
            }
        }
        SampleFormat::S32 => {
            for (frame, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                *sample = Complex::new(norm_s32(frame), 0.0);
            }
        }
        SampleFormat::U32 => {
            for (frame, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                *sample = Complex::new(norm_u32(frame), 0.0);
            }
        }
        SampleFormat::F32 => {
            for (frame, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                *sample = Complex::new(norm_f32(frame), 0.0);
            }
        }
    }
    frames
}

#[inline]
fn quant_s8(v: f32) -> u8 {
    ((v * 127.5).round().clamp(-128.0, 127.0) as i8) as u8
}

#[inline]
fn quant_u8(v: f32) -> u8 {
    ((v * 127.0).round() + 128.0).clamp(0.0, 255.0) as u8
}

#[inline]
fn quant_s16(v: f32) -> [u8; 2] {
    (((v as f64 * 32767.5).round().clamp(-32768.0, 32767.0)) as i16).to_le_bytes()
}

#[inline]
fn quant_u16(v: f32) -> [u8; 2] {
    (((v as f64 * 32767.0).round() + 32768.0).clamp(0.0, 65535.0) as u16).to_le_bytes()
}

#[inline]
fn quant_s32(v: f32) -> [u8; 4] {
    (((v as f64 * 2147483647.5)
        .round()
        .clamp(i32::MIN as f64, i32::MAX as f64)) as i32)
        .to_le_bytes()
}

#[inline]
fn quant_u32(v: f32) -> [u8; 4] {
    (((v as f64 * 2147483647.0).round() + 2147483648.0).clamp(0.0, u32::MAX as f64) as u32)
        .to_le_bytes()
}

#[inline]
fn quant_sc16q11(v: f32) -> [u8; 2] {
    (((v as f64 * 2048.0).round().clamp(-32768.0, 32767.0)) as i16).to_le_bytes()
}

/// Convert interleaved complex samples to wire bytes in `out`.
///
/// Real output formats keep only the I component. Returns the number of
/// bytes written (`samples.len() * pair_bytes`).
pub fn convert_out(samples: &[Complex<f32>], format: SampleFormat, out: &mut [u8]) -> usize {
    let pair = format.pair_bytes();
    let frames = samples.len().min(out.len() / pair);
    let samples = &samples[..frames];
    let out = &mut out[..frames * pair];

    match format {
        SampleFormat::Cs8 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(2)) {
                frame[0] = quant_s8(sample.re);
                frame[1] = quant_s8(sample.im);
            }
        }
        SampleFormat::Cu8 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(2)) {
                frame[0] = quant_u8(sample.re);
                frame[1] = quant_u8(sample.im);
            }
        }
        SampleFormat::Cs16 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(4)) {
                frame[0..2].copy_from_slice(&quant_s16(sample.re));
                frame[2..4].copy_from_slice(&quant_s16(sample.im));
            }
        }
        SampleFormat::Cu16 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(4)) {
                frame[0..2].copy_from_slice(&quant_u16(sample.re));
                frame[2..4].copy_from_slice(&quant_u16(sample.im));
            }
        }
        SampleFormat::Cs32 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(8)) {
                frame[0..4].copy_from_slice(&quant_s32(sample.re));
                frame[4..8].copy_from_slice(&quant_s32(sample.im));
            }
        }
        SampleFormat::Cu32 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(8)) {
                frame[0..4].copy_from_slice(&quant_u32(sample.re));
                frame[4..8].copy_from_slice(&quant_u32(sample.im));
            }
        }
        SampleFormat::Cf32 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(8)) {
                frame[0..4].copy_from_slice(&sample.re.to_le_bytes());
                frame[4..8].copy_from_slice(&sample.im.to_le_bytes());
            }
        }
        SampleFormat::Sc16Q11 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(4)) {
                frame[0..2].copy_from_slice(&quant_sc16q11(sample.re));
                frame[2..4].copy_from_slice(&quant_sc16q11(sample.im));
            }
        }
        SampleFormat::S8 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(1)) {
                frame[0] = quant_s8(sample.re);
            }
        }
        SampleFormat::U8 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(1)) {
                frame[0] = quant_u8(sample.re);
            }
        }
        SampleFormat::S16 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(2)) {
                frame.copy_from_slice(&quant_s16(sample.re));
            }
        }
        SampleFormat::U16 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(2)) {
                frame.copy_from_slice(&quant_u16(sample.re));
            }
        }
        SampleFormat::S32 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(4)) {
                frame.copy_from_slice(&quant_s32(sample.re));
            }
        }
        SampleFormat::U32 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(4)) {
                frame.copy_from_slice(&quant_u32(sample.re));
            }
        }
        SampleFormat::F32 => {
            for (sample, frame) in samples.iter().zip(out.chunks_exact_mut(4)) {
                frame.copy_from_slice(&sample.re.to_le_bytes());
            }
        }
    }
    frames * pair
}
