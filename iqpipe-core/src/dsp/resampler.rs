//! Rational-rate sample rate conversion.
//!
//! Wraps a windowed-sinc rubato resampler running I and Q as two
//! channels. rubato consumes fixed-size input blocks, so incoming chunks
//! are accumulated to `BASE_SAMPLES`-frame blocks: full chunks from file
//! mode are exactly one-in/one-out per call, SDR packet chunks complete
//! a block every few calls. The end-of-stream flush drains the partial
//! block and the filter tail.

use num_complex::Complex;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::config::BASE_SAMPLES;
use crate::errors::DspError;

/// Fixed input block the inner resampler consumes. Small enough that
/// one pipeline chunk never completes more than `BASE_SAMPLES / block`
/// blocks plus one, which bounds per-call output against the chunk
/// buffer capacity.
pub const RESAMPLER_BLOCK_FRAMES: usize = 4096;

pub struct RationalResampler {
    inner: SincFixedIn<f32>,
    ratio: f64,
    block: usize,
    acc_i: Vec<f32>,
    acc_q: Vec<f32>,
    out_planes: Vec<Vec<f32>>,
}

impl RationalResampler {
    /// `ratio` = output rate / input rate, already validated against
    /// the configured range.
    pub fn new(ratio: f64) -> Result<Self, DspError> {
        let block = RESAMPLER_BLOCK_FRAMES;
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(ratio, 1.1, params, block, 2).map_err(|e| {
            DspError::ResamplerConstruction {
                reason: e.to_string(),
            }
        })?;
        let max_out = inner.output_frames_max();
        Ok(Self {
            inner,
            ratio,
            block,
            acc_i: Vec::with_capacity(4 * BASE_SAMPLES),
            acc_q: Vec::with_capacity(4 * BASE_SAMPLES),
            out_planes: vec![vec![0.0; max_out]; 2],
        })
    }

    /// Worst-case frames emitted for a single call fed `max_input`
    /// frames, including the end-of-stream flush. Used to size the
    /// chunk buffers once at setup.
    pub fn worst_case_output(&self, max_input: usize) -> usize {
        let blocks = max_input / self.block + 1;
        (blocks + 1) * self.inner.output_frames_max()
    }

    /// Output group delay in output frames.
    pub fn output_delay(&self) -> usize {
        self.inner.output_delay()
    }

    /// Worst-case frames one `process` call can emit.
    pub fn max_output_per_call(&self) -> usize {
        self.inner.output_frames_max()
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.acc_i.clear();
        self.acc_q.clear();
    }

    /// Feed `input` and write any completed blocks' output to `out`.
    /// Returns the number of frames written.
    pub fn process(
        &mut self,
        input: &[Complex<f32>],
        out: &mut [Complex<f32>],
    ) -> Result<usize, DspError> {
        for sample in input {
            self.acc_i.push(sample.re);
            self.acc_q.push(sample.im);
        }
        let mut written = 0;
        while self.acc_i.len() >= self.block {
            let planes: [&[f32]; 2] = [&self.acc_i[..self.block], &self.acc_q[..self.block]];
            let (used, produced) = self
                .inner
                .process_into_buffer(&planes[..], &mut self.out_planes, None)
                .map_err(|e| DspError::ResamplerConstruction {
                    reason: e.to_string(),
                })?;
            debug_assert_eq!(used, self.block);
            for (k, dst) in out[written..written + produced].iter_mut().enumerate() {
                *dst = Complex::new(self.out_planes[0][k], self.out_planes[1][k]);
            }
            written += produced;
            self.acc_i.drain(..self.block);
            self.acc_q.drain(..self.block);
        }
        Ok(written)
    }

    /// Drain the accumulated partial block at end of stream. The inner
    /// resampler pads the final block with zeros and emits output for
    /// all of it, so the result is trimmed to the frames the remaining
    /// input actually owes.
    pub fn flush(&mut self, out: &mut [Complex<f32>]) -> Result<usize, DspError> {
        if self.acc_i.is_empty() {
            return Ok(0);
        }
        let owed = (self.acc_i.len() as f64 * self.ratio).ceil() as usize;
        let planes: [&[f32]; 2] = [&self.acc_i[..], &self.acc_q[..]];
        let (_, produced) = self
            .inner
            .process_partial_into_buffer(Some(&planes[..]), &mut self.out_planes, None)
            .map_err(|e| DspError::ResamplerConstruction {
                reason: e.to_string(),
            })?;
        let emit = produced.min(owed);
        for (k, dst) in out[..emit].iter_mut().enumerate() {
            *dst = Complex::new(self.out_planes[0][k], self.out_planes[1][k]);
        }
        self.acc_i.clear();
        self.acc_q.clear();
        Ok(emit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn tone(freq: f64, rate: f64, count: usize) -> Vec<Complex<f32>> {
        (0..count)
            .map(|n| {
                let phase = TAU * freq * n as f64 / rate;
                Complex::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn halves_sample_count_at_ratio_half() {
        let mut resampler = RationalResampler::new(0.5).unwrap();
        let input = tone(1_000.0, 48_000.0, 4 * BASE_SAMPLES);
        let mut out = vec![Complex::new(0.0f32, 0.0); 3 * BASE_SAMPLES];
        let mut total = 0;
        for piece in input.chunks(BASE_SAMPLES) {
            total += resampler.process(piece, &mut out[total..]).unwrap();
        }
        total += resampler.flush(&mut out[total..]).unwrap();
        let expected = input.len() / 2;
        let tolerance = resampler.output_delay() + BASE_SAMPLES / 2;
        assert!(
            (total as i64 - expected as i64).unsigned_abs() as usize <= tolerance,
            "total {} vs expected {}",
            total,
            expected
        );
    }

    #[test]
    fn accumulates_small_chunks_into_blocks() {
        let mut resampler = RationalResampler::new(0.5).unwrap();
        let mut out = vec![Complex::new(0.0f32, 0.0); 2 * BASE_SAMPLES];
        let piece = tone(500.0, 48_000.0, 1000);
        let mut total = 0;
        // Four pieces stay below one block; the fifth completes it.
        for _ in 0..4 {
            total += resampler.process(&piece, &mut out[total..]).unwrap();
            assert_eq!(total, 0);
        }
        total += resampler.process(&piece, &mut out[total..]).unwrap();
        assert!(total > 0);
    }

    #[test]
    fn preserves_tone_frequency_after_decimation() {
        let in_rate = 48_000.0;
        let out_rate = 24_000.0;
        let mut resampler = RationalResampler::new(out_rate / in_rate).unwrap();
        let input = tone(6_000.0, in_rate, 2 * BASE_SAMPLES);
        let mut out = vec![Complex::new(0.0f32, 0.0); 2 * BASE_SAMPLES];
        let mut total = 0;
        for piece in input.chunks(BASE_SAMPLES) {
            total += resampler.process(piece, &mut out[total..]).unwrap();
        }
        total += resampler.flush(&mut out[total..]).unwrap();

        // Skip the transient, then check the per-sample phase advance
        // matches 6 kHz at the new rate.
        let settled = &out[total / 2..total - 16];
        let expected = TAU * 6_000.0 / out_rate;
        for pair in settled.windows(2) {
            let delta = (pair[1] * pair[0].conj()).arg() as f64;
            assert!(
                (delta - expected).abs() < 0.05,
                "phase step {} vs {}",
                delta,
                expected
            );
        }
    }

    #[test]
    fn rejects_unrepresentable_ratio() {
        assert!(RationalResampler::new(0.0).is_err());
    }
}
