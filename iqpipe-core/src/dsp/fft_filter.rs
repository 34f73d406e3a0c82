//! Overlap-save FFT convolution for long or complex-asymmetric filters.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::errors::DspError;

/// Block convolver: input is consumed in steps of `block_size - (taps-1)`
/// samples, each block is multiplied by the filter's frequency response,
/// and the aliased head of every inverse transform is discarded. The
/// sliding buffer is zero-primed, so stream output aligns one-to-one
/// with stream input and `flush` drains the final partial step.
pub struct FftFilter {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    freq_response: Vec<Complex<f32>>,
    /// Sliding time-domain buffer of `block_size` samples.
    block: Vec<Complex<f32>>,
    work: Vec<Complex<f32>>,
    /// Queued input shorter than one step.
    pending: Vec<Complex<f32>>,
    block_size: usize,
    overlap: usize,
    step: usize,
}

impl FftFilter {
    /// `block_size` must be a power of two of at least `2 * (taps - 1)`.
    pub fn new(taps: &[Complex<f64>], block_size: usize) -> Result<Self, DspError> {
        if !block_size.is_power_of_two() {
            return Err(DspError::InvalidFftSize { size: block_size });
        }
        let overlap = taps.len() - 1;
        if block_size < 2 * overlap.max(1) {
            return Err(DspError::FilterDesignFailed {
                reason: format!(
                    "FFT block {} too small for {} taps",
                    block_size,
                    taps.len()
                ),
            });
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(block_size);
        let ifft = planner.plan_fft_inverse(block_size);

        let mut freq_response: Vec<Complex<f32>> = taps
            .iter()
            .map(|c| Complex::new(c.re as f32, c.im as f32))
            .collect();
        freq_response.resize(block_size, Complex::new(0.0, 0.0));
        fft.process(&mut freq_response);

        let step = block_size - overlap;
        Ok(Self {
            fft,
            ifft,
            freq_response,
            block: vec![Complex::new(0.0, 0.0); block_size],
            work: vec![Complex::new(0.0, 0.0); block_size],
            pending: Vec::with_capacity(step),
            block_size,
            overlap,
            step,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Largest number of samples one `process` call may emit beyond its
    /// input length; chunk buffers are sized with this headroom.
    pub fn max_carry(&self) -> usize {
        self.step
    }

    pub fn reset(&mut self) {
        for sample in &mut self.block {
            *sample = Complex::new(0.0, 0.0);
        }
        self.pending.clear();
    }

    /// Feed `input`, writing any completed steps to `out`. Returns the
    /// number of samples emitted (at most `input.len() + pending`,
    /// rounded down to whole steps).
    pub fn process(&mut self, input: &[Complex<f32>], out: &mut [Complex<f32>]) -> usize {
        let mut written = 0;
        let mut idx = 0;
        while idx < input.len() {
            let take = (self.step - self.pending.len()).min(input.len() - idx);
            self.pending.extend_from_slice(&input[idx..idx + take]);
            idx += take;
            if self.pending.len() == self.step {
                written += self.run_step(self.step, &mut out[written..]);
                self.pending.clear();
            }
        }
        written
    }

    /// Drain the final partial step at end of stream. Emits exactly the
    /// number of samples still owed.
    pub fn flush(&mut self, out: &mut [Complex<f32>]) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let owed = self.pending.len();
        self.pending
            .resize(self.step, Complex::new(0.0, 0.0));
        let emitted = self.run_step(owed, out);
        self.pending.clear();
        emitted
    }

    fn run_step(&mut self, emit: usize, out: &mut [Complex<f32>]) -> usize {
        // Slide the buffer left one step and append the new samples.
        self.block.copy_within(self.step.., 0);
        self.block[self.overlap..].copy_from_slice(&self.pending);

        self.work.copy_from_slice(&self.block);
        self.fft.process(&mut self.work);
        for (bin, response) in self.work.iter_mut().zip(self.freq_response.iter()) {
            *bin *= response;
        }
        self.ifft.process(&mut self.work);

        let scale = 1.0 / self.block_size as f32;
        for (dst, src) in out[..emit]
            .iter_mut()
            .zip(self.work[self.overlap..self.overlap + emit].iter())
        {
            *dst = src * scale;
        }
        emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::fir::{design_lowpass, FirFilter};
    use approx::assert_relative_eq;
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
    fn rejects_bad_block_sizes() {
        let taps = design_lowpass(4_000.0, 48_000.0, 60.0).unwrap();
        assert!(FftFilter::new(&taps, 1000).is_err());
        assert!(FftFilter::new(&taps, 64).is_err());
        let min_block = (2 * (taps.len() - 1)).next_power_of_two();
        assert!(FftFilter::new(&taps, min_block).is_ok());
    }

    #[test]
    fn matches_time_domain_fir() {
        let taps = design_lowpass(4_000.0, 48_000.0, 60.0).unwrap();
        let block = (2 * (taps.len() - 1)).next_power_of_two();
        let signal = tone(2_000.0, 48_000.0, 3000);

        let mut reference = signal.clone();
        let mut fir = FirFilter::new(&taps, reference.len());
        fir.process(&mut reference);

        let mut fft_filter = FftFilter::new(&taps, block).unwrap();
        let mut produced = vec![Complex::new(0.0f32, 0.0); signal.len() + block];
        let mut total = 0;
        for piece in signal.chunks(700) {
            total += fft_filter.process(piece, &mut produced[total..]);
        }
        total += fft_filter.flush(&mut produced[total..]);
        assert_eq!(total, signal.len());

        for (a, b) in reference.iter().zip(produced[..total].iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-3);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-3);
        }
    }

    #[test]
    fn totals_preserved_across_odd_chunking() {
        let taps = design_lowpass(2_000.0, 48_000.0, 60.0).unwrap();
        let block = (2 * (taps.len() - 1)).next_power_of_two();
        let mut fft_filter = FftFilter::new(&taps, block).unwrap();

        let mut out = vec![Complex::new(0.0f32, 0.0); 10_000 + block];
        let mut fed = 0;
        let mut got = 0;
        for len in [1usize, 57, 500, 1023, 2048, 333] {
            let piece = vec![Complex::new(1.0f32, 0.0); len];
            got += fft_filter.process(&piece, &mut out[got..]);
            fed += len;
        }
        got += fft_filter.flush(&mut out[got..]);
        assert_eq!(got, fed);
    }

    #[test]
    fn reset_restarts_history() {
        let taps = design_lowpass(4_000.0, 48_000.0, 60.0).unwrap();
        let block = (2 * (taps.len() - 1)).next_power_of_two();
        let signal = tone(1_000.0, 48_000.0, block);

        let mut first = vec![Complex::new(0.0f32, 0.0); 2 * block];
        let mut filter = FftFilter::new(&taps, block).unwrap();
        let mut n1 = filter.process(&signal, &mut first);
        n1 += filter.flush(&mut first[n1..]);

        filter.reset();
        let mut second = vec![Complex::new(0.0f32, 0.0); 2 * block];
        let mut n2 = filter.process(&signal, &mut second);
        n2 += filter.flush(&mut second[n2..]);

        assert_eq!(n1, n2);
        for (a, b) in first[..n1].iter().zip(second[..n2].iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-6);
        }
    }
}
