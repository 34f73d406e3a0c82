//! FIR filter design (windowed sinc) and the stateful time-domain form.
//!
//! Design runs in f64 and yields complex taps so chains containing a
//! frequency-offset bandpass compose by plain convolution; purely real
//! chains simply carry zero imaginary parts.

use num_complex::Complex;
use std::f64::consts::{PI, TAU};

use crate::errors::DspError;

/// Smallest and largest tap counts the designer will produce.
const MIN_TAPS: usize = 31;
const MAX_TAPS: usize = 4097;

/// Tap count for a given transition width, from the classic
/// `attenuation / (22 * normalized_width)` estimate, forced odd.
fn tap_count(transition_hz: f64, sample_rate: f64, attenuation_db: f64) -> usize {
    let normalized = (transition_hz / sample_rate).max(1e-6);
    let taps = (attenuation_db / (22.0 * normalized)).ceil() as usize;
    let taps = taps.clamp(MIN_TAPS, MAX_TAPS);
    if taps % 2 == 0 {
        taps + 1
    } else {
        taps
    }
}

fn blackman(n: usize, len: usize) -> f64 {
    let x = n as f64 / (len - 1) as f64;
    0.42 - 0.5 * (TAU * x).cos() + 0.08 * (2.0 * TAU * x).cos()
}

/// Windowed-sinc lowpass prototype with unity DC gain.
pub fn design_lowpass(
    cutoff_hz: f64,
    sample_rate: f64,
    attenuation_db: f64,
) -> Result<Vec<Complex<f64>>, DspError> {
    let nyquist = sample_rate / 2.0;
    if !(cutoff_hz > 0.0) || cutoff_hz >= nyquist {
        return Err(DspError::FilterDesignFailed {
            reason: format!("lowpass cutoff {cutoff_hz} Hz outside (0, {nyquist})"),
        });
    }
    let transition = (cutoff_hz * 0.1).max(sample_rate * 0.005);
    let len = tap_count(transition, sample_rate, attenuation_db);
    let mid = (len / 2) as f64;
    let fc = cutoff_hz / sample_rate;

    let mut taps = Vec::with_capacity(len);
    for n in 0..len {
        let t = n as f64 - mid;
        let sinc = if t.abs() < 1e-12 {
            2.0 * fc
        } else {
            (TAU * fc * t).sin() / (PI * t)
        };
        taps.push(Complex::new(sinc * blackman(n, len), 0.0));
    }
    let dc: f64 = taps.iter().map(|c| c.re).sum();
    for tap in &mut taps {
        tap.re /= dc;
    }
    Ok(taps)
}

/// Spectral inversion of the matching lowpass.
pub fn design_highpass(
    cutoff_hz: f64,
    sample_rate: f64,
    attenuation_db: f64,
) -> Result<Vec<Complex<f64>>, DspError> {
    let mut taps = design_lowpass(cutoff_hz, sample_rate, attenuation_db)?;
    let mid = taps.len() / 2;
    for tap in taps.iter_mut() {
        *tap = -*tap;
    }
    taps[mid] += Complex::new(1.0, 0.0);
    Ok(taps)
}

/// Lowpass prototype modulated to `center_hz`. A non-zero center makes
/// the taps complex and the response one-sided (asymmetric around DC).
pub fn design_bandpass(
    center_hz: f64,
    width_hz: f64,
    sample_rate: f64,
    attenuation_db: f64,
) -> Result<Vec<Complex<f64>>, DspError> {
    let proto = design_lowpass(width_hz / 2.0, sample_rate, attenuation_db)?;
    let mid = (proto.len() / 2) as f64;
    let w = TAU * center_hz / sample_rate;
    Ok(proto
        .iter()
        .enumerate()
        .map(|(n, tap)| {
            let phase = w * (n as f64 - mid);
            tap * Complex::new(phase.cos(), phase.sin())
        })
        .collect())
}

/// Complement of the matching bandpass.
pub fn design_bandstop(
    center_hz: f64,
    width_hz: f64,
    sample_rate: f64,
    attenuation_db: f64,
) -> Result<Vec<Complex<f64>>, DspError> {
    let mut taps = design_bandpass(center_hz, width_hz, sample_rate, attenuation_db)?;
    let mid = taps.len() / 2;
    for tap in taps.iter_mut() {
        *tap = -*tap;
    }
    taps[mid] += Complex::new(1.0, 0.0);
    Ok(taps)
}

/// Full linear convolution of two tap vectors.
pub fn convolve_taps(a: &[Complex<f64>], b: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Frequency response at `omega` (radians per sample).
pub fn response_at(taps: &[Complex<f64>], omega: f64) -> Complex<f64> {
    let mut acc = Complex::new(0.0, 0.0);
    for (n, &tap) in taps.iter().enumerate() {
        let phase = -omega * n as f64;
        acc += tap * Complex::new(phase.cos(), phase.sin());
    }
    acc
}

/// Stateful time-domain complex FIR. Length-preserving per call; the
/// delay line carries the last `taps-1` inputs across chunks and is
/// reset on stream discontinuity.
pub struct FirFilter {
    taps: Vec<Complex<f32>>,
    /// history (taps-1) followed by the current block.
    work: Vec<Complex<f32>>,
    history_len: usize,
}

impl FirFilter {
    pub fn new(taps: &[Complex<f64>], max_block: usize) -> Self {
        let history_len = taps.len() - 1;
        Self {
            taps: taps
                .iter()
                .map(|c| Complex::new(c.re as f32, c.im as f32))
                .collect(),
            work: vec![Complex::new(0.0, 0.0); history_len + max_block],
            history_len,
        }
    }

    pub fn reset(&mut self) {
        for sample in &mut self.work[..self.history_len] {
            *sample = Complex::new(0.0, 0.0);
        }
    }

    pub fn process(&mut self, data: &mut [Complex<f32>]) {
        let n = data.len();
        debug_assert!(self.history_len + n <= self.work.len());
        self.work[self.history_len..self.history_len + n].copy_from_slice(data);

        for (i, out) in data.iter_mut().enumerate() {
            let mut acc = Complex::new(0.0f32, 0.0);
            // x[i - k] lives at work[history_len + i - k].
            let base = self.history_len + i;
            for (k, &tap) in self.taps.iter().enumerate() {
                acc += tap * self.work[base - k];
            }
            *out = acc;
        }

        // Slide the last taps-1 inputs into the history region.
        let total = self.history_len + n;
        self.work.copy_within(total - self.history_len..total, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lowpass_has_unity_dc_gain() {
        let taps = design_lowpass(3_000.0, 48_000.0, 60.0).unwrap();
        let dc = response_at(&taps, 0.0);
        assert_relative_eq!(dc.re, 1.0, epsilon = 1e-9);
        assert_relative_eq!(dc.im, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn lowpass_attenuates_stopband() {
        let taps = design_lowpass(3_000.0, 48_000.0, 60.0).unwrap();
        let stop = response_at(&taps, TAU * 9_000.0 / 48_000.0).norm();
        assert!(
            20.0 * stop.log10() < -55.0,
            "stopband only {} dB",
            20.0 * stop.log10()
        );
    }

    #[test]
    fn highpass_blocks_dc_passes_top() {
        let taps = design_highpass(6_000.0, 48_000.0, 60.0).unwrap();
        assert!(response_at(&taps, 0.0).norm() < 1e-3);
        let top = response_at(&taps, TAU * 20_000.0 / 48_000.0).norm();
        assert_relative_eq!(top, 1.0, epsilon = 0.05);
    }

    #[test]
    fn offset_bandpass_is_one_sided() {
        let taps = design_bandpass(5_000.0, 2_000.0, 48_000.0, 60.0).unwrap();
        let pass = response_at(&taps, TAU * 5_000.0 / 48_000.0).norm();
        let image = response_at(&taps, -TAU * 5_000.0 / 48_000.0).norm();
        assert!(pass > 0.9);
        assert!(image < 0.01, "image response {}", image);
        assert!(taps.iter().any(|t| t.im.abs() > 1e-6));
    }

    #[test]
    fn convolution_length_and_identity() {
        let identity = vec![Complex::new(1.0, 0.0)];
        let taps = design_lowpass(4_000.0, 48_000.0, 60.0).unwrap();
        let composed = convolve_taps(&taps, &identity);
        assert_eq!(composed.len(), taps.len());
        for (a, b) in composed.iter().zip(taps.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
        }
    }

    #[test]
    fn streaming_matches_one_shot() {
        let taps = design_lowpass(4_000.0, 48_000.0, 60.0).unwrap();
        let signal: Vec<Complex<f32>> = (0..512)
            .map(|n| {
                let phase = TAU * 1_000.0 * n as f64 / 48_000.0;
                Complex::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect();

        let mut whole = signal.clone();
        let mut fir_a = FirFilter::new(&taps, 512);
        fir_a.process(&mut whole);

        let mut split = signal;
        let mut fir_b = FirFilter::new(&taps, 512);
        let (head, tail) = split.split_at_mut(123);
        fir_b.process(head);
        fir_b.process(tail);

        for (a, b) in whole.iter().zip(split.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-5);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-5);
        }
    }
}
