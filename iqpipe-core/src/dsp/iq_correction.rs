//! I/Q imbalance correction: lock-free factor publication plus the
//! off-path estimator that keeps the factors current.
//!
//! The PreProcessor reads the active factors with one acquire load per
//! chunk; the optimizer worker writes new factors into the inactive
//! slot and then stores the new active index, so readers always observe
//! a coherent (magnitude, phase) pair.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{
    IQ_BASE_INCREMENT, IQ_CORRECTION_FFT_SIZE, IQ_CORRECTION_PEAK_THRESHOLD_DB,
    IQ_CORRECTION_SMOOTHING_FACTOR, IQ_MAX_PASSES,
};

/// Gain and phase imbalance estimate. Identity is (1.0, 0.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IqFactors {
    pub magnitude: f32,
    pub phase: f32,
}

impl Default for IqFactors {
    fn default() -> Self {
        Self {
            magnitude: 1.0,
            phase: 0.0,
        }
    }
}

fn pack(factors: IqFactors) -> u64 {
    ((factors.magnitude.to_bits() as u64) << 32) | factors.phase.to_bits() as u64
}

fn unpack(bits: u64) -> IqFactors {
    IqFactors {
        magnitude: f32::from_bits((bits >> 32) as u32),
        phase: f32::from_bits(bits as u32),
    }
}

/// Double-buffered factor slots plus the active index.
pub struct IqCorrectionState {
    slots: [AtomicU64; 2],
    active: AtomicUsize,
}

impl IqCorrectionState {
    pub fn new() -> Arc<Self> {
        let identity = pack(IqFactors::default());
        Arc::new(Self {
            slots: [AtomicU64::new(identity), AtomicU64::new(identity)],
            active: AtomicUsize::new(0),
        })
    }

    pub fn load(&self) -> IqFactors {
        let idx = self.active.load(Ordering::Acquire);
        unpack(self.slots[idx].load(Ordering::Acquire))
    }

    pub fn publish(&self, factors: IqFactors) {
        let inactive = 1 - self.active.load(Ordering::Relaxed);
        self.slots[inactive].store(pack(factors), Ordering::Release);
        self.active.store(inactive, Ordering::Release);
    }
}

/// Apply `Q' = (Q - magnitude * I * sin(phase)) / cos(phase)` to every
/// sample. Identity factors short-circuit to a no-op.
pub fn apply_correction(factors: IqFactors, samples: &mut [Complex<f32>]) {
    if factors.magnitude == 1.0 && factors.phase == 0.0 {
        return;
    }
    let sin_phi = factors.phase.sin() * factors.magnitude;
    let inv_cos = 1.0 / factors.phase.cos();
    for sample in samples.iter_mut() {
        sample.im = (sample.im - sample.re * sin_phi) * inv_cos;
    }
}

/// Off-path estimator. Accumulates forwarded blocks until a full FFT
/// frame is collected, then refines the published factors by a bounded
/// hill climb on the image-to-signal power ratio.
pub struct IqEstimator {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    accum: Vec<Complex<f32>>,
    work: Vec<Complex<f32>>,
}

impl IqEstimator {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(IQ_CORRECTION_FFT_SIZE);
        let window = (0..IQ_CORRECTION_FFT_SIZE)
            .map(|n| {
                let x = TAU * n as f64 / (IQ_CORRECTION_FFT_SIZE - 1) as f64;
                (0.5 - 0.5 * x.cos()) as f32
            })
            .collect();
        Self {
            fft,
            window,
            accum: Vec::with_capacity(IQ_CORRECTION_FFT_SIZE),
            work: vec![Complex::new(0.0, 0.0); IQ_CORRECTION_FFT_SIZE],
        }
    }

    /// Feed a forwarded block; runs one estimation pass per full frame.
    /// Returns `true` when new factors were published.
    pub fn feed(&mut self, state: &IqCorrectionState, mut block: &[Complex<f32>]) -> bool {
        let mut published = false;
        while !block.is_empty() {
            let take = (IQ_CORRECTION_FFT_SIZE - self.accum.len()).min(block.len());
            self.accum.extend_from_slice(&block[..take]);
            block = &block[take..];
            if self.accum.len() == IQ_CORRECTION_FFT_SIZE {
                published |= self.estimate(state);
                self.accum.clear();
            }
        }
        published
    }

    /// Image-to-signal ratio after applying `delta` on top of the
    /// already-corrected capture; `None` when the signal is too weak.
    fn image_ratio(&mut self, delta: IqFactors) -> Option<f64> {
        for ((dst, &src), &w) in self
            .work
            .iter_mut()
            .zip(self.accum.iter())
            .zip(self.window.iter())
        {
            *dst = src * w;
        }
        apply_correction(delta, &mut self.work);
        self.fft.process(&mut self.work);

        let n = IQ_CORRECTION_FFT_SIZE;
        let mut peak_bin = 1;
        let mut peak_power = 0.0f64;
        for (bin, value) in self.work.iter().enumerate() {
            if bin == 0 || bin == n / 2 {
                continue;
            }
            let power = value.norm_sqr() as f64;
            if power > peak_power {
                peak_power = power;
                peak_bin = bin;
            }
        }

        // dBFS relative to a full-scale tone (coherent window gain 0.5).
        let full_scale = (n as f64 * 0.5).powi(2);
        let level_db = 10.0 * (peak_power / full_scale).max(1e-30).log10();
        if level_db < IQ_CORRECTION_PEAK_THRESHOLD_DB as f64 {
            return None;
        }
        let image_power = self.work[n - peak_bin].norm_sqr() as f64;
        Some(image_power / peak_power)
    }

    fn estimate(&mut self, state: &IqCorrectionState) -> bool {
        let mut delta = IqFactors::default();
        let mut best = match self.image_ratio(delta) {
            Some(ratio) => ratio,
            None => return false,
        };

        for _ in 0..IQ_MAX_PASSES {
            let mut improved = false;
            for (dm, dp) in [
                (IQ_BASE_INCREMENT, 0.0),
                (-IQ_BASE_INCREMENT, 0.0),
                (0.0, IQ_BASE_INCREMENT),
                (0.0, -IQ_BASE_INCREMENT),
            ] {
                let candidate = IqFactors {
                    magnitude: delta.magnitude + dm,
                    phase: delta.phase + dp,
                };
                if let Some(ratio) = self.image_ratio(candidate) {
                    if ratio < best {
                        best = ratio;
                        delta = candidate;
                        improved = true;
                    }
                }
            }
            if !improved {
                break;
            }
        }

        let current = state.load();
        let target = IqFactors {
            magnitude: current.magnitude * delta.magnitude,
            phase: current.phase + delta.phase,
        };
        let alpha = IQ_CORRECTION_SMOOTHING_FACTOR;
        state.publish(IqFactors {
            magnitude: current.magnitude * (1.0 - alpha) + target.magnitude * alpha,
            phase: current.phase * (1.0 - alpha) + target.phase * alpha,
        });
        true
    }
}

impl Default for IqEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_correction_is_noop() {
        let mut samples = vec![Complex::new(0.5f32, -0.25); 16];
        let original = samples.clone();
        apply_correction(IqFactors::default(), &mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn publish_load_roundtrip() {
        let state = IqCorrectionState::new();
        assert_eq!(state.load(), IqFactors::default());
        let factors = IqFactors {
            magnitude: 1.02,
            phase: -0.003,
        };
        state.publish(factors);
        assert_eq!(state.load(), factors);
        // A second publish lands in the other slot.
        let next = IqFactors {
            magnitude: 0.99,
            phase: 0.001,
        };
        state.publish(next);
        assert_eq!(state.load(), next);
    }

    #[test]
    fn correction_removes_phase_skew() {
        // Build a tone with a known quadrature skew, then correct with
        // the matching factors and check the image tone collapses.
        let phase_err = 0.02f32;
        let skewed: Vec<Complex<f32>> = (0..1024)
            .map(|n| {
                let t = TAU * 100.0 * n as f64 / 1024.0;
                let i = t.cos() as f32;
                let q = (t + phase_err as f64).sin() as f32;
                Complex::new(i, q)
            })
            .collect();

        let image_power = |samples: &[Complex<f32>]| -> f32 {
            let mut planner = FftPlanner::new();
            let fft = planner.plan_fft_forward(1024);
            let mut buf = samples.to_vec();
            fft.process(&mut buf);
            buf[1024 - 100].norm_sqr()
        };

        let before = image_power(&skewed);
        let mut corrected = skewed;
        apply_correction(
            IqFactors {
                magnitude: 1.0,
                phase: phase_err,
            },
            &mut corrected,
        );
        let after = image_power(&corrected);
        assert!(after < before / 100.0, "before {} after {}", before, after);
    }

    #[test]
    fn estimator_skips_weak_signal() {
        let state = IqCorrectionState::new();
        let mut estimator = IqEstimator::new();
        let noise: Vec<Complex<f32>> =
            vec![Complex::new(1e-6, -1e-6); IQ_CORRECTION_FFT_SIZE];
        assert!(!estimator.feed(&state, &noise));
        assert_eq!(state.load(), IqFactors::default());
    }

    #[test]
    fn estimator_reduces_image_of_skewed_tone() {
        let state = IqCorrectionState::new();
        let mut estimator = IqEstimator::new();
        let skewed: Vec<Complex<f32>> = (0..IQ_CORRECTION_FFT_SIZE)
            .map(|n| {
                let t = TAU * 64.0 * n as f64 / IQ_CORRECTION_FFT_SIZE as f64;
                Complex::new(t.cos() as f32, (t + 0.05).sin() as f32)
            })
            .collect();
        assert!(estimator.feed(&state, &skewed));
        let factors = state.load();
        // Smoothed step toward a positive phase estimate.
        assert!(factors.phase > 0.0, "phase {}", factors.phase);
    }
}
