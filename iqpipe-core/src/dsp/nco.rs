//! Numerically-controlled oscillator for frequency translation.

use num_complex::Complex;
use std::f64::consts::TAU;

/// Mixes each sample with `e^(j*2*pi*f_shift*n/fs)`. The phase
/// accumulator runs in f64 and is wrapped every sample so long runs do
/// not lose precision. Stateful; reset on stream discontinuity.
pub struct Nco {
    phase: f64,
    increment: f64,
}

impl Nco {
    pub fn new(shift_hz: f64, sample_rate: f64) -> Self {
        Self {
            phase: 0.0,
            increment: TAU * shift_hz / sample_rate,
        }
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    pub fn process(&mut self, samples: &mut [Complex<f32>]) {
        let mut phase = self.phase;
        for sample in samples.iter_mut() {
            let (sin, cos) = phase.sin_cos();
            *sample *= Complex::new(cos as f32, sin as f32);
            phase += self.increment;
            if phase >= TAU {
                phase -= TAU;
            } else if phase <= -TAU {
                phase += TAU;
            }
        }
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tone(freq: f64, rate: f64, count: usize) -> Vec<Complex<f32>> {
        (0..count)
            .map(|n| {
                let phase = TAU * freq * n as f64 / rate;
                Complex::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn shifts_tone_to_new_frequency() {
        let rate = 48_000.0;
        let mut samples = tone(1_000.0, rate, 4096);
        let mut nco = Nco::new(2_000.0, rate);
        nco.process(&mut samples);
        let expected = tone(3_000.0, rate, 4096);
        for (got, want) in samples.iter().zip(expected.iter()).skip(1) {
            assert_relative_eq!(got.re, want.re, epsilon = 1e-3);
            assert_relative_eq!(got.im, want.im, epsilon = 1e-3);
        }
    }

    #[test]
    fn negative_shift_conjugates_direction() {
        let rate = 48_000.0;
        let mut samples = tone(5_000.0, rate, 2048);
        let mut nco = Nco::new(-5_000.0, rate);
        nco.process(&mut samples);
        // Shifted to DC: every sample close to (1, 0).
        for sample in &samples {
            assert_relative_eq!(sample.re, 1.0, epsilon = 1e-3);
            assert_relative_eq!(sample.im, 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn phase_continuous_across_calls() {
        let rate = 48_000.0;
        let mut whole = tone(1_000.0, rate, 512);
        let mut split = whole.clone();

        let mut nco_a = Nco::new(700.0, rate);
        nco_a.process(&mut whole);

        let mut nco_b = Nco::new(700.0, rate);
        let (head, tail) = split.split_at_mut(200);
        nco_b.process(head);
        nco_b.process(tail);

        for (a, b) in whole.iter().zip(split.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-6);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-6);
        }
    }
}
