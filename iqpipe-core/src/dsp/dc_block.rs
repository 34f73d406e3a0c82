//! Single-pole complex IIR high-pass used to remove DC offset.

use num_complex::Complex;
use std::f64::consts::TAU;

/// `y[n] = x[n] - x[n-1] + r * y[n-1]`, with the pole radius derived
/// from the cutoff frequency. Stateful; reset on stream discontinuity.
pub struct DcBlocker {
    r: f32,
    prev_input: Complex<f32>,
    prev_output: Complex<f32>,
}

impl DcBlocker {
    pub fn new(cutoff_hz: f64, sample_rate: f64) -> Self {
        let r = (-TAU * cutoff_hz / sample_rate).exp() as f32;
        Self {
            r,
            prev_input: Complex::new(0.0, 0.0),
            prev_output: Complex::new(0.0, 0.0),
        }
    }

    pub fn reset(&mut self) {
        self.prev_input = Complex::new(0.0, 0.0);
        self.prev_output = Complex::new(0.0, 0.0);
    }

    pub fn process(&mut self, samples: &mut [Complex<f32>]) {
        let r = self.r;
        let mut prev_in = self.prev_input;
        let mut prev_out = self.prev_output;
        for sample in samples.iter_mut() {
            let x = *sample;
            let y = x - prev_in + prev_out * r;
            prev_in = x;
            prev_out = y;
            *sample = y;
        }
        self.prev_input = prev_in;
        self.prev_output = prev_out;
    }
}
