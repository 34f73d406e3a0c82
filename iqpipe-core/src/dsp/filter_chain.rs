//! Setup-time composition of the user filter chain.
//!
//! The chain (up to `MAX_FILTER_CHAIN` elements) is composed into one
//! tap vector by sequential convolution, normalized, and bound to an
//! implementation (time-domain FIR or FFT overlap-save) and a placement
//! (before or after the resampler). All decisions happen here, once;
//! the workers only read the resulting plan.

use num_complex::Complex;
use std::f64::consts::PI;

use crate::config::{AppConfig, FilterSpec, RESAMPLER_STOPBAND_DB};
use crate::errors::{ConfigError, DspError, IqPipeError};
use crate::dsp::fir::{
    convolve_taps, design_bandpass, design_bandstop, design_highpass, design_lowpass, response_at,
};

const SYMMETRY_EPSILON: f64 = 1e-9;
const NORMALIZATION_PROBES: usize = 2048;

/// Which filter implementation runs, chosen at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterImplementation {
    Fir,
    /// Overlap-save with the resolved block size.
    Fft { block_size: usize },
}

/// The fully resolved filter decision.
pub struct FilterPlan {
    pub taps: Vec<Complex<f64>>,
    pub implementation: FilterImplementation,
    /// True when the filter runs at the (lower) output rate.
    pub apply_post_resample: bool,
    /// Sample rate the taps were designed for.
    pub design_rate: f64,
}

/// Compose the configured chain, or `None` when no filter is requested.
pub fn build_filter_plan(config: &AppConfig) -> Result<Option<FilterPlan>, IqPipeError> {
    if config.filters.is_empty() {
        return Ok(None);
    }

    // Placement: a chain whose passband reaches above the output
    // Nyquist must run before the resampler or its content would alias;
    // otherwise it runs after, where the lower rate is cheaper.
    let max_passband: f64 = config
        .filters
        .iter()
        .map(|f| f.max_passband_hz())
        .fold(0.0, f64::max);
    let apply_post_resample = max_passband <= config.output_rate / 2.0;
    let design_rate = if apply_post_resample {
        config.output_rate
    } else {
        config.input_rate
    };

    let mut composite: Option<Vec<Complex<f64>>> = None;
    for spec in &config.filters {
        let taps = design_element(spec, design_rate)?;
        composite = Some(match composite {
            None => taps,
            Some(existing) => convolve_taps(&existing, &taps),
        });
    }
    let mut taps = composite.expect("chain is non-empty");

    normalize(&mut taps, &config.filters);

    let symmetric = is_real_symmetric(&taps);
    let implementation = if config.force_fft_filter || !symmetric {
        let min_block = (2 * (taps.len() - 1)).next_power_of_two();
        let block_size = match config.fft_block_size {
            Some(size) if size < min_block => {
                return Err(ConfigError::InvalidFftBlockSize {
                    size,
                    reason: format!("below the minimum {} for {} taps", min_block, taps.len()),
                }
                .into());
            }
            Some(size) => size,
            None => min_block,
        };
        FilterImplementation::Fft { block_size }
    } else {
        FilterImplementation::Fir
    };

    Ok(Some(FilterPlan {
        taps,
        implementation,
        apply_post_resample,
        design_rate,
    }))
}

fn design_element(spec: &FilterSpec, rate: f64) -> Result<Vec<Complex<f64>>, DspError> {
    let nyquist = rate / 2.0;
    match *spec {
        FilterSpec::Lowpass { cutoff_hz } => {
            if cutoff_hz >= nyquist {
                return Err(DspError::PassbandBeyondNyquist {
                    edge_hz: cutoff_hz,
                    nyquist_hz: nyquist,
                });
            }
            design_lowpass(cutoff_hz, rate, RESAMPLER_STOPBAND_DB)
        }
        FilterSpec::Highpass { cutoff_hz } => {
            design_highpass(cutoff_hz, rate, RESAMPLER_STOPBAND_DB)
        }
        FilterSpec::Bandpass {
            center_hz,
            width_hz,
        } => {
            if center_hz.abs() + width_hz / 2.0 >= nyquist {
                return Err(DspError::PassbandBeyondNyquist {
                    edge_hz: center_hz.abs() + width_hz / 2.0,
                    nyquist_hz: nyquist,
                });
            }
            design_bandpass(center_hz, width_hz, rate, RESAMPLER_STOPBAND_DB)
        }
        FilterSpec::Bandstop {
            center_hz,
            width_hz,
        } => design_bandstop(center_hz, width_hz, rate, RESAMPLER_STOPBAND_DB),
    }
}

/// Pure-real lowpass chains are scaled to unit DC gain; everything else
/// is scaled to unit peak magnitude over a frequency probe grid.
fn normalize(taps: &mut [Complex<f64>], specs: &[FilterSpec]) {
    let all_lowpass = specs
        .iter()
        .all(|spec| matches!(spec, FilterSpec::Lowpass { .. }));
    let scale = if all_lowpass {
        let dc: Complex<f64> = taps.iter().sum();
        dc.norm()
    } else {
        let mut peak = 0.0f64;
        for probe in 0..NORMALIZATION_PROBES {
            let omega = -PI + 2.0 * PI * probe as f64 / NORMALIZATION_PROBES as f64;
            peak = peak.max(response_at(taps, omega).norm());
        }
        peak
    };
    if scale > 1e-12 {
        for tap in taps.iter_mut() {
            *tap /= scale;
        }
    }
}

fn is_real_symmetric(taps: &[Complex<f64>]) -> bool {
    let real = taps.iter().all(|t| t.im.abs() < SYMMETRY_EPSILON);
    if !real {
        return false;
    }
    let n = taps.len();
    (0..n / 2).all(|k| (taps[k].re - taps[n - 1 - k].re).abs() < SYMMETRY_EPSILON)
}
