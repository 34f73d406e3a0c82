//! DSP building blocks used by the pipeline stages.
//!
//! Everything here is constructed at setup time and owned by exactly
//! one worker thread; the only cross-thread piece is the I/Q factor
//! publication in [`iq_correction`].

pub mod dc_block;
pub mod fft_filter;
pub mod filter_chain;
pub mod fir;
pub mod iq_correction;
pub mod nco;
pub mod resampler;

pub use dc_block::DcBlocker;
pub use fft_filter::FftFilter;
pub use filter_chain::{build_filter_plan, FilterImplementation, FilterPlan};
pub use fir::FirFilter;
pub use iq_correction::{apply_correction, IqCorrectionState, IqEstimator, IqFactors};
pub use nco::Nco;
pub use resampler::RationalResampler;
