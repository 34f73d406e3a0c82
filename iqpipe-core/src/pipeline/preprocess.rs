//! PreProcessor stage: raw bytes to corrected, shifted complex samples.

use std::sync::Arc;

use crate::config::{SampleFormat, IQ_CORRECTION_DEFAULT_PERIOD};
use crate::convert::convert_in;
use crate::dsp::{apply_correction, DcBlocker, FftFilter, FirFilter, Nco};
use crate::pipeline::iq_worker::IqForwarder;
use crate::pipeline::AppResources;

/// Filter bound to this stage by the setup-time placement decision.
pub(crate) enum StageFilter {
    Fir(FirFilter),
    Fft(FftFilter),
}

impl StageFilter {
    pub(crate) fn reset(&mut self) {
        match self {
            StageFilter::Fir(f) => f.reset(),
            StageFilter::Fft(f) => f.reset(),
        }
    }
}

pub(crate) struct PreStage {
    pub input_format: SampleFormat,
    pub gain: f32,
    pub raw_passthrough: bool,
    pub dc: Option<DcBlocker>,
    pub nco: Option<Nco>,
    pub filter: Option<StageFilter>,
    pub iq_enabled: bool,
    pub forwarder: Option<IqForwarder>,
    pub samples_until_forward: u64,
}

impl PreStage {
    fn reset_state(&mut self) {
        if let Some(dc) = &mut self.dc {
            dc.reset();
        }
        if let Some(nco) = &mut self.nco {
            nco.reset();
        }
        if let Some(filter) = &mut self.filter {
            filter.reset();
        }
    }
}

pub(crate) fn run_preprocessor(resources: Arc<AppResources>, mut stage: PreStage) {
    while let Some(mut chunk) = resources.raw_to_pre.dequeue() {
        if chunk.stream_discontinuity_event {
            stage.reset_state();
        }

        if stage.raw_passthrough {
            chunk.frames_to_write = chunk.frames_read;
        } else {
            process_chunk(&resources, &mut stage, &mut chunk);
        }

        let last = chunk.is_last_chunk;
        if !resources.pre_to_resample.enqueue(chunk) || last {
            break;
        }
    }
    // Dropping the forwarder lets the I/Q worker exit.
    stage.forwarder = None;
}

fn process_chunk(
    resources: &AppResources,
    stage: &mut PreStage,
    chunk: &mut crate::pipeline::chunk::SampleChunk,
) {
    let pair = stage.input_format.pair_bytes();
    let frames = if chunk.frames_read > 0 {
        convert_in(
            &chunk.raw_input_data[..chunk.frames_read * pair],
            stage.input_format,
            &mut chunk.complex_pre_resample_data,
        )
    } else {
        0
    };
    let samples = &mut chunk.complex_pre_resample_data[..frames];

    if stage.gain != 1.0 {
        for sample in samples.iter_mut() {
            *sample *= stage.gain;
        }
    }

    if let Some(dc) = &mut stage.dc {
        dc.process(samples);
    }

    if stage.iq_enabled {
        let factors = resources.iq_state.load();
        apply_correction(factors, samples);
        stage.samples_until_forward = stage.samples_until_forward.saturating_sub(frames as u64);
        if stage.samples_until_forward == 0 && !samples.is_empty() {
            if let Some(forwarder) = &stage.forwarder {
                forwarder.forward(samples);
            }
            stage.samples_until_forward = IQ_CORRECTION_DEFAULT_PERIOD;
        }
    }

    if let Some(nco) = &mut stage.nco {
        nco.process(samples);
    }

    let emitted = match &mut stage.filter {
        None => frames,
        Some(StageFilter::Fir(fir)) => {
            fir.process(&mut chunk.complex_pre_resample_data[..frames]);
            frames
        }
        Some(StageFilter::Fft(fft)) => {
            let mut emitted = fft.process(
                &chunk.complex_pre_resample_data[..frames],
                &mut chunk.complex_scratch_data,
            );
            if chunk.is_last_chunk {
                emitted += fft.flush(&mut chunk.complex_scratch_data[emitted..]);
            }
            std::mem::swap(
                &mut chunk.complex_pre_resample_data,
                &mut chunk.complex_scratch_data,
            );
            emitted
        }
    };
    chunk.frames_to_write = emitted;
}
