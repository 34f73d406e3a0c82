//! Resampler stage worker.

use std::sync::Arc;

use crate::dsp::RationalResampler;
use crate::errors::IqPipeError;
use crate::pipeline::AppResources;

/// Rate conversion between the pre and post buffers. `None` is
/// passthrough: the buffers are swapped and the frame count rides
/// through untouched.
pub(crate) fn run_resampler(resources: Arc<AppResources>, mut resampler: Option<RationalResampler>) {
    while let Some(mut chunk) = resources.pre_to_resample.dequeue() {
        if chunk.stream_discontinuity_event {
            if let Some(resampler) = &mut resampler {
                resampler.reset();
            }
        }

        match &mut resampler {
            None => {
                std::mem::swap(
                    &mut chunk.complex_pre_resample_data,
                    &mut chunk.complex_resampled_data,
                );
            }
            Some(resampler) => {
                let result = resampler
                    .process(
                        &chunk.complex_pre_resample_data[..chunk.frames_to_write],
                        &mut chunk.complex_resampled_data,
                    )
                    .and_then(|mut produced| {
                        if chunk.is_last_chunk {
                            produced +=
                                resampler.flush(&mut chunk.complex_resampled_data[produced..])?;
                        }
                        Ok(produced)
                    });
                match result {
                    Ok(produced) => chunk.frames_to_write = produced,
                    Err(e) => {
                        let err = IqPipeError::Dsp(e);
                        resources
                            .logger
                            .error("resampler failed", Some(err.to_string()));
                        chunk.reset();
                        chunk.is_last_chunk = true;
                        let _ = resources.resample_to_post.enqueue(chunk);
                        resources.fail_with(err);
                        break;
                    }
                }
            }
        }

        let last = chunk.is_last_chunk;
        if !resources.resample_to_post.enqueue(chunk) || last {
            break;
        }
    }
}
