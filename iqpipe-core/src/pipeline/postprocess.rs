//! PostProcessor stage: deferred filtering, post-resample shift, final
//! format conversion, and hand-off to the output path.

use std::sync::Arc;

use crate::config::SampleFormat;
use crate::convert::convert_out;
use crate::dsp::Nco;
use crate::pipeline::preprocess::StageFilter;
use crate::pipeline::AppResources;

pub(crate) struct PostStage {
    pub output_format: SampleFormat,
    pub raw_passthrough: bool,
    pub filter: Option<StageFilter>,
    pub nco: Option<Nco>,
}

pub(crate) fn run_postprocessor(resources: Arc<AppResources>, mut stage: PostStage) {
    while let Some(mut chunk) = resources.resample_to_post.dequeue() {
        if chunk.stream_discontinuity_event {
            if let Some(filter) = &mut stage.filter {
                filter.reset();
            }
            if let Some(nco) = &mut stage.nco {
                nco.reset();
            }
        }

        let bytes = if stage.raw_passthrough {
            let bytes = chunk.frames_read * chunk.input_bytes_per_sample_pair;
            let (raw, fin) = (&chunk.raw_input_data[..bytes], &mut chunk.final_output_data);
            fin[..bytes].copy_from_slice(raw);
            resources.count_frames_written(chunk.frames_read as u64);
            bytes
        } else {
            let mut frames = chunk.frames_to_write;

            match &mut stage.filter {
                None => {}
                Some(StageFilter::Fir(fir)) => {
                    fir.process(&mut chunk.complex_resampled_data[..frames]);
                }
                Some(StageFilter::Fft(fft)) => {
                    let mut emitted = fft.process(
                        &chunk.complex_resampled_data[..frames],
                        &mut chunk.complex_post_resample_data,
                    );
                    if chunk.is_last_chunk {
                        emitted += fft.flush(&mut chunk.complex_post_resample_data[emitted..]);
                    }
                    std::mem::swap(
                        &mut chunk.complex_resampled_data,
                        &mut chunk.complex_post_resample_data,
                    );
                    frames = emitted;
                }
            }

            if let Some(nco) = &mut stage.nco {
                nco.process(&mut chunk.complex_resampled_data[..frames]);
            }

            chunk.frames_to_write = frames;
            resources.count_frames_written(frames as u64);
            convert_out(
                &chunk.complex_resampled_data[..frames],
                stage.output_format,
                &mut chunk.final_output_data,
            )
        };

        let last = chunk.is_last_chunk;
        if resources.output_is_stdout {
            // Stdout path: the Writer emits and recycles the chunk.
            if !resources.stdout_queue.enqueue(chunk) || last {
                break;
            }
        } else {
            if let Some(ring) = &resources.write_ring {
                let written = ring.write(&chunk.final_output_data[..bytes]);
                if written < bytes {
                    // Short write only happens on shutdown.
                    chunk.reset();
                    let _ = resources.free_chunks.enqueue(chunk);
                    break;
                }
            }
            chunk.reset();
            let _ = resources.free_chunks.enqueue(chunk);
            if last {
                if let Some(ring) = &resources.write_ring {
                    ring.close();
                }
                break;
            }
        }
    }
}
