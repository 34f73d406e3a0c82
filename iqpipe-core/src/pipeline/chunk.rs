//! The unit of work flowing through the pipeline.

use num_complex::Complex;

/// One pipeline work unit: the raw input bytes, the complex working
/// buffers each DSP stage writes into, and the converted output bytes,
/// plus the metadata that travels with them.
///
/// Chunks are created once at startup and recycled through the free
/// queue forever; ownership moves with the `Box` through the stage
/// queues, so a chunk is held by exactly one stage at any time and its
/// buffers never alias another chunk's.
pub struct SampleChunk {
    pub raw_input_data: Vec<u8>,
    pub complex_pre_resample_data: Vec<Complex<f32>>,
    pub complex_resampled_data: Vec<Complex<f32>>,
    pub complex_post_resample_data: Vec<Complex<f32>>,
    pub complex_scratch_data: Vec<Complex<f32>>,
    pub final_output_data: Vec<u8>,

    /// I/Q pairs currently valid in `raw_input_data`.
    pub frames_read: usize,
    /// I/Q pairs currently valid in the last-populated buffer.
    pub frames_to_write: usize,
    /// End-of-stream sentinel; flushed through every stage in order.
    pub is_last_chunk: bool,
    /// Upstream signalled a reset (SDR overrun / driver restart); each
    /// stateful stage resets before processing this chunk's payload.
    pub stream_discontinuity_event: bool,
    /// Carried per chunk so the packet codec is self-contained.
    pub input_bytes_per_sample_pair: usize,
}

impl SampleChunk {
    pub fn new(raw_capacity_bytes: usize, max_out_samples: usize, output_pair_bytes: usize) -> Self {
        Self {
            raw_input_data: vec![0u8; raw_capacity_bytes],
            complex_pre_resample_data: vec![Complex::new(0.0, 0.0); max_out_samples],
            complex_resampled_data: vec![Complex::new(0.0, 0.0); max_out_samples],
            complex_post_resample_data: vec![Complex::new(0.0, 0.0); max_out_samples],
            complex_scratch_data: vec![Complex::new(0.0, 0.0); max_out_samples],
            final_output_data: vec![0u8; max_out_samples * output_pair_bytes],
            frames_read: 0,
            frames_to_write: 0,
            is_last_chunk: false,
            stream_discontinuity_event: false,
            input_bytes_per_sample_pair: 0,
        }
    }

    pub fn raw_capacity_bytes(&self) -> usize {
        self.raw_input_data.len()
    }

    pub fn max_out_samples(&self) -> usize {
        self.complex_pre_resample_data.len()
    }

    /// Clears metadata before the chunk re-enters the free queue; the
    /// buffers keep their storage.
    pub fn reset(&mut self) {
        self.frames_read = 0;
        self.frames_to_write = 0;
        self.is_last_chunk = false;
        self.stream_discontinuity_event = false;
        self.input_bytes_per_sample_pair = 0;
    }
}

/// Build the fixed chunk pool. The sample buffers are the data plane
/// and are sized here once; nothing grows afterwards.
pub fn build_chunk_pool(
    count: usize,
    raw_capacity_bytes: usize,
    max_out_samples: usize,
    output_pair_bytes: usize,
) -> Vec<Box<SampleChunk>> {
    (0..count)
        .map(|_| {
            Box::new(SampleChunk::new(
                raw_capacity_bytes,
                max_out_samples,
                output_pair_bytes,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_sized_at_construction() {
        let chunk = SampleChunk::new(64, 100, 4);
        assert_eq!(chunk.raw_capacity_bytes(), 64);
        assert_eq!(chunk.max_out_samples(), 100);
        assert_eq!(chunk.final_output_data.len(), 400);
    }

    #[test]
    fn reset_clears_metadata_only() {
        let mut chunk = SampleChunk::new(16, 8, 2);
        chunk.frames_read = 4;
        chunk.frames_to_write = 4;
        chunk.is_last_chunk = true;
        chunk.stream_discontinuity_event = true;
        chunk.input_bytes_per_sample_pair = 4;
        chunk.reset();
        assert_eq!(chunk.frames_read, 0);
        assert_eq!(chunk.frames_to_write, 0);
        assert!(!chunk.is_last_chunk);
        assert!(!chunk.stream_discontinuity_event);
        assert_eq!(chunk.raw_capacity_bytes(), 16);
    }

    #[test]
    fn pool_has_requested_count() {
        let pool = build_chunk_pool(4, 8, 8, 2);
        assert_eq!(pool.len(), 4);
    }
}
