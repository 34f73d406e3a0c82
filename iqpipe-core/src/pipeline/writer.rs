//! Writer stage: drains the output ring to the container writer, or
//! emits chunks to stdout in binary mode.

use std::io::Write;
use std::sync::Arc;

use crate::errors::{IqPipeError, SinkError};
use crate::io::output::FileWriter;
use crate::pipeline::AppResources;

/// File-output worker: pulls up to 1 MiB at a time from the output
/// ring into its scratch buffer and hands it to the container writer.
/// EOF (ring closed and drained) finalizes the container.
pub(crate) fn run_file_writer(
    resources: Arc<AppResources>,
    mut writer: Box<dyn FileWriter>,
    mut scratch: Vec<u8>,
) {
    let Some(ring) = &resources.write_ring else {
        return;
    };
    loop {
        let n = ring.read(&mut scratch);
        if n == 0 {
            break;
        }
        if let Err(e) = writer.write(&scratch[..n]) {
            resources
                .logger
                .error("output write failed", Some(e.to_string()));
            resources.fail_with(e);
            return;
        }
    }
    match writer.close() {
        Ok(()) => {
            resources.set_bytes_written(writer.total_bytes_written());
        }
        Err(e) => {
            resources
                .logger
                .error("output finalize failed", Some(e.to_string()));
            resources.fail_with(e);
        }
    }
}

/// Stdout worker: dequeues converted chunks, writes their payload to
/// stdout in binary, and recycles them. Back-pressure is intentional;
/// downstream consumers expect real-time flow.
pub(crate) fn run_stdout_writer(resources: Arc<AppResources>) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let mut total: u64 = 0;
    while let Some(mut chunk) = resources.stdout_queue.dequeue() {
        let bytes = if resources.raw_passthrough {
            chunk.frames_read * chunk.input_bytes_per_sample_pair
        } else {
            chunk.frames_to_write * resources.output_pair_bytes
        };
        let last = chunk.is_last_chunk;
        let result = handle.write_all(&chunk.final_output_data[..bytes]);
        chunk.reset();
        let _ = resources.free_chunks.enqueue(chunk);
        match result {
            Ok(()) => total += bytes as u64,
            Err(e) => {
                let err = IqPipeError::Sink(SinkError::WriteFailed {
                    bytes_written: total,
                    reason: e.to_string(),
                });
                resources
                    .logger
                    .error("stdout write failed", Some(err.to_string()));
                resources.fail_with(err);
                return;
            }
        }
        if last {
            break;
        }
    }
    let _ = handle.flush();
    resources.set_bytes_written(total);
}
