//! Off-path I/Q optimization worker.
//!
//! The PreProcessor periodically forwards a copy of a post-correction
//! sample block; this worker accumulates those blocks, estimates updated
//! correction factors, and publishes them for the PreProcessor's
//! lock-free reads. Block buffers are preallocated and recycled through
//! a return channel so the forwarding path never allocates; when no
//! spare buffer is available the block is simply skipped.

use crossbeam::channel::{bounded, Receiver, Sender};
use num_complex::Complex;
use std::sync::Arc;

use crate::config::IQ_CORRECTION_FFT_SIZE;
use crate::dsp::{IqCorrectionState, IqEstimator};

/// Number of preallocated forwarding buffers in flight.
const FORWARD_BUFFERS: usize = 4;

pub(crate) struct IqForwarder {
    block_tx: Sender<Vec<Complex<f32>>>,
    spare_rx: Receiver<Vec<Complex<f32>>>,
}

impl IqForwarder {
    /// Lossy, non-blocking forward of up to one FFT frame of samples.
    pub fn forward(&self, samples: &[Complex<f32>]) {
        let Ok(mut buffer) = self.spare_rx.try_recv() else {
            return;
        };
        buffer.clear();
        let take = samples.len().min(IQ_CORRECTION_FFT_SIZE);
        buffer.extend_from_slice(&samples[..take]);
        let _ = self.block_tx.try_send(buffer);
    }
}

pub(crate) struct IqWorkerChannels {
    block_rx: Receiver<Vec<Complex<f32>>>,
    spare_tx: Sender<Vec<Complex<f32>>>,
}

/// Build the forwarding channel pair with its preallocated buffers.
pub(crate) fn forwarding_channels() -> (IqForwarder, IqWorkerChannels) {
    let (block_tx, block_rx) = bounded(FORWARD_BUFFERS);
    let (spare_tx, spare_rx) = bounded(FORWARD_BUFFERS);
    for _ in 0..FORWARD_BUFFERS {
        spare_tx
            .send(Vec::with_capacity(IQ_CORRECTION_FFT_SIZE))
            .expect("spare channel sized for the buffer pool");
    }
    (
        IqForwarder { block_tx, spare_rx },
        IqWorkerChannels { block_rx, spare_tx },
    )
}

/// Worker body. Exits when the PreProcessor drops its forwarder.
pub(crate) fn run_iq_worker(
    state: Arc<IqCorrectionState>,
    channels: IqWorkerChannels,
    mut estimator: IqEstimator,
) {
    while let Ok(buffer) = channels.block_rx.recv() {
        estimator.feed(&state, &buffer);
        // Hand the buffer back; if the forwarder is gone, we are done.
        if channels.spare_tx.send(buffer).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_skips_when_out_of_buffers() {
        let (forwarder, channels) = forwarding_channels();
        let block = vec![Complex::new(0.1f32, 0.0); 64];
        for _ in 0..FORWARD_BUFFERS {
            forwarder.forward(&block);
        }
        // All spares are in flight now; this one is dropped silently.
        forwarder.forward(&block);
        let mut delivered = 0;
        while channels.block_rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, FORWARD_BUFFERS);
    }

    #[test]
    fn worker_exits_when_forwarder_dropped() {
        let (forwarder, channels) = forwarding_channels();
        let state = IqCorrectionState::new();
        let handle = std::thread::spawn(move || {
            run_iq_worker(state, channels, IqEstimator::new());
        });
        drop(forwarder);
        handle.join().unwrap();
    }
}
