//! Self-describing packet layer over the SDR input ring.
//!
//! The capture thread writes packets in whatever layout the hardware
//! emits (interleaved for RTL-SDR/HackRF/BladeRF style drivers, separate
//! i16 I and Q planes for SDRplay style drivers); the Reader always gets
//! back a uniform interleaved frame stream plus in-band reset events.
//!
//! Wire layout, little-endian: `u32 num_samples || u8 flags`, then the
//! payload. Interleaved payloads are `num_samples * pair_bytes` bytes;
//! de-interleaved payloads are two planes of `num_samples * 2` bytes
//! (i16 I plane, then Q plane). Reset events carry no payload and
//! `num_samples == 0`.

use crate::config::BASE_SAMPLES;
use crate::errors::PipelineError;
use crate::logging::PipelineLogger;
use crate::pipeline::chunk::SampleChunk;
use crate::pipeline::ring::ByteRing;

pub const SDR_PACKET_HEADER_BYTES: usize = 5;
pub const PACKET_FLAG_INTERLEAVED: u8 = 0x01;
pub const PACKET_FLAG_STREAM_RESET: u8 = 0x02;

fn encode_header(num_samples: u32, flags: u8) -> [u8; SDR_PACKET_HEADER_BYTES] {
    let n = num_samples.to_le_bytes();
    [n[0], n[1], n[2], n[3], flags]
}

/// Write an interleaved-sample packet. Returns `false` (nothing stored)
/// when the whole packet does not fit; the caller counts the drop.
pub fn write_interleaved_packet(ring: &ByteRing, payload: &[u8], num_samples: u32) -> bool {
    let header = encode_header(num_samples, PACKET_FLAG_INTERLEAVED);
    ring.try_write_vectored(&[&header, payload])
}

/// Write a de-interleaved packet from two equal-length i16 plane byte
/// buffers (already little-endian). Returns `false` on drop.
pub fn write_deinterleaved_packet(ring: &ByteRing, i_plane: &[u8], q_plane: &[u8]) -> bool {
    debug_assert_eq!(i_plane.len(), q_plane.len());
    debug_assert_eq!(i_plane.len() % 2, 0);
    let num_samples = (i_plane.len() / 2) as u32;
    let header = encode_header(num_samples, 0);
    ring.try_write_vectored(&[&header, i_plane, q_plane])
}

/// Write a stream-reset event packet. Returns `false` on drop.
pub fn write_reset_event(ring: &ByteRing) -> bool {
    let header = encode_header(0, PACKET_FLAG_STREAM_RESET);
    ring.try_write_vectored(&[&header])
}

/// Outcome of one `read_packet` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Ring closed by the writer and fully drained.
    Eof,
    /// In-band discontinuity event; no payload.
    ResetEvent,
    /// Interleaved frames were placed in `raw_input_data`.
    Frames(usize),
}

/// Fill `buf` completely from the ring. `Ok(false)` means a clean EOF
/// (or shutdown) before the first byte; an EOF in the middle of the
/// structure is the caller's parse error.
fn read_exact(ring: &ByteRing, buf: &mut [u8]) -> Result<bool, PipelineError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = ring.read(&mut buf[filled..]);
        if n == 0 {
            if filled == 0 || ring.is_shut_down() {
                return Ok(false);
            }
            return Err(PipelineError::CorruptSdrStream {
                reason: format!("stream ended {} bytes into a structure", filled),
            });
        }
        filled += n;
    }
    Ok(true)
}

/// Discard `count` bytes from the ring (payload re-sync after a
/// truncated oversized packet).
fn skip_bytes(ring: &ByteRing, mut count: usize) -> Result<(), PipelineError> {
    let mut scratch = [0u8; 4096];
    while count > 0 {
        let take = count.min(scratch.len());
        if !read_exact(ring, &mut scratch[..take])? {
            return Err(PipelineError::CorruptSdrStream {
                reason: "stream ended while skipping truncated payload".to_string(),
            });
        }
        count -= take;
    }
    Ok(())
}

/// Read the next packet into `chunk.raw_input_data`, always producing
/// interleaved frames. `pair_bytes` is the interleaved frame width of
/// the configured input format; de-interleaved packets are i16 planes
/// and therefore require `pair_bytes == 4`. `temp` is the caller's
/// re-interleave scratch and must hold at least `BASE_SAMPLES * 2`
/// bytes; interleaved payloads bypass it entirely.
///
/// Packets longer than `BASE_SAMPLES` are truncated with a warning and
/// the excess payload is discarded to re-sync the stream.
pub fn read_packet(
    ring: &ByteRing,
    chunk: &mut SampleChunk,
    pair_bytes: usize,
    temp: &mut [u8],
    logger: &PipelineLogger,
) -> Result<ReadOutcome, PipelineError> {
    let mut header = [0u8; SDR_PACKET_HEADER_BYTES];
    if !read_exact(ring, &mut header)? {
        return Ok(ReadOutcome::Eof);
    }
    let num_samples = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let flags = header[4];

    if flags & PACKET_FLAG_STREAM_RESET != 0 {
        if num_samples != 0 {
            return Err(PipelineError::CorruptSdrStream {
                reason: format!("reset event with num_samples={}", num_samples),
            });
        }
        return Ok(ReadOutcome::ResetEvent);
    }

    let frames = num_samples.min(BASE_SAMPLES);
    let truncated = num_samples - frames;
    if truncated > 0 {
        logger.warn(format!(
            "oversized SDR packet: {} samples, truncating to {}",
            num_samples, BASE_SAMPLES
        ));
    }

    if flags & PACKET_FLAG_INTERLEAVED != 0 {
        let want = frames * pair_bytes;
        if !read_exact(ring, &mut chunk.raw_input_data[..want])? {
            if ring.is_shut_down() {
                return Ok(ReadOutcome::Eof);
            }
            return Err(PipelineError::CorruptSdrStream {
                reason: "stream ended inside an interleaved payload".to_string(),
            });
        }
        skip_bytes(ring, truncated * pair_bytes)?;
        chunk.frames_read = frames;
        chunk.input_bytes_per_sample_pair = pair_bytes;
        return Ok(ReadOutcome::Frames(frames));
    }

    // De-interleaved: i16 I plane then i16 Q plane.
    if pair_bytes != 4 {
        return Err(PipelineError::CorruptSdrStream {
            reason: format!(
                "de-interleaved packet but configured pair width is {} bytes",
                pair_bytes
            ),
        });
    }
    debug_assert!(temp.len() >= BASE_SAMPLES * 2);
    let plane = frames * 2;
    if !read_exact(ring, &mut temp[..plane])? {
        if ring.is_shut_down() {
            return Ok(ReadOutcome::Eof);
        }
        return Err(PipelineError::CorruptSdrStream {
            reason: "stream ended inside an I plane".to_string(),
        });
    }
    skip_bytes(ring, truncated * 2)?;
    if !read_exact(ring, &mut chunk.raw_input_data[..plane])? {
        return Err(PipelineError::CorruptSdrStream {
            reason: "stream ended inside a Q plane".to_string(),
        });
    }
    skip_bytes(ring, truncated * 2)?;

    // Interleave in place, back to front: the I plane sits in `temp`,
    // the Q plane occupies the low half of the destination buffer, and
    // writing pair k at 4k never clobbers a Q value still to be read.
    let raw = &mut chunk.raw_input_data;
    for k in (0..frames).rev() {
        let q0 = raw[2 * k];
        let q1 = raw[2 * k + 1];
        raw[4 * k] = temp[2 * k];
        raw[4 * k + 1] = temp[2 * k + 1];
        raw[4 * k + 2] = q0;
        raw[4 * k + 3] = q1;
    }
    chunk.frames_read = frames;
    chunk.input_bytes_per_sample_pair = 4;
    Ok(ReadOutcome::Frames(frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chunk() -> SampleChunk {
        SampleChunk::new(BASE_SAMPLES * 4, BASE_SAMPLES, 4)
    }

    fn le_planes(pairs: &[(i16, i16)]) -> (Vec<u8>, Vec<u8>) {
        let mut i_plane = Vec::new();
        let mut q_plane = Vec::new();
        for &(i, q) in pairs {
            i_plane.extend_from_slice(&i.to_le_bytes());
            q_plane.extend_from_slice(&q.to_le_bytes());
        }
        (i_plane, q_plane)
    }

    #[test]
    fn interleaved_roundtrip() {
        let ring = ByteRing::new(1 << 16);
        let logger = PipelineLogger::disabled();
        let payload: Vec<u8> = (0..32u8).collect();
        assert!(write_interleaved_packet(&ring, &payload, 8));
        ring.close();

        let mut chunk = test_chunk();
        let mut temp = vec![0u8; BASE_SAMPLES * 2];
        let outcome = read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap();
        assert_eq!(outcome, ReadOutcome::Frames(8));
        assert_eq!(&chunk.raw_input_data[..32], &payload[..]);
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::Eof
        );
    }

    #[test]
    fn deinterleaved_is_reinterleaved() {
        let ring = ByteRing::new(1 << 16);
        let logger = PipelineLogger::disabled();
        let pairs = [(1i16, -1i16), (2, -2), (3, -3), (1000, -1000)];
        let (i_plane, q_plane) = le_planes(&pairs);
        assert!(write_deinterleaved_packet(&ring, &i_plane, &q_plane));
        ring.close();

        let mut chunk = test_chunk();
        let mut temp = vec![0u8; BASE_SAMPLES * 2];
        let outcome = read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap();
        assert_eq!(outcome, ReadOutcome::Frames(4));
        for (k, &(i, q)) in pairs.iter().enumerate() {
            let b = &chunk.raw_input_data[4 * k..4 * k + 4];
            assert_eq!(i16::from_le_bytes([b[0], b[1]]), i);
            assert_eq!(i16::from_le_bytes([b[2], b[3]]), q);
        }
    }

    #[test]
    fn reset_event_roundtrip() {
        let ring = ByteRing::new(64);
        let logger = PipelineLogger::disabled();
        assert!(write_reset_event(&ring));
        ring.close();
        let mut chunk = test_chunk();
        let mut temp = vec![0u8; BASE_SAMPLES * 2];
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::ResetEvent
        );
    }

    #[test]
    fn mixed_sequence_preserves_order() {
        let ring = ByteRing::new(1 << 20);
        let logger = PipelineLogger::disabled();
        let payload: Vec<u8> = vec![7; 16];
        assert!(write_interleaved_packet(&ring, &payload, 4));
        assert!(write_reset_event(&ring));
        let (i_plane, q_plane) = le_planes(&[(5, 6), (7, 8)]);
        assert!(write_deinterleaved_packet(&ring, &i_plane, &q_plane));
        ring.close();

        let mut chunk = test_chunk();
        let mut temp = vec![0u8; BASE_SAMPLES * 2];
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::Frames(4)
        );
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::ResetEvent
        );
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::Frames(2)
        );
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::Eof
        );
    }

    #[test]
    fn oversized_packet_truncates_and_resyncs() {
        let ring = ByteRing::new(1 << 20);
        let logger = PipelineLogger::disabled();
        let oversized = BASE_SAMPLES + 100;
        let payload = vec![0xABu8; oversized * 4];
        assert!(write_interleaved_packet(&ring, &payload, oversized as u32));
        // A second, normal packet must still parse after the re-sync.
        assert!(write_interleaved_packet(&ring, &[1, 2, 3, 4], 1));
        ring.close();

        let mut chunk = test_chunk();
        let mut temp = vec![0u8; BASE_SAMPLES * 2];
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::Frames(BASE_SAMPLES)
        );
        assert_eq!(
            read_packet(&ring, &mut chunk, 4, &mut temp, &logger).unwrap(),
            ReadOutcome::Frames(1)
        );
        assert_eq!(&chunk.raw_input_data[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn torn_payload_is_a_parse_error() {
        let ring = ByteRing::new(1 << 12);
        let logger = PipelineLogger::disabled();
        let header = encode_header(8, PACKET_FLAG_INTERLEAVED);
        ring.write(&header);
        ring.write(&[0u8; 10]); // 10 of the 32 payload bytes
        ring.close();

        let mut chunk = test_chunk();
        let mut temp = vec![0u8; BASE_SAMPLES * 2];
        assert!(read_packet(&ring, &mut chunk, 4, &mut temp, &logger).is_err());
    }

    #[test]
    fn full_ring_drops_whole_packet() {
        let ring = ByteRing::new(32);
        assert!(write_interleaved_packet(&ring, &[0u8; 16], 4));
        assert!(!write_interleaved_packet(&ring, &[0u8; 16], 4));
        // 21 bytes stored: one header plus one payload.
        assert_eq!(ring.len(), 21);
    }
}
