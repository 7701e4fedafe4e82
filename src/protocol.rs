//! Wire format for audio notifications.
//!
//! A payload is exactly `2 * chunk_samples` bytes of little-endian signed
//! 16-bit mono samples. There is no header, no sequence number and no
//! checksum: the length is the only thing the receiver can check.

use crate::defaults::BYTES_PER_SAMPLE;
use crate::error::{MicstreamError, Result};

pub use crate::defaults::chunk_bytes;

/// Serialize `samples` into `out` as little-endian bytes.
///
/// `out` must hold exactly `2 * samples.len()` bytes.
pub fn encode_chunk(samples: &[i16], out: &mut [u8]) -> Result<()> {
    let expected = samples.len() * BYTES_PER_SAMPLE;
    if out.len() != expected {
        return Err(MicstreamError::Framing {
            expected,
            actual: out.len(),
        });
    }
    for (sample, bytes) in samples.iter().zip(out.chunks_exact_mut(BYTES_PER_SAMPLE)) {
        bytes.copy_from_slice(&sample.to_le_bytes());
    }
    Ok(())
}

/// Serialize samples into a freshly allocated payload.
pub fn encode_chunk_vec(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode a payload that must carry exactly `chunk_samples` samples.
pub fn decode_chunk(payload: &[u8], chunk_samples: usize) -> Result<Vec<i16>> {
    let expected = chunk_bytes(chunk_samples);
    if payload.len() != expected {
        return Err(MicstreamError::Framing {
            expected,
            actual: payload.len(),
        });
    }
    Ok(payload
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}
