//! Canonical 16-bit mono PCM container.
//!
//! Encoding is hand-rolled so the 44-byte header is byte-for-byte
//! deterministic. Decoding goes through `hound`, which accepts anything
//! standard tooling produces (extra chunks, stereo, other rates).

use crate::error::{MicstreamError, Result};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Size of the canonical header.
pub const WAV_HEADER_LEN: usize = 44;

/// Samples and rate recovered from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedWav {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl DecodedWav {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

/// `(RIFF size, data size)` header fields for `sample_count` mono samples.
///
/// Both are 32-bit, so recordings past roughly 4 GiB are rejected.
fn chunk_sizes(sample_count: usize) -> Result<(u32, u32)> {
    let too_long = || MicstreamError::Container {
        message: format!(
            "{} samples exceed the 32-bit size fields of the header",
            sample_count
        ),
    };
    let data_len = sample_count
        .checked_mul(2)
        .and_then(|bytes| u32::try_from(bytes).ok())
        .ok_or_else(too_long)?;
    let riff_len = data_len
        .checked_add((WAV_HEADER_LEN - 8) as u32)
        .ok_or_else(too_long)?;
    Ok((riff_len, data_len))
}

/// Serialize mono samples into a 44-byte header plus raw little-endian data.
///
/// # Errors
/// Returns `MicstreamError::Container` if the data does not fit the header's
/// 32-bit size fields or the byte rate overflows.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate
        .checked_mul(block_align as u32)
        .ok_or_else(|| MicstreamError::Container {
            message: format!("sample rate {} overflows the byte rate field", sample_rate),
        })?;
    let (riff_len, data_len) = chunk_sizes(samples.len())?;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(out)
}

/// Encode and write a container, creating parent directories as needed.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, encode_wav(samples, sample_rate)?)?;
    Ok(())
}

/// Parse a 16-bit PCM container from any reader, downmixing to mono.
pub fn decode_wav<R: Read>(reader: R) -> Result<DecodedWav> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| MicstreamError::Container {
        message: format!("Failed to parse WAV data: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(MicstreamError::Container {
            message: format!(
                "unsupported sample format: {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let raw: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| MicstreamError::Container {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    Ok(DecodedWav {
        sample_rate: spec.sample_rate,
        samples: crate::device::driver::downmix(&raw, spec.channels),
    })
}

/// Read and parse a container file.
pub fn read_wav(path: &Path) -> Result<DecodedWav> {
    let file = fs::File::open(path).map_err(|e| MicstreamError::Container {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;
    decode_wav(std::io::BufReader::new(file))
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            match samples.get(source_idx + 1) {
                Some(&next) => {
                    let left = samples[source_idx] as f64;
                    (left + (next as f64 - left) * fraction) as i16
                }
                None => samples[source_idx],
            }
        })
        .collect()
}
