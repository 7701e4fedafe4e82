//! Default configuration constants for micstream.
//!
//! The embedded side and the host side must agree on the chunk size and the
//! sample rate. A mismatch is a protocol error: every payload fails the
//! host's length check and is dropped.

use std::time::Duration;

/// Nominal audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per wire chunk.
///
/// 160 samples at 16kHz is one chunk every 10ms, 320 bytes per notification.
pub const CHUNK_SAMPLES: usize = 160;

/// Bytes per 16-bit sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Largest notification payload the radio stack accepts (ATT attribute limit).
pub const MAX_NOTIFY_PAYLOAD: usize = 512;

/// Ring buffer slot count. One slot stays empty, so 8191 samples are usable.
pub const RING_CAPACITY: usize = 8192;

/// Duration of one microphone driver block.
pub const CAPTURE_BLOCK_MS: u32 = 100;

/// Bounded wait for a microphone block before yielding.
pub const CAPTURE_TIMEOUT_MS: u64 = 100;

/// Pause after a driver error before the next read.
pub const CAPTURE_BACKOFF_MS: u64 = 10;

/// Consecutive driver failures before the capture producer idles.
pub const MAX_CAPTURE_ERRORS: u32 = 10;

/// Transmit statistics are logged every this many packets.
pub const STATS_INTERVAL_PACKETS: u64 = 200;

/// Send failures are logged every this many errors.
pub const ERROR_LOG_INTERVAL: u64 = 10;

/// Microphone level is logged every this many capture blocks.
pub const LEVEL_LOG_INTERVAL_BLOCKS: u64 = 50;

/// Framing errors are logged on the first and then every this many.
pub const FRAMING_LOG_INTERVAL: u64 = 100;

/// Chunks with `max - min` below this are classified silent.
pub const SILENCE_RANGE: i32 = 200;

/// Samples whose magnitude exceeds this are near full scale.
pub const CLIPPING_LEVEL: i32 = 30000;

/// Tolerated deviation between the nominal and the measured sample rate.
pub const RATE_TOLERANCE: f64 = 0.10;

/// Advertised device name.
pub const DEVICE_NAME: &str = "AudioStreamer";

/// Custom audio service identifier.
pub const AUDIO_SERVICE_UUID: &str = "12345678-1234-5678-1234-567812345678";

/// Audio data characteristic. Enabling notifications here starts a session.
pub const AUDIO_DATA_CHAR_UUID: &str = "12345679-1234-5678-1234-567812345678";

/// Depth of the radio's outgoing notification queue.
pub const NOTIFY_QUEUE: usize = 32;

/// Host queue between the notification callback and the distributor.
pub const DECODE_QUEUE: usize = 64;

/// Recorder consumer queue (about 20s of chunks).
pub const RECORDER_QUEUE: usize = 2048;

/// Transcription forwarder queue (about 2.5s of chunks).
pub const FORWARDER_QUEUE: usize = 256;

/// Quality monitor queue.
pub const QUALITY_QUEUE: usize = 256;

/// Connect timeout for the transcription endpoint.
pub const CONNECT_TIMEOUT_MS: u64 = 3000;

/// Interval between periodic diagnostics log lines.
pub const DIAGNOSTICS_INTERVAL_SECS: u64 = 5;

/// Number of bytes a chunk of `chunk_samples` occupies on the wire.
pub const fn chunk_bytes(chunk_samples: usize) -> usize {
    chunk_samples * BYTES_PER_SAMPLE
}

/// Transmit period for one chunk at the given rate.
pub fn chunk_period(chunk_samples: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos(chunk_samples as u64 * 1_000_000_000 / sample_rate.max(1) as u64)
}
