//! micstream - real-time microphone streaming over a notification link
//!
//! The embedded side captures 16 kHz mono PCM into a ring buffer and paces
//! fixed-size chunks out as notifications. The host side reassembles them and
//! fans them out to independent consumers (recorder, transcription forwarder,
//! quality validator).

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod protocol;

// Composition root
#[cfg(feature = "cli")]
pub mod app;

// Embedded side
pub use device::{
    DeviceStreamer, MicrophoneDriver, NotificationTransport, SampleRing, SessionState,
};

// Host side
pub use host::{
    ChunkSink, DecodedChunk, FanOutDistributor, HostPipeline, NotificationHandler, SinkError,
};

// Error handling
pub use error::{MicstreamError, Result};

// Config
pub use config::{Config, StreamFormat};

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
