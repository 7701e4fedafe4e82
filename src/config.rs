use crate::defaults;
use crate::error::{MicstreamError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub stream: StreamFormat,
    pub device: DeviceConfig,
    pub host: HostConfig,
}

/// Wire format shared by the embedded side and the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub chunk_samples: usize,
}

/// Embedded-side capture and transmit settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub ring_capacity: usize,
    pub channels: u16,
    pub capture_block_ms: u32,
    pub capture_timeout_ms: u64,
    pub capture_backoff_ms: u64,
    pub max_capture_errors: u32,
    pub stats_interval_packets: u64,
    pub level_log_interval_blocks: u64,
    pub notify_queue: usize,
}

/// Host-side reassembly and consumer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub decode_queue: usize,
    pub recorder_queue: usize,
    pub forwarder_queue: usize,
    pub quality_queue: usize,
    pub output_dir: Option<PathBuf>,
    pub transcription_addr: Option<String>,
    pub connect_timeout_ms: u64,
    pub diagnostics_interval_secs: u64,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            chunk_samples: defaults::CHUNK_SAMPLES,
        }
    }
}

impl StreamFormat {
    /// Bytes per wire chunk.
    pub fn chunk_bytes(&self) -> usize {
        defaults::chunk_bytes(self.chunk_samples)
    }

    /// Time covered by one chunk, which is also the transmit period.
    pub fn chunk_period(&self) -> Duration {
        defaults::chunk_period(self.chunk_samples, self.sample_rate)
    }

    /// Nominal chunks per second.
    pub fn chunks_per_second(&self) -> f64 {
        self.sample_rate as f64 / self.chunk_samples.max(1) as f64
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ring_capacity: defaults::RING_CAPACITY,
            channels: 1,
            capture_block_ms: defaults::CAPTURE_BLOCK_MS,
            capture_timeout_ms: defaults::CAPTURE_TIMEOUT_MS,
            capture_backoff_ms: defaults::CAPTURE_BACKOFF_MS,
            max_capture_errors: defaults::MAX_CAPTURE_ERRORS,
            stats_interval_packets: defaults::STATS_INTERVAL_PACKETS,
            level_log_interval_blocks: defaults::LEVEL_LOG_INTERVAL_BLOCKS,
            notify_queue: defaults::NOTIFY_QUEUE,
        }
    }
}

impl DeviceConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn capture_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_backoff_ms)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            decode_queue: defaults::DECODE_QUEUE,
            recorder_queue: defaults::RECORDER_QUEUE,
            forwarder_queue: defaults::FORWARDER_QUEUE,
            quality_queue: defaults::QUALITY_QUEUE,
            output_dir: None,
            transcription_addr: None,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            diagnostics_interval_secs: defaults::DIAGNOSTICS_INTERVAL_SECS,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> MicstreamError {
    MicstreamError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns `MicstreamError::ConfigFileNotFound` if the file is missing
    /// and an error if it contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MicstreamError::ConfigFileNotFound {
                path: path.display().to_string(),
            },
            _ => MicstreamError::Io(e),
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if matches!(
                    e.downcast_ref::<MicstreamError>(),
                    Some(MicstreamError::ConfigFileNotFound { .. })
                ) {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - MICSTREAM_OUTPUT_DIR → host.output_dir
    /// - MICSTREAM_TRANSCRIBE_ADDR → host.transcription_addr
    /// - MICSTREAM_CHUNK_SAMPLES → stream.chunk_samples (ignored if not a number)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("MICSTREAM_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.host.output_dir = Some(PathBuf::from(dir));
        }

        if let Ok(addr) = std::env::var("MICSTREAM_TRANSCRIBE_ADDR")
            && !addr.is_empty()
        {
            self.host.transcription_addr = Some(addr);
        }

        if let Ok(chunk) = std::env::var("MICSTREAM_CHUNK_SAMPLES")
            && let Ok(samples) = chunk.trim().parse::<usize>()
        {
            self.stream.chunk_samples = samples;
        }

        self
    }

    /// Check the values both ends of the link depend on.
    pub fn validate(&self) -> Result<()> {
        let stream = &self.stream;
        if stream.sample_rate == 0 {
            return Err(invalid("stream.sample_rate", "must be positive"));
        }
        if stream.chunk_samples == 0 {
            return Err(invalid("stream.chunk_samples", "must be positive"));
        }
        if stream.chunk_bytes() > defaults::MAX_NOTIFY_PAYLOAD {
            return Err(invalid(
                "stream.chunk_samples",
                format!(
                    "{} bytes per chunk exceeds the {} byte notification limit",
                    stream.chunk_bytes(),
                    defaults::MAX_NOTIFY_PAYLOAD
                ),
            ));
        }
        if stream.chunk_period() < Duration::from_millis(1) {
            return Err(invalid(
                "stream.chunk_samples",
                "chunk period must be at least 1ms",
            ));
        }

        let device = &self.device;
        if device.ring_capacity <= stream.chunk_samples + 1 {
            return Err(invalid(
                "device.ring_capacity",
                format!("must exceed chunk_samples + 1 ({})", stream.chunk_samples + 1),
            ));
        }
        if !(1..=2).contains(&device.channels) {
            return Err(invalid("device.channels", "must be 1 or 2"));
        }
        if device.capture_block_ms == 0 {
            return Err(invalid("device.capture_block_ms", "must be positive"));
        }
        if device.notify_queue == 0 {
            return Err(invalid("device.notify_queue", "must be at least 1"));
        }

        let host = &self.host;
        for (key, value) in [
            ("host.decode_queue", host.decode_queue),
            ("host.recorder_queue", host.recorder_queue),
            ("host.forwarder_queue", host.forwarder_queue),
            ("host.quality_queue", host.quality_queue),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be at least 1"));
            }
        }

        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/micstream/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("micstream").join("config.toml"))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MicstreamError::ConfigParse {
            message: e.to_string(),
        })
    }
}
