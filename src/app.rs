//! Command implementations.
//!
//! `stream` wires the embedded side and the host side together in one
//! process over a loopback notification queue:
//! microphone → ring → paced transmitter → transport → reassembler → sinks

use crate::audio::quality::{
    QualityReport, QualityThresholds, SessionQuality, SessionSummary, analyze,
};
use crate::audio::wav::{read_wav, write_wav};
use crate::config::Config;
use crate::device::driver::{MicrophoneDriver, ToneMicrophone};
use crate::device::streamer::DeviceStreamer;
use crate::device::transport::ChannelTransport;
use crate::device::wav_driver::WavMicrophone;
use crate::diagnostics::{DeviceStats, HostCounters, HostStats, spawn_periodic};
use crate::error::{MicstreamError, Result};
use crate::host::forwarder::TranscriptionForwarder;
use crate::host::pipeline::{HostPipeline, SinkSummary};
use crate::host::quality_sink::QualitySink;
use crate::host::reassembler::ChunkReassembler;
use crate::host::recorder::RecorderSink;
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;

/// Streaming length when neither `--duration` nor `--input` says otherwise.
const DEFAULT_STREAM_DURATION: Duration = Duration::from_secs(10);

/// How long to wait for the device workers after unsubscribing.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options of the `stream` command.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub duration: Option<Duration>,
    pub input: Option<PathBuf>,
    pub tone: f64,
    pub output: Option<PathBuf>,
    pub transcribe: Option<String>,
}

/// Final figures of a `stream` run.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub duration_secs: f64,
    pub output: PathBuf,
    pub device: DeviceStats,
    pub host: HostStats,
    pub quality: SessionSummary,
    pub sinks: Vec<SinkSummary>,
}

/// Result of the `analyze` command.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub file: PathBuf,
    pub sample_rate: u32,
    pub duration_secs: f64,
    pub overall: QualityReport,
    pub chunks: SessionSummary,
}

/// Result of the `decode` command.
#[derive(Debug, Clone, Serialize)]
pub struct DecodeReport {
    pub output: PathBuf,
    pub chunks: u64,
    pub samples: usize,
    pub framing_errors: u64,
    /// Bytes after the last whole chunk.
    pub trailing_bytes: usize,
}

/// Run the stream command: capture → pace → notify → reassemble → sinks.
///
/// # Arguments
/// * `config` - Validated configuration
/// * `options` - Command-line options of the `stream` subcommand
///
/// # Returns
/// The final diagnostics, or an error if a source or sink cannot be set up
pub async fn run_stream(config: Config, options: StreamOptions) -> Result<StreamReport> {
    config.validate()?;
    let format = config.stream;

    let (driver, source_duration) = open_driver(&config, &options)?;
    let duration = options
        .duration
        .or(source_duration)
        .unwrap_or(DEFAULT_STREAM_DURATION);
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(config.host.output_dir.as_deref()));

    let (pipeline, handler) = HostPipeline::start(&config)?;
    pipeline.attach(
        Box::new(RecorderSink::new(Some(output.clone()), format.sample_rate)),
        config.host.recorder_queue,
    )?;
    let quality = QualitySink::new(QualityThresholds::default());
    let quality_session = quality.session();
    pipeline.attach(Box::new(quality), config.host.quality_queue)?;

    let transcribe = options
        .transcribe
        .clone()
        .or_else(|| config.host.transcription_addr.clone());
    if let Some(addr) = transcribe {
        let timeout = Duration::from_millis(config.host.connect_timeout_ms);
        let forwarder = TranscriptionForwarder::connect(&addr, timeout)?;
        pipeline.attach(Box::new(forwarder), config.host.forwarder_queue)?;
    }

    let (transport, notifications) = ChannelTransport::pair(config.device.notify_queue);
    let pump = handler.spawn_pump(notifications)?;
    let streamer =
        DeviceStreamer::new(&config, driver, Arc::new(transport), Handle::current())?;

    let diagnostics_running = Arc::new(AtomicBool::new(true));
    let diagnostics = {
        let streamer = streamer.clone();
        let monitor = pipeline.monitor();
        spawn_periodic(
            Duration::from_secs(config.host.diagnostics_interval_secs.max(1)),
            diagnostics_running.clone(),
            move || {
                let (buffered, capacity) = streamer.ring_fill();
                info!(
                    "[{}] device: {} ring={}/{}",
                    streamer.state(),
                    streamer.stats(),
                    buffered,
                    capacity
                );
                info!("host: {}", monitor.stats());
            },
        )
    };

    info!(
        "Streaming {} Hz mono, {} samples per chunk, for {:?}",
        format.sample_rate, format.chunk_samples, duration
    );
    streamer.on_subscription_changed(true);
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Cannot listen for Ctrl-C: {}", e);
            } else {
                info!("Interrupted");
            }
        }
    }
    streamer.on_subscription_changed(false);

    let waiter = streamer.clone();
    let idle = tokio::task::spawn_blocking(move || waiter.wait_idle(IDLE_TIMEOUT))
        .await
        .map_err(|e| MicstreamError::Other(format!("join error: {}", e)))?;
    if !idle {
        warn!("Device workers still running after {:?}", IDLE_TIMEOUT);
    }

    diagnostics_running.store(false, Ordering::SeqCst);
    if diagnostics.join().is_err() {
        warn!("Diagnostics thread panicked");
    }

    let device = streamer.stats();
    // Last transport sender goes with the streamer; the pump then drains.
    drop(streamer);

    // Consumer figures are gone once the pipeline closes its queues.
    let (host, sinks) = tokio::task::spawn_blocking(move || {
        if pump.join().is_err() {
            warn!("Notification pump panicked");
        }
        let host = pipeline.stats();
        (host, pipeline.stop())
    })
    .await
    .map_err(|e| MicstreamError::Other(format!("join error: {}", e)))?;

    let quality = quality_session
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .summary();

    Ok(StreamReport {
        duration_secs: duration.as_secs_f64(),
        output,
        device,
        host,
        quality,
        sinks,
    })
}

/// Pick the microphone source. Returns the source length for finite sources.
fn open_driver(
    config: &Config,
    options: &StreamOptions,
) -> Result<(Box<dyn MicrophoneDriver>, Option<Duration>)> {
    let rate = config.stream.sample_rate;
    let block_ms = config.device.capture_block_ms;
    match &options.input {
        Some(path) => {
            let mic = WavMicrophone::open(path, rate, block_ms)?;
            let length = mic.duration();
            info!("Replaying {} ({:.1}s)", path.display(), length.as_secs_f64());
            Ok((Box::new(mic), Some(length)))
        }
        None => {
            let mut mic = ToneMicrophone::new(options.tone, rate, block_ms);
            if config.device.channels == 2 {
                mic = mic.with_stereo();
            }
            Ok((Box::new(mic), None))
        }
    }
}

fn default_output_path(dir: Option<&Path>) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let name = format!("micstream-{}.wav", stamp);
    match dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Run the analyze command on a PCM container.
///
/// Chunks are cut at the configured chunk size, so the silent and clipping
/// counts match what a streaming session of the same audio would report.
pub fn run_analyze(config: &Config, file: &Path) -> Result<AnalysisReport> {
    let wav = read_wav(file)?;
    let thresholds = QualityThresholds::default();

    let mut session = SessionQuality::new(thresholds);
    for chunk in wav.samples.chunks(config.stream.chunk_samples.max(1)) {
        session.record(chunk);
    }

    Ok(AnalysisReport {
        file: file.to_path_buf(),
        sample_rate: wav.sample_rate,
        duration_secs: wav.duration_secs(),
        overall: analyze(&wav.samples),
        chunks: session.summary(),
    })
}

/// Run the decode command: raw capture of concatenated payloads → container.
///
/// The capture carries no boundaries, so it is cut every `2 * chunk_samples`
/// bytes. A short tail counts as one framing error.
pub fn run_decode(config: &Config, input: &Path, output: &Path) -> Result<DecodeReport> {
    let raw = std::fs::read(input)?;
    let chunk_bytes = config.stream.chunk_bytes();
    let counters = Arc::new(HostCounters::new());
    let reassembler = ChunkReassembler::new(config.stream.chunk_samples, counters.clone());

    let mut samples = Vec::with_capacity(raw.len() / 2);
    for piece in raw.chunks(chunk_bytes) {
        if let Ok(chunk) = reassembler.accept(piece) {
            samples.extend_from_slice(&chunk.samples);
        }
    }
    write_wav(output, &samples, config.stream.sample_rate)?;

    let stats = counters.snapshot(Vec::new());
    Ok(DecodeReport {
        output: output.to_path_buf(),
        chunks: stats.chunks_accepted,
        samples: samples.len(),
        framing_errors: stats.framing_errors,
        trailing_bytes: raw.len() % chunk_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::encode_wav;
    use crate::protocol::encode_chunk_vec;
    use tempfile::TempDir;

    #[test]
    fn test_default_output_path_uses_dir() {
        let path = default_output_path(Some(Path::new("/tmp/takes")));
        assert!(path.starts_with("/tmp/takes"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));
    }

    #[test]
    fn test_analyze_counts_silent_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("half.wav");
        let mut samples = vec![0i16; 1600];
        samples.extend(std::iter::repeat_n(12_000i16, 1600));
        std::fs::write(&path, encode_wav(&samples, 16000).unwrap()).unwrap();

        let report = run_analyze(&Config::default(), &path).unwrap();

        assert_eq!(report.sample_rate, 16000);
        assert!((report.duration_secs - 0.2).abs() < 1e-9);
        assert_eq!(report.chunks.chunks, 20);
        assert_eq!(report.chunks.silent_chunks, 10);
        assert_eq!(report.chunks.clipping_chunks, 0);
        assert!(!report.overall.is_silent);
    }

    #[test]
    fn test_analyze_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(run_analyze(&Config::default(), &dir.path().join("nope.wav")).is_err());
    }

    #[test]
    fn test_decode_reports_trailing_fragment() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("capture.raw");
        let output = dir.path().join("capture.wav");

        let mut raw = Vec::new();
        for value in 0..3i16 {
            raw.extend(encode_chunk_vec(&[value; 160]));
        }
        raw.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&input, &raw).unwrap();

        let report = run_decode(&Config::default(), &input, &output).unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.samples, 480);
        assert_eq!(report.framing_errors, 1);
        assert_eq!(report.trailing_bytes, 3);

        let decoded = read_wav(&output).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples.len(), 480);
        assert_eq!(decoded.samples[160], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_tone_records_container() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("tone.wav");
        let options = StreamOptions {
            duration: Some(Duration::from_millis(500)),
            tone: 440.0,
            output: Some(output.clone()),
            ..Default::default()
        };

        let report = run_stream(Config::default(), options).await.unwrap();

        assert!(report.device.chunks_sent > 0);
        assert_eq!(report.host.framing_errors, 0);
        assert_eq!(report.sinks.len(), 2);
        assert!(report.quality.chunks > 0);

        let decoded = read_wav(&output).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert!(!decoded.samples.is_empty());
        assert_eq!(decoded.samples.len() % 160, 0);
    }
}
