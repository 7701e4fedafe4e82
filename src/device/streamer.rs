//! Embedded-side composition root.
//!
//! Owns the ring, the session and the counters for the life of the process
//! and reacts to subscription changes from the radio stack.

use crate::config::{Config, DeviceConfig, StreamFormat};
use crate::device::capture::{CaptureProducer, SharedDriver};
use crate::device::driver::MicrophoneDriver;
use crate::device::ring_buffer::SampleRing;
use crate::device::session::{Session, SessionState, StartOutcome, StopOutcome, WorkerExit};
use crate::device::transmitter::PacedTransmitter;
use crate::device::transport::NotificationTransport;
use crate::diagnostics::{DeviceCounters, DeviceStats};
use crate::error::Result;
use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;

/// Capture producer plus paced transmitter.
const WORKERS: usize = 2;

struct StreamerShared {
    format: StreamFormat,
    config: DeviceConfig,
    ring: Arc<SampleRing>,
    session: Arc<Session>,
    counters: Arc<DeviceCounters>,
    driver: SharedDriver,
    transport: Arc<dyn NotificationTransport>,
    runtime: Handle,
}

/// Streams microphone audio as paced notifications while the host is
/// subscribed. Clones share the same session.
#[derive(Clone)]
pub struct DeviceStreamer {
    shared: Arc<StreamerShared>,
}

impl DeviceStreamer {
    /// `runtime` hosts the paced transmitter task.
    ///
    /// # Errors
    /// Returns `MicstreamError::ConfigInvalidValue` if `config` does not validate.
    pub fn new(
        config: &Config,
        driver: Box<dyn MicrophoneDriver>,
        transport: Arc<dyn NotificationTransport>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let shared = StreamerShared {
            format: config.stream,
            config: config.device.clone(),
            ring: Arc::new(SampleRing::new(config.device.ring_capacity)),
            session: Arc::new(Session::new()),
            counters: Arc::new(DeviceCounters::new()),
            driver: Arc::new(Mutex::new(driver)),
            transport,
            runtime,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// The host enabled or disabled notifications on the audio
    /// characteristic.
    pub fn on_subscription_changed(&self, enabled: bool) {
        if enabled {
            match self.shared.session.request_start(WORKERS) {
                StartOutcome::Begin => begin_session(&self.shared),
                StartOutcome::AlreadyActive => warn!("Streaming already active"),
                StartOutcome::RestartQueued => {
                    info!("Previous session still stopping, restart queued")
                }
            }
        } else {
            self.stop("notifications disabled");
        }
    }

    /// The link dropped. Same as an unsubscribe.
    pub fn on_disconnect(&self) {
        self.stop("disconnected");
    }

    fn stop(&self, reason: &str) {
        match self.shared.session.request_stop() {
            StopOutcome::Stopping => info!("Stopping stream: {}", reason),
            StopOutcome::AlreadyStopping => {}
            StopOutcome::AlreadyIdle => warn!("Streaming already stopped"),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.session.state()
    }

    pub fn stats(&self) -> DeviceStats {
        self.shared.counters.snapshot()
    }

    /// `(buffered, usable capacity)` of the sample ring.
    pub fn ring_fill(&self) -> (usize, usize) {
        let ring = &self.shared.ring;
        (ring.available(), ring.usable_capacity())
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.format
    }

    /// Block until both workers have exited. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared
            .session
            .wait_for(timeout, |s| s == SessionState::Idle)
    }

    /// Block until the driver is up. Returns false on timeout.
    pub fn wait_streaming(&self, timeout: Duration) -> bool {
        self.shared
            .session
            .wait_for(timeout, |s| s == SessionState::Streaming)
    }
}

/// Re-arm shared state and spawn both workers. The session is `Starting`.
fn begin_session(shared: &Arc<StreamerShared>) {
    shared.ring.reset();
    shared.counters.reset();
    info!(
        "Streaming started: {} samples per chunk every {:?}",
        shared.format.chunk_samples,
        shared.format.chunk_period()
    );

    let producer = CaptureProducer::new(
        shared.driver.clone(),
        shared.ring.clone(),
        shared.counters.clone(),
        shared.session.clone(),
        &shared.config,
    );
    let capture_shared = shared.clone();
    let spawned = thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let _exit = WorkerGuard(capture_shared);
            producer.run();
        });
    if let Err(e) = spawned {
        error!("Failed to spawn capture thread: {}", e);
        shared.session.request_stop();
        worker_exited(shared);
    }

    let transmitter = PacedTransmitter::new(
        shared.format,
        &shared.config,
        shared.ring.clone(),
        shared.counters.clone(),
        shared.transport.clone(),
    );
    let session = shared.session.clone();
    let exit = WorkerGuard(shared.clone());
    shared.runtime.spawn(async move {
        let _exit = exit;
        transmitter.run(session).await;
    });
}

/// Releases one worker slot when dropped, including during a panic unwind.
struct WorkerGuard(Arc<StreamerShared>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Streaming worker panicked, releasing its session slot");
        }
        worker_exited(&self.0);
    }
}

fn worker_exited(shared: &Arc<StreamerShared>) {
    match shared.session.worker_exited(WORKERS) {
        WorkerExit::Pending => {}
        WorkerExit::Idle => {
            let stats = shared.counters.snapshot();
            info!("Streaming stopped: {}", stats);
        }
        WorkerExit::Restart => {
            info!("Restarting queued session");
            begin_session(shared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::driver::MockMicrophone;
    use crate::device::transport::MockTransport;
    use crate::error::MicstreamError;
    use std::sync::atomic::Ordering;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.device.capture_timeout_ms = 2;
        config.device.capture_backoff_ms = 1;
        config.device.max_capture_errors = 3;
        config
    }

    fn streamer(mic: MockMicrophone) -> (DeviceStreamer, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let streamer = DeviceStreamer::new(
            &test_config(),
            Box::new(mic),
            transport.clone(),
            Handle::current(),
        )
        .unwrap();
        (streamer, transport)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_streams_chunks() {
        let mic = MockMicrophone::new().with_repeating_block(vec![500; 1600]);
        let (streamer, transport) = streamer(mic);

        streamer.on_subscription_changed(true);
        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        streamer.on_subscription_changed(false);
        assert!(streamer.wait_idle(Duration::from_secs(2)));

        assert!(transport.sent_count() > 0);
        assert!(transport.sent().iter().all(|p| p.bytes.len() == 320));
        assert_eq!(streamer.stats().chunks_sent as usize, transport.sent_count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_subscribe_keeps_counters_and_cursors() {
        // One block shorter than a chunk, then silence: the transmitter
        // underruns every tick and the cursors stay put.
        let mic = MockMicrophone::new().with_blocks(vec![vec![1; 100]]);
        let probe = mic.probe();
        let (streamer, transport) = streamer(mic);

        streamer.on_subscription_changed(true);
        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while streamer.stats().samples_captured < 100 {
            assert!(std::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let cursors = streamer.shared.ring.cursors();
        let before = streamer.stats();
        streamer.on_subscription_changed(true);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cursors, (100, 0));
        assert_eq!(streamer.shared.ring.cursors(), cursors);
        assert_eq!(streamer.state(), SessionState::Streaming);
        assert_eq!(probe.start_calls.load(Ordering::SeqCst), 1);
        let after = streamer.stats();
        assert_eq!(after.capture_blocks, before.capture_blocks);
        assert_eq!(after.samples_captured, before.samples_captured);
        assert_eq!(after.chunks_sent, 0);
        assert_eq!(transport.attempts(), 0);

        streamer.on_disconnect();
        assert!(streamer.wait_idle(Duration::from_secs(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_resets_counters() {
        let mic = MockMicrophone::new().with_repeating_block(vec![1; 1600]);
        let probe = mic.probe();
        let (streamer, _transport) = streamer(mic);

        streamer.on_subscription_changed(true);
        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        streamer.on_subscription_changed(false);
        assert!(streamer.wait_idle(Duration::from_secs(2)));
        assert!(streamer.stats().capture_blocks > 0);
        assert!(!probe.started.load(Ordering::SeqCst));

        streamer.on_subscription_changed(true);
        // Counters are zeroed before the new workers run.
        assert!(streamer.stats().chunks_sent <= 1);
        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        assert_eq!(probe.start_calls.load(Ordering::SeqCst), 2);

        streamer.on_subscription_changed(false);
        assert!(streamer.wait_idle(Duration::from_secs(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_while_stopping_restarts() {
        let mic = MockMicrophone::new().with_repeating_block(vec![1; 1600]);
        let probe = mic.probe();
        let (streamer, _transport) = streamer(mic);

        streamer.on_subscription_changed(true);
        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        streamer.on_subscription_changed(false);
        streamer.on_subscription_changed(true);

        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        assert_eq!(probe.start_calls.load(Ordering::SeqCst), 2);

        streamer.on_disconnect();
        assert!(streamer.wait_idle(Duration::from_secs(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsubscribe_when_idle_is_harmless() {
        let (streamer, transport) = streamer(MockMicrophone::new());
        streamer.on_subscription_changed(false);
        streamer.on_disconnect();
        assert_eq!(streamer.state(), SessionState::Idle);
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_persistent_start_failure_sends_nothing() {
        let mic = MockMicrophone::new().with_start_failures(u32::MAX);
        let (streamer, transport) = streamer(mic);

        streamer.on_subscription_changed(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(streamer.state(), SessionState::Starting);
        assert_eq!(transport.attempts(), 0);

        streamer.on_subscription_changed(false);
        assert!(streamer.wait_idle(Duration::from_secs(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.stream.chunk_samples = 0;
        let result = DeviceStreamer::new(
            &config,
            Box::new(MockMicrophone::new()),
            MockTransport::new(),
            Handle::current(),
        );
        assert!(matches!(
            result,
            Err(MicstreamError::ConfigInvalidValue { ref key, .. }) if key == "stream.chunk_samples"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capture_panic_releases_session() {
        let mic = MockMicrophone::new()
            .with_read_panic()
            .with_repeating_block(vec![1; 1600]);
        let probe = mic.probe();
        let (streamer, transport) = streamer(mic);

        streamer.on_subscription_changed(true);
        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        streamer.on_subscription_changed(false);
        assert!(streamer.wait_idle(Duration::from_secs(2)));

        streamer.on_subscription_changed(true);
        assert!(streamer.wait_streaming(Duration::from_secs(2)));
        assert_eq!(probe.start_calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transport.sent_count() > 0);

        streamer.on_disconnect();
        assert!(streamer.wait_idle(Duration::from_secs(2)));
    }
}
