//! Capture producer: microphone blocks into the sample ring.

use crate::audio::quality::analyze;
use crate::config::DeviceConfig;
use crate::device::driver::{MicrophoneDriver, downmix_in_place};
use crate::device::ring_buffer::SampleRing;
use crate::device::session::{Session, SessionState};
use crate::diagnostics::DeviceCounters;
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

pub type SharedDriver = Arc<Mutex<Box<dyn MicrophoneDriver>>>;

/// Pulls blocks from the driver while the session is active.
///
/// Runs on its own thread. The ring lock is only taken inside
/// [`SampleRing::write`], never across a driver call, and the driver lock
/// only around each driver call. Blocks land in a buffer allocated once in
/// [`CaptureProducer::new`].
pub struct CaptureProducer {
    driver: SharedDriver,
    buffer: Vec<i16>,
    ring: Arc<SampleRing>,
    counters: Arc<DeviceCounters>,
    session: Arc<Session>,
    read_timeout: Duration,
    backoff: Duration,
    max_errors: u32,
    level_interval: u64,
}

impl CaptureProducer {
    pub fn new(
        driver: SharedDriver,
        ring: Arc<SampleRing>,
        counters: Arc<DeviceCounters>,
        session: Arc<Session>,
        config: &DeviceConfig,
    ) -> Self {
        let block_len = driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .block_len()
            .max(1);
        Self {
            driver,
            buffer: vec![0; block_len],
            ring,
            counters,
            session,
            read_timeout: config.capture_timeout(),
            backoff: config.capture_backoff(),
            max_errors: config.max_capture_errors.max(1),
            level_interval: config.level_log_interval_blocks,
        }
    }

    /// Run until the session leaves `Starting`/`Streaming`.
    pub fn run(mut self) {
        if !self.start_driver() {
            self.idle_until_stopped("microphone did not start");
            return;
        }
        if !self.session.mark_ready() {
            self.stop_driver();
            return;
        }
        info!("Microphone started, streaming");

        let channels = self.driver().channels();
        let mut consecutive_errors = 0u32;
        let mut blocks = 0u64;

        while self.session.state() == SessionState::Streaming {
            let read = self
                .driver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read_block(&mut self.buffer, self.read_timeout);
            match read {
                Ok(Some(filled)) => {
                    consecutive_errors = 0;
                    blocks += 1;
                    let filled = filled.min(self.buffer.len());
                    let len = downmix_in_place(&mut self.buffer[..filled], channels);
                    let mono = &self.buffer[..len];
                    let dropped = self.ring.write(mono);

                    self.counters.capture_blocks.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .samples_captured
                        .fetch_add(mono.len() as u64, Ordering::Relaxed);
                    if dropped > 0 {
                        self.counters
                            .overflow_samples
                            .fetch_add(dropped as u64, Ordering::Relaxed);
                        debug!("Ring full, dropped {} oldest samples", dropped);
                    }

                    if self.level_interval > 0 && blocks % self.level_interval == 0 {
                        let level = analyze(mono);
                        debug!(
                            "Mic level: min={} max={} rms={:.0} (ring {} / {})",
                            level.min,
                            level.max,
                            level.rms,
                            self.ring.available(),
                            self.ring.usable_capacity()
                        );
                    }
                }
                Ok(None) => {
                    // Timeout: nothing captured yet.
                    thread::yield_now();
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.counters.capture_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Capture error ({}/{}): {}",
                        consecutive_errors, self.max_errors, e
                    );
                    if consecutive_errors >= self.max_errors {
                        self.stop_driver();
                        self.idle_until_stopped("too many consecutive capture errors");
                        return;
                    }
                    thread::sleep(self.backoff);
                }
            }
        }

        self.stop_driver();
        debug!("Capture producer exited after {} blocks", blocks);
    }

    // One capture thread per session, so this lock is uncontended.
    fn driver(&self) -> MutexGuard<'_, Box<dyn MicrophoneDriver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_driver(&self) -> bool {
        let mut failures = 0u32;
        while self.session.state().is_active() {
            let started = self.driver().start();
            match started {
                Ok(()) => return true,
                Err(e) => {
                    failures += 1;
                    self.counters.capture_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Failed to start microphone ({}/{}): {}",
                        failures, self.max_errors, e
                    );
                    if failures >= self.max_errors {
                        return false;
                    }
                    thread::sleep(self.backoff);
                }
            }
        }
        false
    }

    fn stop_driver(&self) {
        let stopped = self.driver().stop();
        if let Err(e) = stopped {
            warn!("Failed to stop microphone: {}", e);
        }
    }

    fn idle_until_stopped(&self, reason: &str) {
        if !self.session.state().is_active() {
            return;
        }
        error!("Capture idle until the next session: {}", reason);
        while self.session.state().is_active() {
            thread::sleep(self.backoff.max(Duration::from_millis(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::driver::MockMicrophone;

    fn config() -> DeviceConfig {
        DeviceConfig {
            capture_timeout_ms: 2,
            capture_backoff_ms: 1,
            max_capture_errors: 3,
            ..DeviceConfig::default()
        }
    }

    struct Harness {
        ring: Arc<SampleRing>,
        counters: Arc<DeviceCounters>,
        session: Arc<Session>,
        handle: thread::JoinHandle<()>,
    }

    fn spawn(mic: MockMicrophone, ring_capacity: usize) -> Harness {
        let driver: SharedDriver = Arc::new(Mutex::new(Box::new(mic)));
        let ring = Arc::new(SampleRing::new(ring_capacity));
        let counters = Arc::new(DeviceCounters::new());
        let session = Arc::new(Session::new());
        session.request_start(1);

        let producer = CaptureProducer::new(
            driver,
            ring.clone(),
            counters.clone(),
            session.clone(),
            &config(),
        );
        let handle = thread::spawn(move || producer.run());
        Harness {
            ring,
            counters,
            session,
            handle,
        }
    }

    #[test]
    fn test_blocks_land_in_ring_and_driver_is_stopped() {
        let mic = MockMicrophone::new().with_blocks(vec![vec![1, 2, 3], vec![4, 5]]);
        let probe = mic.probe();
        let h = spawn(mic, 64);

        assert!(h.session.wait_for(Duration::from_secs(2), |s| s == SessionState::Streaming));
        while h.ring.available() < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        h.session.request_stop();
        h.handle.join().unwrap();

        assert_eq!(h.ring.read(10), vec![1, 2, 3, 4, 5]);
        let stats = h.counters.snapshot();
        assert_eq!(stats.capture_blocks, 2);
        assert_eq!(stats.samples_captured, 5);
        assert!(!probe.started.load(Ordering::SeqCst));
        assert_eq!(probe.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffer_is_sized_once_from_driver() {
        let mic = MockMicrophone::new()
            .with_channels(2)
            .with_blocks(vec![vec![0; 64], vec![0; 320]]);
        let driver: SharedDriver = Arc::new(Mutex::new(Box::new(mic)));
        let producer = CaptureProducer::new(
            driver,
            Arc::new(SampleRing::new(64)),
            Arc::new(DeviceCounters::new()),
            Arc::new(Session::new()),
            &config(),
        );
        assert_eq!(producer.buffer.len(), 320);
    }

    #[test]
    fn test_stereo_blocks_are_downmixed() {
        let mic = MockMicrophone::new()
            .with_channels(2)
            .with_blocks(vec![vec![10, 20, 30, 40]]);
        let h = spawn(mic, 64);

        while h.ring.available() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        h.session.request_stop();
        h.handle.join().unwrap();

        assert_eq!(h.ring.read(10), vec![15, 35]);
    }

    #[test]
    fn test_overflow_is_counted() {
        let block: Vec<i16> = (0..100).collect();
        let mic = MockMicrophone::new().with_blocks(vec![block]);
        let h = spawn(mic, 16);

        while h.counters.snapshot().capture_blocks < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        h.session.request_stop();
        h.handle.join().unwrap();

        assert_eq!(h.counters.snapshot().overflow_samples, 85);
        assert_eq!(h.ring.read(100), (85..100).collect::<Vec<i16>>());
    }

    #[test]
    fn test_start_retries_then_streams() {
        let mic = MockMicrophone::new().with_start_failures(2);
        let probe = mic.probe();
        let h = spawn(mic, 64);

        assert!(h.session.wait_for(Duration::from_secs(2), |s| s == SessionState::Streaming));
        assert_eq!(probe.start_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.counters.snapshot().capture_errors, 2);

        h.session.request_stop();
        h.handle.join().unwrap();
    }

    #[test]
    fn test_persistent_start_failure_idles_in_starting() {
        let mic = MockMicrophone::new().with_start_failures(100);
        let probe = mic.probe();
        let h = spawn(mic, 64);

        while probe.start_calls.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));
        assert_eq!(probe.start_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.session.state(), SessionState::Starting);

        h.session.request_stop();
        h.handle.join().unwrap();
    }

    #[test]
    fn test_persistent_read_errors_stop_the_driver() {
        let mic = MockMicrophone::new().with_read_failure();
        let probe = mic.probe();
        let h = spawn(mic, 64);

        while h.counters.snapshot().capture_errors < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));

        assert_eq!(h.counters.snapshot().capture_errors, 3);
        assert!(!probe.started.load(Ordering::SeqCst));
        assert_eq!(h.session.state(), SessionState::Streaming);

        h.session.request_stop();
        h.handle.join().unwrap();
    }
}
