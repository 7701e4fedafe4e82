//! Paced transmitter: one fixed-size chunk per period.

use crate::config::{DeviceConfig, StreamFormat};
use crate::defaults;
use crate::device::ring_buffer::SampleRing;
use crate::device::session::{Session, SessionState};
use crate::device::transport::NotificationTransport;
use crate::diagnostics::DeviceCounters;
use crate::protocol::encode_chunk;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent,
    /// Fewer than one chunk buffered. Nothing was sent.
    Underrun,
    SendFailed,
}

pub struct PacedTransmitter {
    ring: Arc<SampleRing>,
    counters: Arc<DeviceCounters>,
    transport: Arc<dyn NotificationTransport>,
    period: Duration,
    stats_interval: u64,
    samples: Vec<i16>,
    payload: Vec<u8>,
}

impl PacedTransmitter {
    pub fn new(
        format: StreamFormat,
        config: &DeviceConfig,
        ring: Arc<SampleRing>,
        counters: Arc<DeviceCounters>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            ring,
            counters,
            transport,
            period: format.chunk_period(),
            stats_interval: config.stats_interval_packets,
            // Allocated once; the tick path reuses them.
            samples: vec![0; format.chunk_samples],
            payload: vec![0; format.chunk_bytes()],
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Send at most one full chunk.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.ring.read_exact(&mut self.samples) {
            self.counters.underruns.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::Underrun;
        }

        if let Err(e) = encode_chunk(&self.samples, &mut self.payload) {
            warn!("Dropping chunk: {}", e);
            self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::SendFailed;
        }

        match self.transport.notify(&self.payload) {
            Ok(()) => {
                let sent = self.counters.chunks_sent.fetch_add(1, Ordering::Relaxed) + 1;
                if self.stats_interval > 0 && sent % self.stats_interval == 0 {
                    let stats = self.counters.snapshot();
                    info!(
                        "Stats: {} sent, {} errors, {:.1}% success, ring {}/{}",
                        stats.chunks_sent,
                        stats.send_errors,
                        stats.success_rate(),
                        self.ring.available(),
                        self.ring.usable_capacity()
                    );
                }
                TickOutcome::Sent
            }
            Err(e) => {
                let errors = self.counters.send_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if errors % defaults::ERROR_LOG_INTERVAL == 1 {
                    warn!("Notify failed ({} errors so far): {}", errors, e);
                }
                TickOutcome::SendFailed
            }
        }
    }

    /// Tick on a fixed period until the session leaves `Starting`/`Streaming`.
    ///
    /// Ticks are scheduled from the period, not from send completion; a late
    /// tick is caught up immediately rather than shifting the schedule.
    pub async fn run(mut self, session: Arc<Session>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            ticker.tick().await;
            match session.state() {
                SessionState::Streaming => {
                    self.tick();
                }
                // Driver not up yet.
                SessionState::Starting => {}
                SessionState::Stopping | SessionState::Idle => break,
            }
        }
        debug!("Transmitter exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::MockTransport;
    use crate::protocol::decode_chunk;

    fn transmitter(
        ring_capacity: usize,
        transport: Arc<MockTransport>,
    ) -> (PacedTransmitter, Arc<SampleRing>, Arc<DeviceCounters>) {
        let ring = Arc::new(SampleRing::new(ring_capacity));
        let counters = Arc::new(DeviceCounters::new());
        let tx = PacedTransmitter::new(
            StreamFormat::default(),
            &DeviceConfig::default(),
            ring.clone(),
            counters.clone(),
            transport,
        );
        (tx, ring, counters)
    }

    fn streaming_session() -> Arc<Session> {
        let session = Arc::new(Session::new());
        session.request_start(1);
        session.mark_ready();
        session
    }

    #[test]
    fn test_tick_sends_exactly_one_chunk() {
        let transport = MockTransport::new();
        let (mut tx, ring, counters) = transmitter(1024, transport.clone());
        let samples: Vec<i16> = (0..200).collect();
        ring.write(&samples);

        assert_eq!(tx.tick(), TickOutcome::Sent);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bytes.len(), 320);
        assert_eq!(decode_chunk(&sent[0].bytes, 160).unwrap(), samples[..160].to_vec());
        assert_eq!(ring.available(), 40);
        assert_eq!(counters.snapshot().chunks_sent, 1);
    }

    #[test]
    fn test_underrun_sends_nothing_and_keeps_samples() {
        let transport = MockTransport::new();
        let (mut tx, ring, counters) = transmitter(1024, transport.clone());
        ring.write(&[1; 159]);

        assert_eq!(tx.tick(), TickOutcome::Underrun);

        assert_eq!(transport.attempts(), 0);
        assert_eq!(ring.available(), 159);
        assert_eq!(counters.snapshot().underruns, 1);
    }

    #[test]
    fn test_send_failure_loses_only_that_chunk() {
        let transport = MockTransport::new();
        let (mut tx, ring, counters) = transmitter(1024, transport.clone());
        ring.write(&[7; 320]);

        transport.set_failing(true);
        assert_eq!(tx.tick(), TickOutcome::SendFailed);
        transport.set_failing(false);
        assert_eq!(tx.tick(), TickOutcome::Sent);

        let stats = counters.snapshot();
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.chunks_sent, 1);
        assert_eq!(ring.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_over_ten_seconds() {
        let transport = MockTransport::new();
        // Enough audio for the whole window so no tick underruns.
        let (tx, ring, counters) = transmitter(200_000, transport.clone());
        ring.write(&vec![100i16; 160_000 + 1600]);

        let session = streaming_session();
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(tx.run(session.clone()));

        tokio::time::sleep(Duration::from_millis(10_005)).await;
        session.request_stop();
        handle.await.unwrap();

        let sent = transport.sent();
        assert_eq!(counters.snapshot().underruns, 0);
        assert!(sent.iter().all(|p| p.bytes.len() == 320));
        for second in 0..10u32 {
            let from = start + Duration::from_secs(second as u64);
            let to = from + Duration::from_secs(1);
            let count = sent.iter().filter(|p| p.at >= from && p.at < to).count();
            assert!(
                (95..=105).contains(&count),
                "second {} carried {} chunks",
                second,
                count
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_ticks_while_starting() {
        let transport = MockTransport::new();
        let (tx, ring, _counters) = transmitter(1024, transport.clone());
        ring.write(&[1; 480]);

        let session = Arc::new(Session::new());
        session.request_start(1);
        let handle = tokio::spawn(tx.run(session.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.attempts(), 0);

        session.mark_ready();
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.request_stop();
        handle.await.unwrap();

        assert_eq!(transport.sent_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_the_task() {
        let transport = MockTransport::new();
        let (tx, _ring, _counters) = transmitter(1024, transport);
        let session = streaming_session();
        let handle = tokio::spawn(tx.run(session.clone()));

        session.request_stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("transmitter did not stop")
            .unwrap();
    }
}
