//! Stream counters for logging and final reports.
//!
//! Counters are plain atomics bumped from the hot paths; snapshots are
//! serializable so the CLI can print them as JSON.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Embedded-side counters, zeroed on every session start.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    pub chunks_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub underruns: AtomicU64,
    pub capture_blocks: AtomicU64,
    pub samples_captured: AtomicU64,
    pub capture_errors: AtomicU64,
    pub overflow_samples: AtomicU64,
}

/// Point-in-time copy of [`DeviceCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub chunks_sent: u64,
    pub send_errors: u64,
    pub underruns: u64,
    pub capture_blocks: u64,
    pub samples_captured: u64,
    pub capture_errors: u64,
    pub overflow_samples: u64,
}

impl DeviceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        for counter in [
            &self.chunks_sent,
            &self.send_errors,
            &self.underruns,
            &self.capture_blocks,
            &self.samples_captured,
            &self.capture_errors,
            &self.overflow_samples,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DeviceStats {
        DeviceStats {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            capture_blocks: self.capture_blocks.load(Ordering::Relaxed),
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            overflow_samples: self.overflow_samples.load(Ordering::Relaxed),
        }
    }
}

impl DeviceStats {
    /// Percentage of send attempts that reached the transport.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.chunks_sent + self.send_errors;
        if attempts == 0 {
            return 100.0;
        }
        self.chunks_sent as f64 * 100.0 / attempts as f64
    }
}

/// Host-side counters for the reassembly path.
#[derive(Debug, Default)]
pub struct HostCounters {
    pub payloads_received: AtomicU64,
    pub chunks_accepted: AtomicU64,
    pub framing_errors: AtomicU64,
    pub decode_queue_drops: AtomicU64,
}

/// Per-consumer delivery figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerSnapshot {
    pub id: u64,
    pub name: String,
    pub delivered: u64,
    pub dropped: u64,
    pub queued: usize,
    pub capacity: usize,
}

/// Point-in-time copy of the host counters plus consumer figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub payloads_received: u64,
    pub chunks_accepted: u64,
    pub framing_errors: u64,
    pub decode_queue_drops: u64,
    pub consumers: Vec<ConsumerSnapshot>,
}

impl HostCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, consumers: Vec<ConsumerSnapshot>) -> HostStats {
        HostStats {
            payloads_received: self.payloads_received.load(Ordering::Relaxed),
            chunks_accepted: self.chunks_accepted.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            decode_queue_drops: self.decode_queue_drops.load(Ordering::Relaxed),
            consumers,
        }
    }
}

impl std::fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} errors={} underruns={} blocks={} overflow={} ({:.1}% ok)",
            self.chunks_sent,
            self.send_errors,
            self.underruns,
            self.capture_blocks,
            self.overflow_samples,
            self.success_rate()
        )
    }
}

impl std::fmt::Display for HostStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} accepted={} framing_errors={} queue_drops={}",
            self.payloads_received,
            self.chunks_accepted,
            self.framing_errors,
            self.decode_queue_drops
        )?;
        for consumer in &self.consumers {
            write!(
                f,
                " [{}: delivered={} dropped={} queued={}/{}]",
                consumer.name,
                consumer.delivered,
                consumer.dropped,
                consumer.queued,
                consumer.capacity
            )?;
        }
        Ok(())
    }
}

/// Runs `tick` every `interval` on a background thread until `running` is
/// cleared.
pub fn spawn_periodic<F>(interval: Duration, running: Arc<AtomicBool>, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    thread::spawn(move || {
        let poll = Duration::from_millis(50).min(interval);
        let mut next = Instant::now() + interval;
        while running.load(Ordering::SeqCst) {
            if Instant::now() >= next {
                tick();
                next += interval;
            }
            thread::sleep(poll);
        }
    })
}
