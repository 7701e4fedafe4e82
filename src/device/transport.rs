//! Notification transport boundary.
//!
//! The radio stack owns the real link. Everything here only needs a
//! non-blocking "queue this payload for notification" call that reports
//! failure immediately.

use crate::error::{MicstreamError, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

/// Non-blocking sink for one notification payload.
pub trait NotificationTransport: Send + Sync {
    /// Queue `payload` for delivery. Must not block.
    fn notify(&self, payload: &[u8]) -> Result<()>;
}

/// Bounded in-process link standing in for the radio's notification queue.
///
/// A full queue is a send failure, the same as the radio stack returning
/// `-ENOMEM` when its TX buffers are exhausted.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: Sender<Vec<u8>>,
}

impl ChannelTransport {
    /// Creates a transport and the receiving end the host side reads from.
    pub fn pair(capacity: usize) -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationTransport for ChannelTransport {
    fn notify(&self, payload: &[u8]) -> Result<()> {
        self.tx.try_send(payload.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => MicstreamError::Transport {
                message: "notification queue full".to_string(),
            },
            TrySendError::Disconnected(_) => MicstreamError::Transport {
                message: "not connected".to_string(),
            },
        })
    }
}

/// One payload captured by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentPayload {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

/// Mock transport for testing: records payloads with tokio timestamps.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<SentPayload>>,
    fail: AtomicBool,
    fail_every: AtomicU64,
    attempts: AtomicU64,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every send while `fail` is set.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fail every `n`th send attempt (0 disables).
    pub fn fail_every(&self, n: u64) {
        self.fail_every.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentPayload> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationTransport for MockTransport {
    fn notify(&self, payload: &[u8]) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let every = self.fail_every.load(Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) || (every > 0 && attempt % every == 0) {
            return Err(MicstreamError::Transport {
                message: "mock transport failure".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentPayload {
                at: Instant::now(),
                bytes: payload.to_vec(),
            });
        Ok(())
    }
}
