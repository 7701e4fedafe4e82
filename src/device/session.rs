//! Streaming session state machine.
//!
//! `Idle -> Starting -> Streaming -> Stopping -> Idle`, driven by the host's
//! notification subscription and by the workers reporting readiness and
//! exit. The session is reset between runs, never torn down.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Starting = 1,
    Streaming = 2,
    Stopping = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Starting,
            2 => SessionState::Streaming,
            3 => SessionState::Stopping,
            _ => SessionState::Idle,
        }
    }

    /// True while workers should keep doing work.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Session moved to `Starting`; the caller must spawn the workers.
    Begin,
    /// Already starting or streaming. Nothing changed.
    AlreadyActive,
    /// Previous session is still winding down; it restarts once it has.
    RestartQueued,
}

/// Result of an unsubscribe or disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping,
    AlreadyStopping,
    AlreadyIdle,
}

/// What the last exiting worker has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Other workers are still running.
    Pending,
    /// The session is now `Idle`.
    Idle,
    /// A restart was queued; the session is `Starting` again and the caller
    /// must spawn fresh workers.
    Restart,
}

struct SessionInner {
    state: SessionState,
    active_workers: usize,
    restart_pending: bool,
}

pub struct Session {
    inner: Mutex<SessionInner>,
    // Lock-free mirror of `inner.state` for per-tick checks.
    state: AtomicU8,
    changed: Condvar,
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                active_workers: 0,
                restart_pending: false,
            }),
            state: AtomicU8::new(SessionState::Idle as u8),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, inner: &mut SessionInner, state: SessionState) {
        inner.state = state;
        self.state.store(state as u8, Ordering::SeqCst);
        self.changed.notify_all();
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Handle a subscribe. `workers` is the number of workers the caller
    /// will spawn if the session begins.
    pub fn request_start(&self, workers: usize) -> StartOutcome {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Idle => {
                inner.active_workers = workers;
                inner.restart_pending = false;
                self.set(&mut inner, SessionState::Starting);
                StartOutcome::Begin
            }
            SessionState::Starting | SessionState::Streaming => StartOutcome::AlreadyActive,
            SessionState::Stopping => {
                inner.restart_pending = true;
                StartOutcome::RestartQueued
            }
        }
    }

    /// Driver is up. Returns false if the session was stopped meanwhile.
    pub fn mark_ready(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Starting {
            self.set(&mut inner, SessionState::Streaming);
            true
        } else {
            false
        }
    }

    /// Handle an unsubscribe or disconnect. Cancels any queued restart.
    pub fn request_stop(&self) -> StopOutcome {
        let mut inner = self.lock();
        inner.restart_pending = false;
        match inner.state {
            SessionState::Starting | SessionState::Streaming => {
                if inner.active_workers == 0 {
                    self.set(&mut inner, SessionState::Idle);
                } else {
                    self.set(&mut inner, SessionState::Stopping);
                }
                StopOutcome::Stopping
            }
            SessionState::Stopping => StopOutcome::AlreadyStopping,
            SessionState::Idle => StopOutcome::AlreadyIdle,
        }
    }

    /// Called by each worker as it exits. `workers` is the count to arm for
    /// a queued restart.
    pub fn worker_exited(&self, workers: usize) -> WorkerExit {
        let mut inner = self.lock();
        inner.active_workers = inner.active_workers.saturating_sub(1);
        if inner.active_workers > 0 {
            return WorkerExit::Pending;
        }
        if inner.restart_pending {
            inner.restart_pending = false;
            inner.active_workers = workers;
            self.set(&mut inner, SessionState::Starting);
            WorkerExit::Restart
        } else {
            self.set(&mut inner, SessionState::Idle);
            WorkerExit::Idle
        }
    }

    /// Block until `predicate` holds for the state or `timeout` expires.
    pub fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(SessionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if predicate(inner.state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self
                .changed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
