//! Fan-out of decoded chunks to independent consumers.
//!
//! Every consumer owns a bounded queue. Dispatch never blocks: when a queue
//! is full its oldest chunk is discarded to make room, so a stalled consumer
//! only ever loses its own data.

use crate::diagnostics::ConsumerSnapshot;
use crate::host::frame::DecodedChunk;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub type SharedChunk = Arc<DecodedChunk>;

#[derive(Debug, Default)]
struct QueueStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    // Set when the receiving side is dropped.
    closed: AtomicBool,
}

struct Slot {
    id: u64,
    name: String,
    capacity: usize,
    tx: Sender<SharedChunk>,
    // Second handle on the queue, used only to evict the oldest entry.
    evict: Receiver<SharedChunk>,
    stats: Arc<QueueStats>,
}

impl Slot {
    fn push(&self, chunk: &SharedChunk) {
        let mut pending = chunk.clone();
        // Two attempts: a full queue gets one eviction, then room is certain
        // unless the consumer raced us, in which case it made room itself.
        for _ in 0..2 {
            match self.tx.try_send(pending) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(back)) => {
                    if self.evict.try_recv().is_ok() {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            id: self.id,
            name: self.name.clone(),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            queued: self.tx.len(),
            capacity: self.capacity,
        }
    }
}

/// Receiving end handed to a consumer at registration.
pub struct ConsumerQueue {
    id: u64,
    name: String,
    rx: Receiver<SharedChunk>,
    stats: Arc<QueueStats>,
}

impl ConsumerQueue {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until a chunk arrives. `None` once the consumer has been
    /// removed or the distributor closed and the queue is empty.
    pub fn recv(&self) -> Option<SharedChunk> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout`. `Err(())` means the queue is finished.
    #[allow(clippy::result_unit_err)]
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<SharedChunk>, ()> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(()),
        }
    }

    pub fn try_recv(&self) -> Option<SharedChunk> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Drop for ConsumerQueue {
    fn drop(&mut self) {
        self.stats.closed.store(true, Ordering::SeqCst);
    }
}

/// Registry of consumers plus the non-blocking dispatch step.
pub struct FanOutDistributor {
    slots: RwLock<Vec<Slot>>,
    next_id: AtomicU64,
}

impl FanOutDistributor {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Add a consumer with its own queue of `capacity` chunks. It receives
    /// every chunk dispatched after this call returns.
    pub fn register(&self, name: &str, capacity: usize) -> ConsumerQueue {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stats = Arc::new(QueueStats::default());

        let slot = Slot {
            id,
            name: name.to_string(),
            capacity,
            tx,
            evict: rx.clone(),
            stats: stats.clone(),
        };
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slot);

        ConsumerQueue {
            id,
            name: name.to_string(),
            rx,
            stats,
        }
    }

    /// Remove a consumer. Its queued chunks are discarded and its queue
    /// reports finished. Returns false if `id` is unknown.
    pub fn unregister(&self, id: u64) -> bool {
        let slot = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            match slots.iter().position(|s| s.id == id) {
                Some(index) => slots.remove(index),
                None => return false,
            }
        };
        while slot.evict.try_recv().is_ok() {}
        true
    }

    /// Offer a chunk to every consumer. Never blocks.
    ///
    /// Consumers whose queue has been dropped are skipped and then pruned
    /// from the registry. Returns the number of consumers the chunk was
    /// queued for.
    pub fn dispatch(&self, chunk: DecodedChunk) -> usize {
        let chunk = Arc::new(chunk);
        let mut queued = 0;
        let mut closed = 0;
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            for slot in slots.iter() {
                if slot.stats.closed.load(Ordering::Relaxed) {
                    closed += 1;
                    continue;
                }
                slot.push(&chunk);
                queued += 1;
            }
        }
        if closed > 0 {
            self.prune_closed();
        }
        queued
    }

    fn prune_closed(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|slot| {
            let closed = slot.stats.closed.load(Ordering::Relaxed);
            if closed {
                debug!("Consumer {} ({}) finished, removed", slot.id, slot.name);
            }
            !closed
        });
    }

    /// Drop every registration without discarding queued chunks, so each
    /// consumer drains what it already has and then finishes.
    pub fn close(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn consumer_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn consumer_stats(&self) -> Vec<ConsumerSnapshot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Slot::snapshot)
            .collect()
    }
}

impl Default for FanOutDistributor {
    fn default() -> Self {
        Self::new()
    }
}
