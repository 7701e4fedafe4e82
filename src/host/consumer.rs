//! Consumer plumbing: the sink trait, error reporting and the thread that
//! drives a sink from its queue.

use crate::host::distributor::ConsumerQueue;
use crate::host::frame::DecodedChunk;
use log::{debug, error, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Errors a sink can return while handling a chunk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The chunk is lost but the sink keeps going.
    #[error("chunk skipped: {0}")]
    Recoverable(String),
    /// The sink cannot continue. Other consumers are unaffected.
    #[error("sink stopped: {0}")]
    Fatal(String),
}

/// Trait for reporting sink errors.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, sink: &str, error: &SinkError);
}

/// Reporter that forwards to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, sink: &str, error: &SinkError) {
        match error {
            SinkError::Recoverable(_) => warn!("[{}] {}", sink, error),
            SinkError::Fatal(_) => error!("[{}] {}", sink, error),
        }
    }
}

/// Pluggable consumer of decoded chunks.
pub trait ChunkSink: Send + 'static {
    /// Handle one chunk, in sequence order.
    fn handle(&mut self, chunk: &DecodedChunk) -> Result<(), SinkError>;

    /// Called once when the queue is finished. Return a summary if
    /// applicable.
    fn finish(&mut self) -> Option<String> {
        None
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str;
}

/// Sink that collects chunks in memory (for testing).
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    chunks: Arc<Mutex<Vec<DecodedChunk>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the collected chunks.
    pub fn chunks(&self) -> Arc<Mutex<Vec<DecodedChunk>>> {
        self.chunks.clone()
    }
}

impl ChunkSink for CollectorSink {
    fn handle(&mut self, chunk: &DecodedChunk) -> Result<(), SinkError> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk.clone());
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        let count = self
            .chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        Some(format!("collected {} chunks", count))
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Runs a sink on a dedicated thread until its queue finishes.
pub struct ConsumerRunner {
    id: u64,
    name: &'static str,
    handle: Option<JoinHandle<Option<String>>>,
}

impl ConsumerRunner {
    pub fn spawn(
        mut sink: Box<dyn ChunkSink>,
        queue: ConsumerQueue,
        reporter: Arc<dyn ErrorReporter>,
    ) -> std::io::Result<Self> {
        let name = sink.name();
        let id = queue.id();
        let handle = thread::Builder::new()
            .name(format!("sink-{}", name))
            .spawn(move || Self::run_sink(&mut *sink, queue, reporter))?;

        Ok(Self {
            id,
            name,
            handle: Some(handle),
        })
    }

    fn run_sink(
        sink: &mut dyn ChunkSink,
        queue: ConsumerQueue,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Option<String> {
        let name = sink.name();
        let mut handled = 0u64;

        while let Some(chunk) = queue.recv() {
            match sink.handle(&chunk) {
                Ok(()) => handled += 1,
                Err(e @ SinkError::Recoverable(_)) => reporter.report(name, &e),
                Err(e @ SinkError::Fatal(_)) => {
                    reporter.report(name, &e);
                    break;
                }
            }
        }
        // Dropping the queue here marks it closed, so dispatch skips it.
        drop(queue);

        debug!("[{}] finished after {} chunks", name, handled);
        sink.finish()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the sink thread and returns its summary.
    pub fn join(mut self) -> Result<Option<String>, String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("Sink '{}' thread panicked", self.name)),
            None => Ok(None),
        }
    }
}
