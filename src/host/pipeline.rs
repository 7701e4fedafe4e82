//! Host pipeline: notification handler -> decode queue -> dispatch thread
//! -> fan-out -> one thread per sink.

use crate::config::{Config, StreamFormat};
use crate::diagnostics::{HostCounters, HostStats};
use crate::host::consumer::{ChunkSink, ConsumerRunner, ErrorReporter, LogReporter};
use crate::host::distributor::FanOutDistributor;
use crate::host::frame::DecodedChunk;
use crate::host::reassembler::ChunkReassembler;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, error, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const DISPATCH_POLL: Duration = Duration::from_millis(50);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Entry point for the transport's delivery callback.
///
/// Cheap to clone. `on_notification` never blocks: it validates, decodes and
/// does a `try_send` into the decode queue.
#[derive(Clone)]
pub struct NotificationHandler {
    reassembler: Arc<ChunkReassembler>,
    counters: Arc<HostCounters>,
    tx: Sender<DecodedChunk>,
}

impl NotificationHandler {
    /// Returns true if the payload was accepted and queued.
    pub fn on_notification(&self, payload: &[u8]) -> bool {
        let Ok(chunk) = self.reassembler.accept(payload) else {
            return false;
        };
        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let drops = self
                    .counters
                    .decode_queue_drops
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if drops == 1 || drops % 100 == 0 {
                    warn!("Decode queue unavailable, {} chunks dropped", drops);
                }
                false
            }
        }
    }

    /// Feed every payload from `rx` through the handler on a dedicated
    /// thread, standing in for the radio stack's delivery context.
    pub fn spawn_pump(self, rx: Receiver<Vec<u8>>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("notify-rx".to_string())
            .spawn(move || {
                while let Ok(payload) = rx.recv() {
                    self.on_notification(&payload);
                }
            })
    }
}

/// Final result of one sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub name: &'static str,
    pub summary: Option<String>,
}

/// Read-only view of the host counters, usable from another thread.
#[derive(Clone)]
pub struct PipelineMonitor {
    counters: Arc<HostCounters>,
    distributor: Arc<FanOutDistributor>,
}

impl PipelineMonitor {
    pub fn stats(&self) -> HostStats {
        self.counters.snapshot(self.distributor.consumer_stats())
    }
}

/// Running host side. Owns the dispatch thread and the sink threads.
pub struct HostPipeline {
    format: StreamFormat,
    running: Arc<AtomicBool>,
    counters: Arc<HostCounters>,
    distributor: Arc<FanOutDistributor>,
    dispatcher: Option<JoinHandle<()>>,
    runners: Mutex<Vec<ConsumerRunner>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl HostPipeline {
    pub fn start(config: &Config) -> std::io::Result<(Self, NotificationHandler)> {
        Self::start_with_reporter(config, Arc::new(LogReporter))
    }

    pub fn start_with_reporter(
        config: &Config,
        reporter: Arc<dyn ErrorReporter>,
    ) -> std::io::Result<(Self, NotificationHandler)> {
        let counters = Arc::new(HostCounters::new());
        let distributor = Arc::new(FanOutDistributor::new());
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = bounded(config.host.decode_queue.max(1));

        let dispatcher = {
            let distributor = distributor.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("dispatch".to_string())
                .spawn(move || dispatch_loop(rx, distributor, running))?
        };

        let handler = NotificationHandler {
            reassembler: Arc::new(ChunkReassembler::new(
                config.stream.chunk_samples,
                counters.clone(),
            )),
            counters: counters.clone(),
            tx,
        };

        let pipeline = Self {
            format: config.stream,
            running,
            counters,
            distributor,
            dispatcher: Some(dispatcher),
            runners: Mutex::new(Vec::new()),
            reporter,
        };
        Ok((pipeline, handler))
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Register a sink with its own queue of `capacity` chunks and start its
    /// thread. Returns the consumer id for [`detach`](Self::detach).
    pub fn attach(&self, sink: Box<dyn ChunkSink>, capacity: usize) -> std::io::Result<u64> {
        let queue = self.distributor.register(sink.name(), capacity);
        let id = queue.id();
        match ConsumerRunner::spawn(sink, queue, self.reporter.clone()) {
            Ok(runner) => {
                debug!("Attached consumer {} ({})", id, runner.name());
                self.runners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(runner);
                Ok(id)
            }
            Err(e) => {
                self.distributor.unregister(id);
                Err(e)
            }
        }
    }

    /// Remove a consumer. It gets no further chunks and its queued chunks
    /// are discarded. Its summary is still collected by [`stop`](Self::stop).
    pub fn detach(&self, id: u64) -> bool {
        self.distributor.unregister(id)
    }

    pub fn stats(&self) -> HostStats {
        self.counters.snapshot(self.distributor.consumer_stats())
    }

    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            counters: self.counters.clone(),
            distributor: self.distributor.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch whatever is already decoded, let every sink drain its queue
    /// and collect the summaries.
    ///
    /// Sinks still busy after the deadline are detached and reported without
    /// a summary.
    pub fn stop(mut self) -> Vec<SinkSummary> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(dispatcher) = self.dispatcher.take()
            && dispatcher.join().is_err()
        {
            error!("Dispatch thread panicked");
        }
        self.distributor.close();

        let mut pending: Vec<ConsumerRunner> = self
            .runners
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut summaries = Vec::new();
        let deadline = Instant::now() + SHUTDOWN_DEADLINE;

        loop {
            let mut remaining = Vec::new();
            for runner in pending.drain(..) {
                if !runner.is_finished() {
                    remaining.push(runner);
                    continue;
                }
                let name = runner.name();
                match runner.join() {
                    Ok(summary) => summaries.push(SinkSummary { name, summary }),
                    Err(e) => {
                        error!("{}", e);
                        summaries.push(SinkSummary {
                            name,
                            summary: None,
                        });
                    }
                }
            }
            pending = remaining;

            if pending.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Shutdown timeout: {} sink(s) still running, detaching",
                    pending.len()
                );
                summaries.extend(pending.iter().map(|r| SinkSummary {
                    name: r.name(),
                    summary: None,
                }));
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        summaries
    }
}

fn dispatch_loop(
    rx: Receiver<DecodedChunk>,
    distributor: Arc<FanOutDistributor>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(DISPATCH_POLL) {
            Ok(chunk) => {
                distributor.dispatch(chunk);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // No flush on the device side, but chunks already decoded here are kept.
    while let Ok(chunk) = rx.try_recv() {
        distributor.dispatch(chunk);
    }
}
