//! Host side: reassembly, fan-out and the consumers.
//!
//! Each sink runs in its own thread behind a bounded, drop-oldest queue.

pub mod consumer;
pub mod distributor;
pub mod forwarder;
pub mod frame;
pub mod pipeline;
pub mod quality_sink;
pub mod reassembler;
pub mod recorder;

pub use consumer::{ChunkSink, CollectorSink, ConsumerRunner, ErrorReporter, LogReporter, SinkError};
pub use distributor::{ConsumerQueue, FanOutDistributor};
pub use forwarder::TranscriptionForwarder;
pub use frame::DecodedChunk;
pub use pipeline::{HostPipeline, NotificationHandler, PipelineMonitor, SinkSummary};
pub use quality_sink::QualitySink;
pub use reassembler::ChunkReassembler;
pub use recorder::{RateCheck, RecorderSink};
