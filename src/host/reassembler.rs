//! Validates and decodes notification payloads.
//!
//! Runs on the transport's delivery context, so it only does a length check,
//! a decode and a few atomic increments.

use crate::defaults;
use crate::diagnostics::HostCounters;
use crate::error::Result;
use crate::host::frame::DecodedChunk;
use crate::protocol::decode_chunk;
use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct ChunkReassembler {
    chunk_samples: usize,
    next_sequence: AtomicU64,
    counters: Arc<HostCounters>,
}

impl ChunkReassembler {
    pub fn new(chunk_samples: usize, counters: Arc<HostCounters>) -> Self {
        Self {
            chunk_samples,
            next_sequence: AtomicU64::new(0),
            counters,
        }
    }

    /// Decode one payload, or reject it with a framing error.
    ///
    /// There is no resynchronization: a wrong-length payload is dropped as a
    /// whole and the next one is judged on its own.
    pub fn accept(&self, payload: &[u8]) -> Result<DecodedChunk> {
        self.counters.payloads_received.fetch_add(1, Ordering::Relaxed);

        let samples = match decode_chunk(payload, self.chunk_samples) {
            Ok(samples) => samples,
            Err(e) => {
                let count = self.counters.framing_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if count == 1 || count % defaults::FRAMING_LOG_INTERVAL == 0 {
                    warn!("Dropping payload ({} framing errors): {}", count, e);
                }
                return Err(e);
            }
        };

        self.counters.chunks_accepted.fetch_add(1, Ordering::Relaxed);
        Ok(DecodedChunk {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            samples,
        })
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }
}
