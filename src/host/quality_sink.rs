//! Diagnostics consumer: per-chunk quality folded into a session summary.

use crate::audio::quality::{QualityThresholds, SessionQuality, SessionSummary};
use crate::host::consumer::{ChunkSink, SinkError};
use crate::host::frame::DecodedChunk;
use log::{debug, warn};
use std::sync::{Arc, Mutex, PoisonError};

pub struct QualitySink {
    session: Arc<Mutex<SessionQuality>>,
    was_silent: bool,
    clipping_streak: u64,
}

impl QualitySink {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            session: Arc::new(Mutex::new(SessionQuality::new(thresholds))),
            was_silent: false,
            clipping_streak: 0,
        }
    }

    /// Shared handle for reading the summary after the sink finishes.
    pub fn session(&self) -> Arc<Mutex<SessionQuality>> {
        self.session.clone()
    }

    pub fn summary(&self) -> SessionSummary {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary()
    }
}

impl Default for QualitySink {
    fn default() -> Self {
        Self::new(QualityThresholds::default())
    }
}

impl ChunkSink for QualitySink {
    fn handle(&mut self, chunk: &DecodedChunk) -> Result<(), SinkError> {
        let report = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&chunk.samples);

        if report.is_silent != self.was_silent {
            debug!(
                "Chunk {}: {}",
                chunk.sequence,
                if report.is_silent { "silence" } else { "signal" }
            );
            self.was_silent = report.is_silent;
        }

        if report.is_clipping {
            self.clipping_streak += 1;
            // Once per run of clipping chunks.
            if self.clipping_streak == 1 {
                warn!(
                    "Chunk {} is clipping (range [{}, {}])",
                    chunk.sequence, report.min, report.max
                );
            }
        } else {
            self.clipping_streak = 0;
        }
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        Some(format!("quality: {}", self.summary()))
    }

    fn name(&self) -> &'static str {
        "quality"
    }
}
