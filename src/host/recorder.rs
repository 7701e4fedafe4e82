//! Recording consumer: accumulates the session and writes a PCM container.

use crate::audio::wav::write_wav;
use crate::defaults;
use crate::host::consumer::{ChunkSink, SinkError};
use crate::host::frame::DecodedChunk;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Measured rate against the declared one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCheck {
    pub nominal: u32,
    pub effective: f64,
}

impl RateCheck {
    /// `samples` received over `elapsed` wall time.
    pub fn measure(nominal: u32, samples: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let effective = if secs > 0.0 {
            samples as f64 / secs
        } else {
            nominal as f64
        };
        Self { nominal, effective }
    }

    /// Relative deviation from nominal, e.g. 0.05 for 5%.
    pub fn deviation(&self) -> f64 {
        if self.nominal == 0 {
            return 0.0;
        }
        (self.effective - self.nominal as f64).abs() / self.nominal as f64
    }

    pub fn within_tolerance(&self) -> bool {
        self.deviation() <= defaults::RATE_TOLERANCE
    }
}

/// Collects every chunk and writes one container when the stream ends.
///
/// The header always declares the nominal rate. A measured rate far from it
/// points at lost notifications or a clock problem on the device and is
/// logged, not corrected.
pub struct RecorderSink {
    path: Option<PathBuf>,
    sample_rate: u32,
    samples: Arc<Mutex<Vec<i16>>>,
    chunks: u64,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
    last_len: usize,
}

impl RecorderSink {
    /// Record to `path`, or keep the samples in memory only if `None`.
    pub fn new(path: Option<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path,
            sample_rate,
            samples: Arc::new(Mutex::new(Vec::new())),
            chunks: 0,
            first_at: None,
            last_at: None,
            last_len: 0,
        }
    }

    /// Shared view of the recorded samples.
    pub fn samples(&self) -> Arc<Mutex<Vec<i16>>> {
        self.samples.clone()
    }

    fn rate_check(&self, total: usize) -> Option<RateCheck> {
        let (first, last) = (self.first_at?, self.last_at?);
        if self.chunks < 2 {
            return None;
        }
        // Arrival span covers all but the last chunk's own duration.
        let tail = Duration::from_secs_f64(self.last_len as f64 / self.sample_rate.max(1) as f64);
        Some(RateCheck::measure(
            self.sample_rate,
            total,
            last.duration_since(first) + tail,
        ))
    }
}

impl ChunkSink for RecorderSink {
    fn handle(&mut self, chunk: &DecodedChunk) -> Result<(), SinkError> {
        let now = Instant::now();
        self.first_at.get_or_insert(now);
        self.last_at = Some(now);
        self.last_len = chunk.samples.len();
        self.chunks += 1;
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk.samples);
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let seconds = samples.len() as f64 / self.sample_rate.max(1) as f64;

        if let Some(check) = self.rate_check(samples.len()) {
            if check.within_tolerance() {
                info!(
                    "Sample rate: nominal {} Hz, measured {:.0} Hz",
                    check.nominal, check.effective
                );
            } else {
                warn!(
                    "Measured sample rate {:.0} Hz is {:.0}% off nominal {} Hz; header keeps nominal",
                    check.effective,
                    check.deviation() * 100.0,
                    check.nominal
                );
            }
        }

        let Some(path) = &self.path else {
            return Some(format!(
                "recorded {} chunks ({:.1}s) in memory",
                self.chunks, seconds
            ));
        };
        match write_wav(path, &samples, self.sample_rate) {
            Ok(()) => Some(format!(
                "wrote {} samples ({:.1}s) to {}",
                samples.len(),
                seconds,
                path.display()
            )),
            Err(e) => {
                warn!("Failed to write {}: {}", path.display(), e);
                Some(format!("recording lost: {}", e))
            }
        }
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}
