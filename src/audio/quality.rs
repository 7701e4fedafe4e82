//! Descriptive statistics over sample windows, for diagnostics only.

use crate::defaults;
use serde::Serialize;

/// Classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityThresholds {
    /// A window whose `max - min` is below this is silent.
    pub silence_range: i32,
    /// A window with any `|sample|` above this is clipping.
    pub clipping_level: i32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            silence_range: defaults::SILENCE_RANGE,
            clipping_level: defaults::CLIPPING_LEVEL,
        }
    }
}

/// Statistics for one window of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityReport {
    pub samples: usize,
    pub min: i16,
    pub max: i16,
    pub mean: f64,
    pub rms: f64,
    pub is_silent: bool,
    pub is_clipping: bool,
}

/// Analyze a window with the default thresholds.
pub fn analyze(samples: &[i16]) -> QualityReport {
    analyze_with(samples, QualityThresholds::default())
}

/// Analyze a window. An empty window is reported as silent.
pub fn analyze_with(samples: &[i16], thresholds: QualityThresholds) -> QualityReport {
    if samples.is_empty() {
        return QualityReport {
            samples: 0,
            min: 0,
            max: 0,
            mean: 0.0,
            rms: 0.0,
            is_silent: true,
            is_clipping: false,
        };
    }

    let mut min = i16::MAX;
    let mut max = i16::MIN;
    let mut sum = 0i64;
    let mut sum_sq = 0f64;
    for &s in samples {
        min = min.min(s);
        max = max.max(s);
        sum += s as i64;
        sum_sq += (s as f64) * (s as f64);
    }
    let n = samples.len() as f64;

    QualityReport {
        samples: samples.len(),
        min,
        max,
        mean: sum as f64 / n,
        rms: (sum_sq / n).sqrt(),
        is_silent: (max as i32 - min as i32) < thresholds.silence_range,
        is_clipping: is_clipping(min, max, thresholds.clipping_level),
    }
}

fn is_clipping(min: i16, max: i16, level: i32) -> bool {
    (max as i32).abs() > level || (min as i32).abs() > level
}

/// Running statistics over a whole session, fed one chunk at a time.
#[derive(Debug, Clone)]
pub struct SessionQuality {
    thresholds: QualityThresholds,
    chunks: u64,
    silent_chunks: u64,
    clipping_chunks: u64,
    samples: u64,
    min: i16,
    max: i16,
    sum: i64,
    sum_sq: f64,
}

/// Serializable summary of a [`SessionQuality`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionSummary {
    pub chunks: u64,
    pub samples: u64,
    pub min: i16,
    pub max: i16,
    pub mean: f64,
    pub rms: f64,
    pub silent_chunks: u64,
    pub clipping_chunks: u64,
}

impl SessionQuality {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            chunks: 0,
            silent_chunks: 0,
            clipping_chunks: 0,
            samples: 0,
            min: i16::MAX,
            max: i16::MIN,
            sum: 0,
            sum_sq: 0.0,
        }
    }

    /// Analyze one chunk and fold it into the session totals.
    pub fn record(&mut self, chunk: &[i16]) -> QualityReport {
        let report = analyze_with(chunk, self.thresholds);
        if chunk.is_empty() {
            return report;
        }
        self.chunks += 1;
        self.samples += chunk.len() as u64;
        self.min = self.min.min(report.min);
        self.max = self.max.max(report.max);
        self.sum += chunk.iter().map(|&s| s as i64).sum::<i64>();
        self.sum_sq += report.rms * report.rms * chunk.len() as f64;
        if report.is_silent {
            self.silent_chunks += 1;
        }
        if report.is_clipping {
            self.clipping_chunks += 1;
        }
        report
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn summary(&self) -> SessionSummary {
        if self.samples == 0 {
            return SessionSummary {
                chunks: 0,
                samples: 0,
                min: 0,
                max: 0,
                mean: 0.0,
                rms: 0.0,
                silent_chunks: 0,
                clipping_chunks: 0,
            };
        }
        let n = self.samples as f64;
        SessionSummary {
            chunks: self.chunks,
            samples: self.samples,
            min: self.min,
            max: self.max,
            mean: self.sum as f64 / n,
            rms: (self.sum_sq / n).sqrt(),
            silent_chunks: self.silent_chunks,
            clipping_chunks: self.clipping_chunks,
        }
    }
}

impl Default for SessionQuality {
    fn default() -> Self {
        Self::new(QualityThresholds::default())
    }
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunks={} range=[{}, {}] mean={:.1} rms={:.1} silent={} clipping={}",
            self.chunks,
            self.min,
            self.max,
            self.mean,
            self.rms,
            self.silent_chunks,
            self.clipping_chunks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_statistics() {
        let report = analyze(&[-3, -1, 1, 3]);
        assert_eq!(report.samples, 4);
        assert_eq!(report.min, -3);
        assert_eq!(report.max, 3);
        assert_eq!(report.mean, 0.0);
        assert!((report.rms - 5.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_silence_threshold() {
        assert!(analyze(&[0, 199]).is_silent);
        assert!(!analyze(&[0, 200]).is_silent);
        assert!(analyze(&[]).is_silent);
    }

    #[test]
    fn test_clipping_uses_magnitude_on_both_sides() {
        assert!(!analyze(&[30000, -30000]).is_clipping);
        assert!(analyze(&[0, 30001]).is_clipping);
        assert!(analyze(&[i16::MIN, 0]).is_clipping);
    }

    #[test]
    fn test_full_scale_rms_does_not_overflow() {
        let samples = vec![i16::MAX; 10_000];
        let report = analyze(&samples);
        assert!((report.rms - i16::MAX as f64).abs() < 1e-6);
    }

    #[test]
    fn test_custom_thresholds() {
        let strict = QualityThresholds {
            silence_range: 10,
            clipping_level: 100,
        };
        let report = analyze_with(&[0, 50, 150], strict);
        assert!(!report.is_silent);
        assert!(report.is_clipping);
    }

    #[test]
    fn test_session_accumulates_chunks() {
        let mut session = SessionQuality::default();
        session.record(&[0; 160]);
        session.record(&[1000, -1000, 1000, -1000]);
        session.record(&[31000, 0]);
        session.record(&[]);

        let summary = session.summary();
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.samples, 166);
        assert_eq!(summary.min, -1000);
        assert_eq!(summary.max, 31000);
        assert_eq!(summary.silent_chunks, 1);
        assert_eq!(summary.clipping_chunks, 1);
        assert!((summary.mean - 31000.0 / 166.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_session_summary() {
        let summary = SessionQuality::default().summary();
        assert_eq!(summary.chunks, 0);
        assert_eq!(summary.rms, 0.0);
    }
}
