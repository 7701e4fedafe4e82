//! WAV file replay as a microphone.

use crate::audio::wav::{decode_wav, resample};
use crate::device::driver::{BlockClock, MicrophoneDriver};
use crate::error::{MicstreamError, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Replays a recording in real time, block by block.
/// Supports arbitrary sample rates and channels, resampled to the stream rate
/// and downmixed to mono.
pub struct WavMicrophone {
    samples: Vec<i16>,
    position: usize,
    block_samples: usize,
    sample_rate: u32,
    looping: bool,
    clock: BlockClock,
    started: bool,
}

impl WavMicrophone {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader<R: Read>(reader: R, sample_rate: u32, block_ms: u32) -> Result<Self> {
        let decoded = decode_wav(reader)?;
        let samples = resample(&decoded.samples, decoded.sample_rate, sample_rate);
        let block_samples = (sample_rate as usize * block_ms as usize / 1000).max(1);

        Ok(Self {
            samples,
            position: 0,
            block_samples,
            sample_rate,
            looping: false,
            clock: BlockClock::new(Duration::from_millis(block_ms as u64)),
            started: false,
        })
    }

    pub fn open(path: &Path, sample_rate: u32, block_ms: u32) -> Result<Self> {
        let file = File::open(path).map_err(|e| MicstreamError::Container {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(BufReader::new(file), sample_rate, block_ms)
    }

    /// Start over from the beginning when the recording runs out.
    pub fn with_looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Playback length at the stream rate.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn is_exhausted(&self) -> bool {
        !self.looping && self.position >= self.samples.len()
    }

    /// Consume the source and return all samples as a single buffer.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl MicrophoneDriver for WavMicrophone {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        self.position = 0;
        self.clock.restart();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.clock.stop();
        Ok(())
    }

    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<Option<usize>> {
        if !self.started {
            return Err(MicstreamError::Capture {
                message: "WAV source is not started".to_string(),
            });
        }
        if self.looping && self.position >= self.samples.len() {
            self.position = 0;
        }
        if self.samples.is_empty() || self.position >= self.samples.len() {
            // End of recording: behave like a silent microphone.
            thread::sleep(timeout);
            return Ok(None);
        }
        if !self.clock.wait(timeout) {
            return Ok(None);
        }

        let end = (self.position + self.block_samples.min(buf.len())).min(self.samples.len());
        let n = end - self.position;
        buf[..n].copy_from_slice(&self.samples[self.position..end]);
        self.position = end;
        Ok(Some(n))
    }

    fn block_len(&self) -> usize {
        self.block_samples
    }
}
