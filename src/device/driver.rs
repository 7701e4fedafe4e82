use crate::defaults;
use crate::error::{MicstreamError, Result};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Trait for the microphone hardware path.
///
/// This trait allows swapping implementations (real driver, synthetic tone,
/// WAV replay, mock).
pub trait MicrophoneDriver: Send {
    /// Power up the capture path.
    fn start(&mut self) -> Result<()>;

    /// Power down the capture path.
    fn stop(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the next block and copy it into `buf`.
    ///
    /// # Returns
    /// `Ok(Some(n))` with `n` interleaved samples written to the front of
    /// `buf`, `Ok(None)` if the timeout expired, or an error from the driver.
    /// `n` never exceeds `buf.len()` and is a whole number of frames.
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<Option<usize>>;

    /// Interleaved channel count of the samples written by `read_block`.
    fn channels(&self) -> u16 {
        1
    }

    /// Interleaved samples in one natural block, used to size the caller's
    /// buffer once per session.
    fn block_len(&self) -> usize {
        (defaults::SAMPLE_RATE * defaults::CAPTURE_BLOCK_MS / 1000) as usize
    }
}

/// Average interleaved frames down to mono at the front of `buf`.
///
/// Returns the number of mono samples. A trailing partial frame is ignored.
pub fn downmix_in_place(buf: &mut [i16], channels: u16) -> usize {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return buf.len();
    }
    let frames = buf.len() / channels;
    for frame in 0..frames {
        let start = frame * channels;
        let sum: i32 = buf[start..start + channels].iter().map(|&s| s as i32).sum();
        buf[frame] = (sum / channels as i32) as i16;
    }
    frames
}

/// Average interleaved frames down to mono.
pub fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    let mut mono = samples.to_vec();
    let len = downmix_in_place(&mut mono, channels);
    mono.truncate(len);
    mono
}

/// Paces block delivery at the rate a real microphone would produce them.
#[derive(Debug, Clone)]
pub(crate) struct BlockClock {
    block_duration: Duration,
    next_due: Option<Instant>,
}

impl BlockClock {
    pub(crate) fn new(block_duration: Duration) -> Self {
        Self {
            block_duration,
            next_due: None,
        }
    }

    pub(crate) fn restart(&mut self) {
        self.next_due = Some(Instant::now() + self.block_duration);
    }

    pub(crate) fn stop(&mut self) {
        self.next_due = None;
    }

    /// Sleeps until the next block is due, or for `timeout` if that comes
    /// first. Returns true when a block is due.
    pub(crate) fn wait(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now + self.block_duration);
        if due > now + timeout {
            thread::sleep(timeout);
            return false;
        }
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due + self.block_duration);
        true
    }
}

/// Synthetic sine-wave microphone, paced in real time.
///
/// Stands in for the hardware when no device is attached, the same way the
/// firmware's test tone does.
pub struct ToneMicrophone {
    frequency: f64,
    amplitude: f64,
    sample_rate: u32,
    block_samples: usize,
    channels: u16,
    phase: f64,
    clock: BlockClock,
    started: bool,
}

impl ToneMicrophone {
    /// Creates a mono tone source producing `block_ms` blocks.
    pub fn new(frequency: f64, sample_rate: u32, block_ms: u32) -> Self {
        let block_samples = (sample_rate as usize * block_ms as usize / 1000).max(1);
        Self {
            frequency,
            amplitude: 8000.0,
            sample_rate,
            block_samples,
            channels: 1,
            phase: 0.0,
            clock: BlockClock::new(Duration::from_millis(block_ms as u64)),
            started: false,
        }
    }

    /// Peak amplitude of the tone.
    pub fn with_amplitude(mut self, amplitude: i16) -> Self {
        self.amplitude = amplitude as f64;
        self
    }

    /// Emit the same tone on both channels of an interleaved stereo stream.
    pub fn with_stereo(mut self) -> Self {
        self.channels = 2;
        self
    }

    fn fill(&mut self, buf: &mut [i16]) -> usize {
        let step = 2.0 * PI * self.frequency / self.sample_rate as f64;
        let channels = self.channels.max(1) as usize;
        let frames = self.block_samples.min(buf.len() / channels);
        for frame in buf.chunks_exact_mut(channels).take(frames) {
            frame.fill((self.phase.sin() * self.amplitude) as i16);
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        frames * channels
    }
}

impl Default for ToneMicrophone {
    fn default() -> Self {
        Self::new(440.0, defaults::SAMPLE_RATE, defaults::CAPTURE_BLOCK_MS)
    }
}

impl MicrophoneDriver for ToneMicrophone {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        self.phase = 0.0;
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
                message: "tone source is not started".to_string(),
            });
        }
        if !self.clock.wait(timeout) {
            return Ok(None);
        }
        Ok(Some(self.fill(buf)))
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn block_len(&self) -> usize {
        self.block_samples * self.channels.max(1) as usize
    }
}

/// Observable state of a [`MockMicrophone`], shared with the test.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    pub started: Arc<AtomicBool>,
    pub start_calls: Arc<AtomicU32>,
    pub stop_calls: Arc<AtomicU32>,
    pub reads: Arc<AtomicU32>,
}

/// Mock microphone for testing
#[derive(Debug)]
pub struct MockMicrophone {
    blocks: VecDeque<Vec<i16>>,
    repeat: Option<Vec<i16>>,
    channels: u16,
    start_failures: u32,
    should_fail_read: bool,
    panic_on_read: bool,
    error_message: String,
    probe: MockProbe,
}

impl MockMicrophone {
    /// Create a mock that times out on every read.
    pub fn new() -> Self {
        Self {
            blocks: VecDeque::new(),
            repeat: None,
            channels: 1,
            start_failures: 0,
            should_fail_read: false,
            panic_on_read: false,
            error_message: "mock microphone error".to_string(),
            probe: MockProbe::default(),
        }
    }

    /// Queue blocks returned once each, in order. A block longer than the
    /// caller's buffer is handed out over several reads.
    pub fn with_blocks(mut self, blocks: Vec<Vec<i16>>) -> Self {
        self.blocks = blocks.into();
        self
    }

    /// Return this block on every read once the queue is empty.
    pub fn with_repeating_block(mut self, block: Vec<i16>) -> Self {
        self.repeat = Some(block);
        self
    }

    /// Report interleaved stereo blocks.
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Fail the next `count` start attempts.
    pub fn with_start_failures(mut self, count: u32) -> Self {
        self.start_failures = count;
        self
    }

    /// Configure the mock to fail on every read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Panic inside the next read, as a faulty driver would.
    pub fn with_read_panic(mut self) -> Self {
        self.panic_on_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Handle for observing the mock after it has been moved into a streamer.
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }
}

impl Default for MockMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneDriver for MockMicrophone {
    fn start(&mut self) -> Result<()> {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.start_failures > 0 {
            self.start_failures -= 1;
            return Err(MicstreamError::CaptureStart {
                message: self.error_message.clone(),
            });
        }
        self.probe.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<Option<usize>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_read {
            self.panic_on_read = false;
            panic!("{}", self.error_message);
        }
        if self.should_fail_read {
            return Err(MicstreamError::Capture {
                message: self.error_message.clone(),
            });
        }
        let channels = self.channels.max(1) as usize;
        let room = buf.len() - buf.len() % channels;
        if let Some(mut block) = self.blocks.pop_front() {
            let n = block.len().min(room);
            buf[..n].copy_from_slice(&block[..n]);
            if n < block.len() {
                block.drain(..n);
                self.blocks.push_front(block);
            }
            return Ok(Some(n));
        }
        if let Some(block) = &self.repeat {
            // Keep a repeating mock from spinning a core.
            thread::sleep(Duration::from_millis(1).min(timeout));
            let n = block.len().min(room);
            buf[..n].copy_from_slice(&block[..n]);
            return Ok(Some(n));
        }
        thread::sleep(timeout);
        Ok(None)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn block_len(&self) -> usize {
        self.blocks
            .iter()
            .chain(self.repeat.iter())
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(self.channels.max(1) as usize)
    }
}
