//! Fixed-capacity sample ring shared by the capture producer and the paced
//! transmitter.
//!
//! One slot is always left empty so that `read == write` means empty and
//! `write + 1 == read` means full. Writing into a full ring drops the oldest
//! unread sample: the ring favors fresh audio over complete audio.

use std::sync::{Mutex, MutexGuard, PoisonError};

struct RingState {
    samples: Box<[i16]>,
    write: usize,
    read: usize,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.samples.len()
    }

    fn available(&self) -> usize {
        let cap = self.capacity();
        (self.write + cap - self.read) % cap
    }

    fn pop_into(&mut self, out: &mut [i16]) {
        let cap = self.capacity();
        for slot in out.iter_mut() {
            *slot = self.samples[self.read];
            self.read = (self.read + 1) % cap;
        }
    }
}

/// Single-writer, single-reader circular store of 16-bit samples.
///
/// Every operation takes the internal lock for a bounded number of sample
/// copies and never blocks on anything else.
pub struct SampleRing {
    state: Mutex<RingState>,
}

impl SampleRing {
    /// Creates a ring with `capacity` slots (`capacity - 1` usable).
    ///
    /// Capacities below 2 are raised to 2 so the ring can hold one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            state: Mutex::new(RingState {
                samples: vec![0i16; capacity].into_boxed_slice(),
                write: 0,
                read: 0,
            }),
        }
    }

    // The state is consistent after every statement, so a poisoned lock is
    // still safe to use.
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total slot count, including the reserved empty slot.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Maximum number of samples held at once.
    pub fn usable_capacity(&self) -> usize {
        self.capacity() - 1
    }

    /// Appends samples, discarding the oldest unread ones if the ring is full.
    ///
    /// Returns the number of samples discarded to make room.
    pub fn write(&self, samples: &[i16]) -> usize {
        let mut state = self.lock();
        let cap = state.capacity();
        let mut dropped = 0;
        for &sample in samples {
            let next = (state.write + 1) % cap;
            if next == state.read {
                state.read = (state.read + 1) % cap;
                dropped += 1;
            }
            let write = state.write;
            state.samples[write] = sample;
            state.write = next;
        }
        dropped
    }

    /// Removes up to `max` of the oldest samples.
    pub fn read(&self, max: usize) -> Vec<i16> {
        let mut state = self.lock();
        let count = max.min(state.available());
        let mut out = vec![0i16; count];
        state.pop_into(&mut out);
        out
    }

    /// Fills `out` completely or not at all.
    ///
    /// Returns `false` without consuming anything when fewer than
    /// `out.len()` samples are buffered.
    pub fn read_exact(&self, out: &mut [i16]) -> bool {
        let mut state = self.lock();
        if state.available() < out.len() {
            return false;
        }
        state.pop_into(out);
        true
    }

    /// Number of samples ready to read.
    pub fn available(&self) -> usize {
        self.lock().available()
    }

    /// Number of samples that can be written before the oldest is dropped.
    pub fn free_space(&self) -> usize {
        let state = self.lock();
        state.capacity() - 1 - state.available()
    }

    /// Discards everything and rewinds both cursors.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.write = 0;
        state.read = 0;
    }

    /// Current `(write, read)` cursor positions.
    pub fn cursors(&self) -> (usize, usize) {
        let state = self.lock();
        (state.write, state.read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_ring_is_empty() {
        let ring = SampleRing::new(16);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.usable_capacity(), 15);
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.free_space(), 15);
        assert!(ring.read(10).is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let ring = SampleRing::new(16);
        assert_eq!(ring.write(&[1, 2, 3, 4]), 0);
        assert_eq!(ring.read(2), vec![1, 2]);
        ring.write(&[5, 6]);
        assert_eq!(ring.read(100), vec![3, 4, 5, 6]);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_wraps_around_capacity() {
        let ring = SampleRing::new(5);
        for round in 0..10i16 {
            ring.write(&[round, round + 100, round + 200]);
            assert_eq!(ring.read(3), vec![round, round + 100, round + 200]);
        }
    }

    #[test]
    fn test_overflow_keeps_most_recent_samples() {
        let ring = SampleRing::new(8192);
        let input: Vec<i16> = (0..10_000).map(|i| i as i16).collect();

        let dropped = ring.write(&input);

        assert_eq!(dropped, 1809);
        assert_eq!(ring.available(), 8191);
        assert_eq!(ring.free_space(), 0);
        let out = ring.read(usize::MAX);
        let expected: Vec<i16> = (1809..10_000).map(|i| i as i16).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_overflow_across_separate_writes() {
        let ring = SampleRing::new(4);
        ring.write(&[1, 2, 3]);
        assert_eq!(ring.write(&[4]), 1);
        assert_eq!(ring.write(&[5, 6]), 2);
        assert_eq!(ring.read(10), vec![4, 5, 6]);
    }

    #[test]
    fn test_read_exact_is_all_or_nothing() {
        let ring = SampleRing::new(32);
        ring.write(&[1, 2, 3]);

        let mut chunk = [0i16; 4];
        assert!(!ring.read_exact(&mut chunk));
        assert_eq!(ring.available(), 3);

        ring.write(&[4, 5]);
        assert!(ring.read_exact(&mut chunk));
        assert_eq!(chunk, [1, 2, 3, 4]);
        assert_eq!(ring.available(), 1);
    }

    #[test]
    fn test_reset_rewinds_cursors() {
        let ring = SampleRing::new(8);
        ring.write(&[1, 2, 3, 4, 5]);
        ring.read(2);
        assert_ne!(ring.cursors(), (0, 0));

        ring.reset();

        assert_eq!(ring.cursors(), (0, 0));
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_tiny_capacity_is_raised() {
        let ring = SampleRing::new(0);
        assert_eq!(ring.capacity(), 2);
        ring.write(&[7, 8]);
        assert_eq!(ring.read(5), vec![8]);
    }

    #[test]
    fn test_concurrent_writer_and_reader_preserve_order() {
        let ring = Arc::new(SampleRing::new(1024));
        let writer_ring = ring.clone();

        let writer = thread::spawn(move || {
            for block in 0..100i16 {
                let samples: Vec<i16> = (0..10).map(|i| block * 10 + i).collect();
                // 1000 samples in total fit in 1023 usable slots.
                writer_ring.write(&samples);
            }
        });

        let mut received = Vec::new();
        while received.len() < 1000 {
            received.extend(ring.read(64));
            thread::yield_now();
        }
        writer.join().unwrap();

        let expected: Vec<i16> = (0..1000).collect();
        assert_eq!(received, expected);
    }
}
