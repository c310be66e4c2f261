//! Small bounded queue between the sink pump and the device callback.
//!
//! The pump thread pushes device-rate interleaved `f32` samples; the CPAL callback drains
//! them without blocking. Neither side ever waits on the other.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bounded queue of interleaved `f32` samples.
///
/// The `channels` count is fixed for the lifetime of the queue. Samples are stored
/// interleaved: `frame0[ch0], frame0[ch1], ..., frame1[ch0], ...`
pub(crate) struct SampleQueue {
    channels: usize,
    inner: Mutex<VecDeque<f32>>,
    max_buffered_samples: usize,
}

/// Queue capacity in samples for a `(rate, channels, seconds)` target.
///
/// Non-finite or non-positive `buffer_seconds` falls back to 0.25 s.
pub(crate) fn calc_max_buffered_samples(
    rate_hz: u32,
    channels: usize,
    buffer_seconds: f32,
) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.25
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SampleQueue {
    pub(crate) fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(VecDeque::with_capacity(max_buffered_samples)),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    /// Free space in samples.
    pub(crate) fn free_samples(&self) -> usize {
        self.max_buffered_samples.saturating_sub(self.lock().len())
    }

    /// Current buffered frames (best-effort snapshot).
    pub(crate) fn len_frames(&self) -> usize {
        self.lock().len() / self.channels
    }

    /// Push as many whole frames of `samples` as fit; returns the samples accepted.
    pub(crate) fn push_interleaved(&self, samples: &[f32]) -> usize {
        let mut g = self.lock();
        let free = self.max_buffered_samples.saturating_sub(g.len());
        let take = (samples.len().min(free) / self.channels) * self.channels;
        g.extend(&samples[..take]);
        take
    }

    /// Return up to `max_frames` frames, or `None` if the queue is currently empty.
    pub(crate) fn pop(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let available_frames = g.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }
        Some(g.drain(..take_samples).collect())
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 0.5), 48_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 24_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 24_000);
    }

    #[test]
    fn pop_empty_returns_none() {
        let q = SampleQueue::new(2, 16);
        assert!(q.pop(4).is_none());
    }

    #[test]
    fn pop_returns_available_frames_in_order() {
        let q = SampleQueue::new(2, 64);
        q.push_interleaved(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let out = q.pop(2).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(q.len_frames(), 1);
    }

    #[test]
    fn push_accepts_only_whole_frames_that_fit() {
        let q = SampleQueue::new(2, 6);
        assert_eq!(q.push_interleaved(&[0.0; 5]), 4);
        assert_eq!(q.free_samples(), 2);
        assert_eq!(q.push_interleaved(&[0.0; 4]), 2);
        assert_eq!(q.free_samples(), 0);
        assert_eq!(q.push_interleaved(&[0.0; 2]), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let q = SampleQueue::new(1, 8);
        q.push_interleaved(&[0.5; 8]);
        q.clear();
        assert_eq!(q.len_frames(), 0);
        assert_eq!(q.channels(), 1);
    }
}
