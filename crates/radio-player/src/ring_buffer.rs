//! Bounded, duration-addressable PCM byte buffer.
//!
//! One ingestion worker writes decoded PCM, one output sink reads it. The buffer is the
//! pipeline's backpressure signal (`nearly_full`) and its starvation signal
//! (`buffered_duration`).
//!
//! Writers stall instead of dropping data; readers never block. `close()` releases a
//! stalled writer during teardown.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Free space below which the buffer reports itself nearly full.
pub const NEARLY_FULL_HEADROOM: Duration = Duration::from_millis(250);

/// Decoded PCM layout, fixed for the lifetime of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bits per sample (integer PCM).
    pub bits_per_sample: u16,
}

impl SampleFormat {
    /// Bytes of one interleaved frame (all channels).
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Average byte rate of the format.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }
}

/// Fixed-capacity single-producer/single-consumer PCM queue.
pub struct RingBuffer {
    format: SampleFormat,
    capacity: usize,
    inner: Mutex<RingInner>,
    cv: Condvar,
}

struct RingInner {
    data: Vec<u8>,
    head: usize,
    len: usize,
    closed: bool,
}

impl RingBuffer {
    /// Allocate a buffer holding `duration` of audio in `format`.
    ///
    /// Capacity is rounded down to whole frames and is at least one frame.
    pub fn new(format: SampleFormat, duration: Duration) -> Self {
        let block = format.block_align().max(1);
        let bytes =
            (format.bytes_per_second() as u128 * duration.as_nanos() / 1_000_000_000) as usize;
        let capacity = (bytes / block).max(1) * block;
        Self {
            format,
            capacity,
            inner: Mutex::new(RingInner {
                data: vec![0; capacity],
                head: 0,
                len: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered (best-effort snapshot).
    pub fn filled_bytes(&self) -> usize {
        self.lock().len
    }

    /// Capacity expressed as audio duration.
    pub fn capacity_duration(&self) -> Duration {
        bytes_to_duration(self.capacity, self.format)
    }

    /// Buffered audio expressed as duration; drives the playback state machine.
    pub fn buffered_duration(&self) -> Duration {
        bytes_to_duration(self.filled_bytes(), self.format)
    }

    /// `true` when less than [`NEARLY_FULL_HEADROOM`] of free space remains.
    ///
    /// The ingestion worker backs off instead of pulling the next frame while this holds.
    pub fn nearly_full(&self) -> bool {
        let free = self.capacity - self.filled_bytes();
        let headroom =
            self.format.bytes_per_second() as u128 * NEARLY_FULL_HEADROOM.as_millis() / 1000;
        (free as u128) < headroom
    }

    /// Whether the buffer has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark the buffer closed and wake a stalled writer. Idempotent.
    ///
    /// Buffered data stays readable; further writes are refused.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Append PCM, stalling while the buffer is full.
    ///
    /// Returns the number of bytes stored. This is less than `bytes.len()` only when the
    /// buffer was closed while waiting.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut offset = 0;
        let mut g = self.lock();
        while offset < bytes.len() {
            while g.len >= self.capacity && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.closed {
                break;
            }

            let free = self.capacity - g.len;
            let take = free.min(bytes.len() - offset);
            let tail = (g.head + g.len) % self.capacity;
            let first = take.min(self.capacity - tail);
            g.data[tail..tail + first].copy_from_slice(&bytes[offset..offset + first]);
            if first < take {
                let rest = take - first;
                g.data[..rest].copy_from_slice(&bytes[offset + first..offset + take]);
            }
            g.len += take;
            offset += take;
        }
        offset
    }

    /// Move up to `out.len()` of the oldest bytes into `out` without blocking.
    ///
    /// Reads are rounded down to whole frames so channel interleaving is preserved.
    /// Returns the number of bytes copied (possibly zero).
    pub fn read_into(&self, out: &mut [u8]) -> usize {
        let block = self.format.block_align().max(1);
        let mut g = self.lock();
        let take = (out.len().min(g.len) / block) * block;
        if take == 0 {
            return 0;
        }

        let first = take.min(self.capacity - g.head);
        out[..first].copy_from_slice(&g.data[g.head..g.head + first]);
        if first < take {
            out[first..take].copy_from_slice(&g.data[..take - first]);
        }
        g.head = (g.head + take) % self.capacity;
        g.len -= take;
        drop(g);
        self.cv.notify_all();
        take
    }

    /// Remove and return up to `max_bytes` of the oldest data without blocking.
    pub fn read(&self, max_bytes: usize) -> Vec<u8> {
        let mut out = vec![0; max_bytes.min(self.capacity)];
        let n = self.read_into(&mut out);
        out.truncate(n);
        out
    }
}

fn bytes_to_duration(bytes: usize, format: SampleFormat) -> Duration {
    let bps = format.bytes_per_second();
    if bps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(bytes as f64 / bps as f64)
}
