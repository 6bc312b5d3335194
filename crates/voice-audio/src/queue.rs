//! Queues used by the playback and capture paths.
//!
//! - [`PlaybackQueue`]: FIFO of processed frames owned by the scheduler (single consumer).
//! - [`SampleQueue`]: bounded, thread-safe sample pipe from the input device callback
//!   to the capture worker. The device side never blocks; the worker side blocks
//!   until a full block is available or the queue is closed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One processed mono frame awaiting playback.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Sample rate that was current when the frame was enqueued.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Ordered frames awaiting output. Insertion order is playback order.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    frames: VecDeque<AudioFrame>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<AudioFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Compute a queue capacity in samples for `(rate, seconds)`.
///
/// Non-finite or non-positive `buffer_seconds` falls back to 2 seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };
    (rate_hz as f32 * secs).ceil() as usize
}

/// Bounded mono sample queue between a device callback and a worker thread.
pub struct SampleQueue {
    inner: Mutex<SampleInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    overflow_samples: AtomicU64,
}

struct SampleInner {
    queue: VecDeque<f32>,
    done: bool,
    last_overflow_log: Option<Instant>,
}

impl SampleQueue {
    pub fn new(max_buffered_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SampleInner {
                queue: VecDeque::new(),
                done: false,
                last_overflow_log: None,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(1),
            overflow_samples: AtomicU64::new(0),
        }
    }

    /// Total samples discarded because the queue was full.
    pub fn overflow_samples(&self) -> u64 {
        self.overflow_samples.load(Ordering::Relaxed)
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.done = true;
        }
        self.cv.notify_all();
    }

    /// Push samples without blocking. Samples beyond capacity are dropped.
    ///
    /// Returns the number of samples dropped. Closed queues drop everything.
    pub fn push_or_drop(&self, samples: &[f32]) -> usize {
        let Ok(mut g) = self.inner.lock() else {
            return samples.len();
        };
        if g.done {
            return samples.len();
        }

        let room = self.max_buffered_samples.saturating_sub(g.queue.len());
        let take = room.min(samples.len());
        g.queue.extend(samples[..take].iter().copied());
        let dropped = samples.len() - take;

        if dropped > 0 {
            let total = self
                .overflow_samples
                .fetch_add(dropped as u64, Ordering::Relaxed)
                + dropped as u64;
            let now = Instant::now();
            let due = g
                .last_overflow_log
                .map(|t| now.duration_since(t) > Duration::from_secs(1))
                .unwrap_or(true);
            if due {
                g.last_overflow_log = Some(now);
                tracing::warn!(
                    dropped_samples = dropped,
                    total_dropped = total,
                    capacity = self.max_buffered_samples,
                    "capture queue overflow"
                );
            }
        }

        drop(g);
        if take > 0 {
            self.cv.notify_all();
        }
        dropped
    }

    /// Block until exactly `samples` are available and take them.
    ///
    /// Returns `None` when the queue is closed before a full block arrives.
    pub fn pop_block(&self, samples: usize) -> Option<Vec<f32>> {
        let want = samples.max(1);
        let mut g = self.inner.lock().ok()?;
        while g.queue.len() < want && !g.done {
            g = self.cv.wait(g).ok()?;
        }
        if g.queue.len() < want {
            return None;
        }
        Some(g.queue.drain(..want).collect())
    }
}
