//! Bounded queue of interleaved `i16` samples between device writes and the stream callback.
//!
//! - writers block while the queue is full (this is what makes device writes blocking)
//! - the cpal callback drains it without blocking
//! - `close()` wakes everybody and makes further pushes fail


use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Thread-safe bounded queue of interleaved samples.
///
/// The `done` flag lives under the same mutex as the samples so close/push/pop
/// observe a consistent state. A single [`Condvar`] signals every state change.
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct QueueInner {
    samples: VecDeque<i16>,
    done: bool,
    popped_total: u64,
}

/// Queue capacity in samples for `buffer_seconds` of audio at `(rate_hz, channels)`.
///
/// Non-finite or non-positive durations fall back to half a second. Never returns less
/// than one frame.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.5
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.max(1).saturating_mul(channels)
}

impl SampleQueue {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                done: false,
                popped_total: 0,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Discard everything buffered.
    pub fn clear(&self) {
        self.lock().samples.clear();
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before every sample was accepted.
    pub fn push_blocking(&self, samples: &[i16]) -> bool {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.lock();

            while g.samples.len() >= self.max_buffered_samples && !g.done {
                g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if g.done {
                return false;
            }

            let room = self.max_buffered_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pop up to `max_frames` whole frames into `out` without blocking.
    ///
    /// Returns the number of frames copied; `0` when nothing is buffered.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut g = self.lock();
        let frames = (g.samples.len() / self.channels).min(out.len() / self.channels);
        let take = frames * self.channels;
        for (slot, sample) in out.iter_mut().zip(g.samples.drain(..take)) {
            *slot = sample;
        }
        g.popped_total += take as u64;
        drop(g);
        if take > 0 {
            self.cv.notify_all();
        }
        frames
    }

    /// Block until the queue is empty.
    ///
    /// Gives up with `false` when the consumer makes no progress for `stall_timeout`
    /// (for example because the output stream died) or when the queue is closed with
    /// samples still buffered.
    pub fn wait_until_empty(&self, stall_timeout: Duration) -> bool {
        let mut g = self.lock();
        let mut last_popped = g.popped_total;
        loop {
            if g.samples.is_empty() {
                return true;
            }
            if g.done {
                return false;
            }
            let (ng, timeout) = self
                .cv
                .wait_timeout(g, stall_timeout)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            g = ng;
            if timeout.timed_out() {
                if g.popped_total == last_popped {
                    return g.samples.is_empty();
                }
                last_popped = g.popped_total;
            }
        }
    }
}
