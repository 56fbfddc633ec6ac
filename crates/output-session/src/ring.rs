//! Fixed-capacity ring for interleaved f32 frames.
//!
//! Models the device-side ring buffer behind the cpal backend: the submit
//! path commits whole buffers when headroom allows, the output callback
//! drains from the front, and occupancy is what the session polls as the
//! device's queued-frame count.
//!
//! Writes are all-or-nothing. Partial commits would split a submission
//! across two ring generations and break the "fully handed to the device"
//! contract, so a short ring declines instead.

use std::collections::VecDeque;
use std::sync::Mutex;

pub struct FrameRing {
    channels: usize,
    capacity_frames: usize,
    inner: Mutex<VecDeque<f32>>,
}

impl FrameRing {
    /// A ring holding up to `capacity_frames` interleaved frames of
    /// `channels` channels. Capacity is fixed for the ring's lifetime.
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity_frames,
            inner: Mutex::new(VecDeque::with_capacity(capacity_frames * channels)),
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Channel count of the interleaved stream carried by this ring.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current occupancy in whole frames (best-effort snapshot).
    pub fn queued_frames(&self) -> usize {
        let g = self.inner.lock().unwrap();
        g.len() / self.channels
    }

    /// Commit `samples` (whole interleaved frames) if the ring has room for
    /// all of them; decline otherwise.
    pub fn write(&self, samples: &[f32]) -> bool {
        if samples.is_empty() || samples.len() % self.channels != 0 {
            return false;
        }
        let mut g = self.inner.lock().unwrap();
        let capacity_samples = self.capacity_frames * self.channels;
        if g.len() + samples.len() > capacity_samples {
            return false;
        }
        g.extend(samples.iter().copied());
        true
    }

    /// Drain up to `out.len()` samples from the front, oldest first.
    ///
    /// Returns the sample count written; the remainder of `out` is left
    /// untouched (the callback zero-fills it).
    pub fn read_into(&self, out: &mut [f32]) -> usize {
        let mut g = self.inner.lock().unwrap();
        let take = out.len().min(g.len());
        for slot in out.iter_mut().take(take) {
            *slot = g.pop_front().unwrap_or(0.0);
        }
        take
    }

    /// Discard all queued audio, returning the ring to position zero.
    pub fn clear(&self) {
        let mut g = self.inner.lock().unwrap();
        g.clear();
    }
}
