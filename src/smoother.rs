//! Frame time smoother.
//!
//! A short rolling window over raw frame times so a single outlier frame
//! (scheduler hiccup, allocation stall) does not reach the controller
//! at full strength.

use std::collections::VecDeque;

/// Number of frame-time samples averaged by the smoother.
pub const SMOOTHING_WINDOW: usize = 10;

/// Ring buffer of frame times with a running sum.
///
/// `average()` is O(1); the buffer is allocated once and never grows past
/// its capacity.
#[derive(Debug, Clone)]
pub struct FrameTimeSmoother {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl FrameTimeSmoother {
    /// Create a smoother with the default window (10 samples).
    pub fn new() -> Self {
        Self::with_capacity(SMOOTHING_WINDOW)
    }

    /// Create a smoother with a specific window size (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    /// Record a frame time, evicting the oldest sample if at capacity.
    pub fn record(&mut self, sample_ms: f64) {
        if self.samples.len() >= self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        self.samples.push_back(sample_ms);
        self.sum += sample_ms;
    }

    /// Mean of the samples in the window, 0.0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sum / self.samples.len() as f64
    }

    /// Most recently recorded sample.
    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Number of samples currently in the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// No samples recorded since construction or the last clear.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all samples and zero the running sum.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
    }
}

impl Default for FrameTimeSmoother {
    fn default() -> Self {
        Self::new()
    }
}
