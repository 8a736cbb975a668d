//! Clock and sleep primitive.
//!
//! OS sleep alone has millisecond-scale jitter and a pure spin burns a whole
//! core, so waits combine the two: a coarse `thread::sleep` for the bulk of
//! the duration, then a spin on the monotonic clock for the tail.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// Waits longer than this (ms) start with an OS sleep.
pub const COARSE_THRESHOLD_MS: f64 = 5.0;

/// Portion (ms) of a long wait left to the spin phase.
pub const SPIN_THRESHOLD_MS: f64 = 0.5;

/// Final stretch (ms) of the spin phase that never yields.
pub const YIELD_CUTOFF_MS: f64 = 0.05;

/// Thresholds for the hybrid sleep/spin wait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub coarse_threshold_ms: f64,
    pub spin_threshold_ms: f64,
    pub yield_cutoff_ms: f64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            coarse_threshold_ms: COARSE_THRESHOLD_MS,
            spin_threshold_ms: SPIN_THRESHOLD_MS,
            yield_cutoff_ms: YIELD_CUTOFF_MS,
        }
    }
}

/// Hybrid wait strategy: coarse OS sleep followed by a yielding spin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HybridWait {
    config: WaitConfig,
}

impl HybridWait {
    /// Create a wait strategy with the given thresholds.
    pub fn new(config: WaitConfig) -> Self {
        Self { config }
    }

    /// Block the calling thread for approximately `ms` milliseconds.
    ///
    /// Never returns early. Non-positive or non-finite durations return
    /// immediately.
    pub fn wait(&self, ms: f64) {
        if !ms.is_finite() || ms <= 0.0 {
            return;
        }

        let start = Instant::now();
        let total = duration_from_ms(ms);

        if ms > self.config.coarse_threshold_ms {
            thread::sleep(duration_from_ms(ms - self.config.spin_threshold_ms));
        }

        let no_yield = duration_from_ms(self.config.yield_cutoff_ms);
        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }
            if total - elapsed > no_yield {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Block for approximately `ms` milliseconds using the default thresholds.
pub fn wait(ms: f64) {
    HybridWait::default().wait(ms);
}

/// Convert milliseconds to a `Duration`.
///
/// Non-positive and NaN inputs give zero; values too large for a `Duration`
/// saturate at `Duration::MAX`.
pub fn duration_from_ms(ms: f64) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
}

/// Milliseconds elapsed from `earlier` to `later`, zero if `later` precedes it.
pub fn elapsed_ms(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_non_positive_is_noop() {
        let start = Instant::now();
        wait(0.0);
        wait(-5.0);
        wait(f64::NAN);
        wait(f64::NEG_INFINITY);
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_wait_short_spin_never_early() {
        let start = Instant::now();
        wait(2.0);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn test_wait_long_hybrid_never_early() {
        let start = Instant::now();
        wait(12.0);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(12));
        // Generous upper bound; CI schedulers are noisy.
        assert!(elapsed < Duration::from_millis(250));
    }

    #[test]
    fn test_elapsed_ms_saturates() {
        let now = Instant::now();
        let later = now + Duration::from_micros(16_670);
        assert!((elapsed_ms(now, later) - 16.67).abs() < 1e-9);
        assert_eq!(elapsed_ms(later, now), 0.0);
    }

    #[test]
    fn test_duration_from_ms_saturates() {
        assert_eq!(duration_from_ms(f64::MAX), Duration::MAX);
        assert_eq!(duration_from_ms(f64::INFINITY), Duration::MAX);
        assert_eq!(duration_from_ms(1.2e30), Duration::MAX);
        assert_eq!(duration_from_ms(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_ms(-3.0), Duration::ZERO);
        assert_eq!(duration_from_ms(0.0), Duration::ZERO);
        assert_eq!(duration_from_ms(2.5), Duration::from_micros(2500));
    }

    #[test]
    fn test_default_thresholds() {
        let config = WaitConfig::default();
        assert_eq!(config.coarse_threshold_ms, 5.0);
        assert_eq!(config.spin_threshold_ms, 0.5);
        assert_eq!(config.yield_cutoff_ms, 0.05);
    }
}
