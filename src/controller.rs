//! PID controller core.
//!
//! The controller does not compute a sleep from scratch each frame. It holds
//! a sleep commitment and nudges it by a damped PID output, so the loop
//! converges on whatever extra wait the host's work leaves room for.

use serde::{Deserialize, Serialize};

/// Fixed damping applied to the raw PID output before it moves the commitment.
pub const OUTPUT_DAMPING: f64 = 0.2;

/// Upper bound of the sleep commitment, as a multiple of the target.
pub const MAX_SLEEP_FACTOR: f64 = 1.2;

/// Integral clamp, as a multiple of the target.
pub const INTEGRAL_LIMIT_FACTOR: f64 = 2.0;

/// Margin (ms) below the target used to seed the first commitment.
pub const SEED_MARGIN_MS: f64 = 1.0;

/// Controller coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    /// Empirically tuned defaults.
    pub const DEFAULT: Gains = Gains::new(1.8, 0.048, 0.237);

    /// Create a gain set.
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    /// Get the gains as `(kp, ki, kd)`.
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    /// All three coefficients are finite.
    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()
    }
}

impl Default for Gains {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<(f64, f64, f64)> for Gains {
    fn from((kp, ki, kd): (f64, f64, f64)) -> Self {
        Self::new(kp, ki, kd)
    }
}

/// Target frame time usable as a clamp bound.
///
/// Non-positive and non-finite targets collapse to zero, which pins both the
/// integral and the commitment at zero instead of producing NaN or an
/// inverted clamp range.
pub fn effective_target(target_ms: f64) -> f64 {
    if target_ms.is_finite() && target_ms > 0.0 {
        target_ms
    } else {
        0.0
    }
}

/// Per-frame PID control law with anti-windup.
#[derive(Debug, Clone, Default)]
pub struct PidController {
    gains: Gains,
    previous_error: f64,
    integral: f64,
    commanded_sleep_ms: f64,
}

impl PidController {
    /// Create a controller with zeroed state.
    pub fn new(gains: Gains) -> Self {
        Self {
            gains,
            ..Self::default()
        }
    }

    /// Get the live gains.
    pub fn gains(&self) -> Gains {
        self.gains
    }

    /// Replace the live gains. Controller state is left untouched.
    pub fn set_gains(&mut self, gains: Gains) {
        self.gains = gains;
    }

    /// Get the error from the last control step.
    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    /// Get the accumulated error.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Get the current sleep commitment in milliseconds.
    pub fn commanded_sleep_ms(&self) -> f64 {
        self.commanded_sleep_ms
    }

    /// Seed the commitment for the first frame, just under the target.
    pub fn seed(&mut self, target_ms: f64) {
        self.commanded_sleep_ms = (effective_target(target_ms) - SEED_MARGIN_MS).max(0.0);
    }

    /// Run one control step against the smoothed frame time.
    ///
    /// Returns the error (`target - smoothed`). Positive error means frames
    /// are finishing early and the commitment grows.
    pub fn update(&mut self, target_ms: f64, smoothed_ms: f64) -> f64 {
        let target = effective_target(target_ms);
        let error = target - smoothed_ms;

        let integral_limit = INTEGRAL_LIMIT_FACTOR * target;
        let integral = self.integral + error;
        self.integral = if integral.is_finite() {
            integral.clamp(-integral_limit, integral_limit)
        } else {
            0.0
        };

        let derivative = error - self.previous_error;
        let output =
            self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;

        let max_sleep = MAX_SLEEP_FACTOR * target;
        let next = self.commanded_sleep_ms + output * OUTPUT_DAMPING;
        let next = if next.is_finite() {
            next
        } else {
            self.commanded_sleep_ms
        };
        self.commanded_sleep_ms = next.clamp(0.0, max_sleep);

        self.previous_error = if error.is_finite() { error } else { 0.0 };
        error
    }

    /// Zero the error terms and the commitment. Gains are kept.
    pub fn reset(&mut self) {
        self.previous_error = 0.0;
        self.integral = 0.0;
        self.commanded_sleep_ms = 0.0;
    }
}
