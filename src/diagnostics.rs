//! Read-only views of pacer state.
//!
//! Everything here is a plain copy taken at query time; building a snapshot
//! never touches the controller.

use crate::controller::Gains;
use crate::tuner::{TrialResult, TuningPhase, TuningSession};
use serde::{Deserialize, Serialize};

/// Running frame counters kept by the pacer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameCounters {
    /// Frames handed to `pace`, including seed frames.
    pub frames_paced: u64,
    /// Frames whose commitment was large enough to wait on.
    pub frames_waited: u64,
    /// Sum of all committed waits, in milliseconds.
    pub total_wait_ms: f64,
}

impl FrameCounters {
    /// Count one paced frame and its committed wait.
    pub fn record_frame(&mut self, wait_ms: f64) {
        self.frames_paced += 1;
        if wait_ms > 0.0 {
            self.frames_waited += 1;
            self.total_wait_ms += wait_ms;
        }
    }

    /// Mean committed wait over the frames that waited.
    pub fn average_wait_ms(&self) -> f64 {
        if self.frames_waited == 0 {
            0.0
        } else {
            self.total_wait_ms / self.frames_waited as f64
        }
    }
}

/// Controller state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub smoothed_frame_time_ms: f64,
    /// Raw frame time of the newest sample, 0.0 before any.
    pub last_frame_time_ms: f64,
    pub fps: f64,
    pub gains: Gains,
    pub previous_error: f64,
    pub integral: f64,
    pub commanded_sleep_ms: f64,
    pub initialized: bool,
    pub counters: FrameCounters,
}

/// Frames per second for a frame time, 0.0 for a non-positive frame time.
pub fn fps_from_frame_time(frame_time_ms: f64) -> f64 {
    if frame_time_ms > 0.0 && frame_time_ms.is_finite() {
        1000.0 / frame_time_ms
    } else {
        0.0
    }
}

/// Progress of auto-tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningStatus {
    pub active: bool,
    pub phase: TuningPhase,
    pub current_trial: u32,
    pub total_trials: u32,
    /// Trials scored so far across all phases.
    pub completed_trials: u32,
    /// Error samples gathered by the running trial.
    pub trial_samples: u32,
    pub progress_pct: f64,
    pub best: Option<TrialResult>,
}

impl TuningStatus {
    /// Status of a running session.
    pub fn from_session(session: &TuningSession) -> Self {
        Self {
            active: true,
            phase: session.phase(),
            current_trial: session.trial_index() as u32,
            total_trials: session.trials_in_phase() as u32,
            completed_trials: session.results().len() as u32,
            trial_samples: session.sample_count() as u32,
            progress_pct: session.progress_pct(),
            best: session.best().copied(),
        }
    }

    /// Status when no session is running. `best` carries over the
    /// outcome of the last finished session, if any.
    pub fn inactive(last_best: Option<TrialResult>) -> Self {
        Self {
            active: false,
            phase: TuningPhase::Complete,
            current_trial: 0,
            total_trials: 0,
            completed_trials: 0,
            trial_samples: 0,
            progress_pct: 0.0,
            best: last_best,
        }
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        if !self.active {
            return match self.best {
                Some(best) => format!(
                    "idle (last best: kp={:.3} ki={:.4} kd={:.3} score={:.4})",
                    best.kp, best.ki, best.kd, best.score
                ),
                None => "idle".to_string(),
            };
        }
        format!(
            "{} trial {}/{} ({:.1}%)",
            self.phase.name(),
            self.current_trial + 1,
            self.total_trials,
            self.progress_pct
        )
    }
}
