//! Auto-tuner: a three-phase grid search over controller gains.
//!
//! The session never runs on its own. Every paced frame hands it the
//! controller error; once a trial has run for its phase's duration it is
//! scored and the session tells the pacer which gains to load next.
//!
//! Phases narrow the search while lengthening each trial:
//! - `Coarse`: 24 fixed candidates, 8 s each
//! - `Fine`: 5x5 grid around the best result so far, 12 s each
//! - `Precision`: 3x3 grid around the best result so far, 15 s each

use crate::controller::Gains;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A trial is only scored once it holds more than this many samples.
pub const MIN_TRIAL_SAMPLES: usize = 10;

/// Coarse candidates, from conservative to aggressive.
pub const COARSE_CANDIDATES: [Gains; 24] = [
    Gains::new(0.6, 0.020, 0.100),
    Gains::new(0.6, 0.048, 0.237),
    Gains::new(0.6, 0.080, 0.350),
    Gains::new(0.6, 0.120, 0.500),
    Gains::new(1.0, 0.020, 0.100),
    Gains::new(1.0, 0.048, 0.237),
    Gains::new(1.0, 0.080, 0.350),
    Gains::new(1.0, 0.120, 0.500),
    Gains::new(1.4, 0.020, 0.100),
    Gains::new(1.4, 0.048, 0.237),
    Gains::new(1.4, 0.080, 0.350),
    Gains::new(1.4, 0.120, 0.500),
    Gains::new(1.8, 0.020, 0.100),
    Gains::new(1.8, 0.048, 0.237),
    Gains::new(1.8, 0.080, 0.350),
    Gains::new(1.8, 0.120, 0.500),
    Gains::new(2.4, 0.020, 0.100),
    Gains::new(2.4, 0.048, 0.237),
    Gains::new(2.4, 0.080, 0.350),
    Gains::new(2.4, 0.120, 0.500),
    Gains::new(3.2, 0.020, 0.100),
    Gains::new(3.2, 0.048, 0.237),
    Gains::new(3.2, 0.080, 0.350),
    Gains::new(3.2, 0.120, 0.500),
];

const FINE_KP_MULTIPLIERS: [f64; 5] = [0.8, 0.9, 1.0, 1.1, 1.2];
const FINE_KI_MULTIPLIERS: [f64; 5] = [0.7, 0.85, 1.0, 1.15, 1.3];
const PRECISION_MULTIPLIERS: [f64; 3] = [0.95, 1.0, 1.05];

/// Stage of an auto-tuning session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningPhase {
    Coarse,
    Fine,
    Precision,
    Complete,
}

impl TuningPhase {
    pub fn name(&self) -> &'static str {
        match self {
            TuningPhase::Coarse => "Coarse",
            TuningPhase::Fine => "Fine",
            TuningPhase::Precision => "Precision",
            TuningPhase::Complete => "Complete",
        }
    }

    /// How long each trial of this phase runs.
    pub fn trial_duration(&self) -> Duration {
        match self {
            TuningPhase::Coarse => Duration::from_secs(8),
            TuningPhase::Fine => Duration::from_secs(12),
            TuningPhase::Precision => Duration::from_secs(15),
            TuningPhase::Complete => Duration::ZERO,
        }
    }

    /// Number of candidates evaluated in this phase.
    pub fn trial_count(&self) -> usize {
        match self {
            TuningPhase::Coarse => COARSE_CANDIDATES.len(),
            TuningPhase::Fine => FINE_KP_MULTIPLIERS.len() * FINE_KI_MULTIPLIERS.len(),
            TuningPhase::Precision => PRECISION_MULTIPLIERS.len() * PRECISION_MULTIPLIERS.len(),
            TuningPhase::Complete => 0,
        }
    }

    /// Trials run in the phases before this one.
    fn trials_before(&self) -> usize {
        match self {
            TuningPhase::Coarse => 0,
            TuningPhase::Fine => TuningPhase::Coarse.trial_count(),
            TuningPhase::Precision => {
                TuningPhase::Coarse.trial_count() + TuningPhase::Fine.trial_count()
            }
            TuningPhase::Complete => total_trials(),
        }
    }
}

/// Trials in a full session across all phases.
pub fn total_trials() -> usize {
    TuningPhase::Coarse.trial_count()
        + TuningPhase::Fine.trial_count()
        + TuningPhase::Precision.trial_count()
}

/// Fitness of a trial: each factor lies in (0, 1], higher is better.
pub fn score(average_error: f64, max_error: f64, stability: f64) -> f64 {
    (1.0 / (1.0 + average_error)) * (1.0 / (1.0 + 0.5 * max_error)) * (1.0 / (1.0 + stability))
}

/// Scored outcome of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub average_error: f64,
    pub max_error: f64,
    /// Population standard deviation of the per-frame absolute errors.
    pub stability: f64,
    pub score: f64,
}

impl TrialResult {
    /// Score a trial from its per-frame absolute errors. `None` if empty.
    pub fn from_samples(gains: Gains, samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let average_error = samples.iter().sum::<f64>() / n;
        let max_error = samples.iter().copied().fold(0.0, f64::max);
        let variance = samples
            .iter()
            .map(|s| (s - average_error).powi(2))
            .sum::<f64>()
            / n;
        let stability = variance.sqrt();

        Some(Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            average_error,
            max_error,
            stability,
            score: score(average_error, max_error, stability),
        })
    }

    pub fn gains(&self) -> Gains {
        Gains::new(self.kp, self.ki, self.kd)
    }
}

/// Fine grid: kp and ki scaled around `best`, kd held fixed.
pub fn fine_candidates(best: Gains) -> Vec<Gains> {
    let mut candidates = Vec::with_capacity(TuningPhase::Fine.trial_count());
    for kp_mult in FINE_KP_MULTIPLIERS {
        for ki_mult in FINE_KI_MULTIPLIERS {
            candidates.push(Gains::new(best.kp * kp_mult, best.ki * ki_mult, best.kd));
        }
    }
    candidates
}

/// Precision grid: kp scaled by one multiplier, ki and kd by the other.
pub fn precision_candidates(best: Gains) -> Vec<Gains> {
    let mut candidates = Vec::with_capacity(TuningPhase::Precision.trial_count());
    for kp_mult in PRECISION_MULTIPLIERS {
        for ki_mult in PRECISION_MULTIPLIERS {
            candidates.push(Gains::new(
                best.kp * kp_mult,
                best.ki * ki_mult,
                best.kd * ki_mult,
            ));
        }
    }
    candidates
}

/// What the pacer must do after handing a frame to the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuningStep {
    /// The current trial is still collecting samples.
    Continue,
    /// A new trial started; load these gains and reset the controller.
    NextTrial(Gains),
    /// The session is over (completed or aborted); finalize it.
    Finished,
}

/// Results of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub results: Vec<TrialResult>,
    pub best: Option<TrialResult>,
    /// True when all three phases ran to the end.
    pub completed: bool,
}

/// State of an in-progress auto-tuning run.
#[derive(Debug, Clone)]
pub struct TuningSession {
    phase: TuningPhase,
    trial_index: usize,
    candidates: Vec<Gains>,
    results: Vec<TrialResult>,
    best: Option<TrialResult>,
    samples: Vec<f64>,
    trial_start: Instant,
}

impl TuningSession {
    /// Start a session in the coarse phase with trial 0 beginning at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            phase: TuningPhase::Coarse,
            trial_index: 0,
            candidates: COARSE_CANDIDATES.to_vec(),
            results: Vec::with_capacity(total_trials()),
            best: None,
            samples: Vec::with_capacity(1024),
            trial_start: now,
        }
    }

    /// Phase currently running.
    pub fn phase(&self) -> TuningPhase {
        self.phase
    }

    /// Index of the running trial within its phase.
    pub fn trial_index(&self) -> usize {
        self.trial_index
    }

    /// Number of candidates in the running phase.
    pub fn trials_in_phase(&self) -> usize {
        self.candidates.len()
    }

    /// Scored trials, oldest first.
    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }

    /// Best result across the whole session so far.
    pub fn best(&self) -> Option<&TrialResult> {
        self.best.as_ref()
    }

    /// Gains of the trial currently running.
    pub fn current_candidate(&self) -> Option<Gains> {
        self.candidates.get(self.trial_index).copied()
    }

    /// Samples collected by the running trial.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Overall progress through all phases, in percent.
    pub fn progress_pct(&self) -> f64 {
        if self.phase == TuningPhase::Complete {
            return 100.0;
        }
        let done = self.phase.trials_before() + self.trial_index;
        (done as f64 / total_trials() as f64 * 100.0).min(100.0)
    }

    /// Feed one frame's controller error into the running trial.
    pub fn observe(&mut self, error: f64, now: Instant) -> TuningStep {
        if self.phase == TuningPhase::Complete {
            return TuningStep::Finished;
        }

        self.samples.push(error.abs());

        let elapsed = now.saturating_duration_since(self.trial_start);
        if elapsed < self.phase.trial_duration() || self.samples.len() <= MIN_TRIAL_SAMPLES {
            return TuningStep::Continue;
        }

        let Some(gains) = self.current_candidate() else {
            return TuningStep::Finished;
        };
        if let Some(result) = TrialResult::from_samples(gains, &self.samples) {
            self.record(result);
        }

        self.trial_index += 1;
        if self.trial_index >= self.candidates.len() && !self.advance_phase() {
            return TuningStep::Finished;
        }

        self.samples.clear();
        self.trial_start = now;

        match self.current_candidate() {
            Some(next) => TuningStep::NextTrial(next),
            None => TuningStep::Finished,
        }
    }

    fn record(&mut self, result: TrialResult) {
        debug!(
            phase = self.phase.name(),
            trial = self.trial_index,
            kp = result.kp,
            ki = result.ki,
            kd = result.kd,
            average_error = result.average_error,
            max_error = result.max_error,
            stability = result.stability,
            score = result.score,
            "Tuning trial complete"
        );

        let improved = self.best.map_or(true, |best| result.score > best.score);
        if improved {
            self.best = Some(result);
        }
        self.results.push(result);
    }

    /// Move to the next phase. Returns false when the session is over.
    fn advance_phase(&mut self) -> bool {
        let next = match self.phase {
            TuningPhase::Coarse => TuningPhase::Fine,
            TuningPhase::Fine => TuningPhase::Precision,
            TuningPhase::Precision | TuningPhase::Complete => {
                self.phase = TuningPhase::Complete;
                return false;
            }
        };

        let Some(best) = self.best.map(|b| b.gains()) else {
            return false;
        };

        self.candidates = match next {
            TuningPhase::Fine => fine_candidates(best),
            _ => precision_candidates(best),
        };
        self.phase = next;
        self.trial_index = 0;

        info!(
            phase = next.name(),
            trials = self.candidates.len(),
            kp = best.kp,
            ki = best.ki,
            kd = best.kd,
            "Tuning advanced to next phase"
        );
        true
    }

    /// Consume the session into its report.
    pub fn into_report(self) -> TuningReport {
        TuningReport {
            completed: self.phase == TuningPhase::Complete,
            results: self.results,
            best: self.best,
        }
    }
}
