//! Adaptive frame pacer.
//!
//! Paces a render/update loop to a target frame time with a PID controller
//! that adjusts a sleep commitment every frame, and can discover gains for
//! the host machine with a three-phase auto-tuning search.
//!
//! ```no_run
//! use frame_pacer::FramePacer;
//!
//! let mut pacer = FramePacer::new();
//! loop {
//!     // update and render the frame
//!     pacer.pace(1000.0 / 60.0);
//! }
//! ```

pub mod clock;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod pacer;
pub mod smoother;
pub mod tuner;

pub use config::{ConfigManager, PacerConfig};
pub use controller::Gains;
pub use diagnostics::{DiagnosticsSnapshot, TuningStatus};
pub use error::{ConfigError, LoggingError, PacerError};
pub use pacer::FramePacer;
pub use tuner::{TrialResult, TuningPhase, TuningReport};
