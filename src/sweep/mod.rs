//! Sweep engine
//!
//! Pure building blocks (waveform, classifier, estimators) plus the controller state machine that
//! runs them against the instruments.

pub mod buffers;
pub mod cancel;
pub mod classifier;
pub mod controller;
pub mod critical;
pub mod plan;
pub mod resistance;
pub mod state;
pub mod timing;
pub mod waveform;

pub use cancel::CancelFlag;
pub use controller::{RunOutcome, SweepController};
pub use plan::SweepPlan;
pub use state::SweepState;
