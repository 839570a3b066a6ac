//! Sweep controller states.

use serde::{Deserialize, Serialize};

/// Lifecycle of one gate sweep.
///
/// # State Machine
///
/// ```text
/// Idle ──> SettingGate ──> SweepingUp ──> SweepingDown ──> SweepingBack ──> AnalyzingStep
///               ▲                                                               │
///               └────────────── next gate value ────────────────────────────────┤
///                                                                               ▼
///                                                                             Done
///
/// any non-terminal state ──cancel──> Cancelled
/// any non-terminal state ──instrument error──> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    /// Not started
    Idle,
    /// Commanding the gate source
    SettingGate,
    /// Drive 0 to +max
    SweepingUp,
    /// Drive +max to -max
    SweepingDown,
    /// Drive -max to 0
    SweepingBack,
    /// Computing resistance and critical currents of the finished column
    AnalyzingStep,
    /// Every gate value measured
    Done,
    /// Stopped by the cancellation flag
    Cancelled,
    /// Stopped by an instrument error
    Failed,
}

impl std::fmt::Display for SweepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepState::Idle => write!(f, "Idle"),
            SweepState::SettingGate => write!(f, "SettingGate"),
            SweepState::SweepingUp => write!(f, "SweepingUp"),
            SweepState::SweepingDown => write!(f, "SweepingDown"),
            SweepState::SweepingBack => write!(f, "SweepingBack"),
            SweepState::AnalyzingStep => write!(f, "AnalyzingStep"),
            SweepState::Done => write!(f, "Done"),
            SweepState::Cancelled => write!(f, "Cancelled"),
            SweepState::Failed => write!(f, "Failed"),
        }
    }
}

impl SweepState {
    /// Check if the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SweepState::Done | SweepState::Cancelled | SweepState::Failed
        )
    }

    /// Check if the drive source is being stepped.
    pub fn is_sweeping(&self) -> bool {
        matches!(
            self,
            SweepState::SweepingUp | SweepState::SweepingDown | SweepState::SweepingBack
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SweepState::Done.is_terminal());
        assert!(SweepState::Cancelled.is_terminal());
        assert!(SweepState::Failed.is_terminal());
        assert!(!SweepState::AnalyzingStep.is_terminal());
        assert!(SweepState::SweepingDown.is_sweeping());
        assert!(!SweepState::SettingGate.is_sweeping());
        assert_eq!(SweepState::SweepingBack.to_string(), "SweepingBack");
    }
}
