//! Remaining-time estimate for a gate sweep.

use std::time::Duration;
use tokio::time::Instant;

/// Extrapolates the remaining run time from the mean duration of completed gate steps.
#[derive(Debug, Clone)]
pub struct TimeEstimator {
    started: Instant,
    total_steps: usize,
    completed: usize,
}

impl TimeEstimator {
    /// Start timing a run of `total_steps` gate steps
    pub fn start(total_steps: usize) -> Self {
        Self {
            started: Instant::now(),
            total_steps,
            completed: 0,
        }
    }

    /// Record a finished step and return the estimated time left
    pub fn step_completed(&mut self) -> Duration {
        self.completed = (self.completed + 1).min(self.total_steps);
        self.remaining()
    }

    /// Estimated time left, zero before the first step completes
    pub fn remaining(&self) -> Duration {
        if self.completed == 0 {
            return Duration::ZERO;
        }
        let per_step = self.started.elapsed().as_secs_f64() / self.completed as f64;
        Duration::from_secs_f64(per_step * (self.total_steps - self.completed) as f64)
    }

    /// Time since start
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// `h:mm:ss` rendering for log lines.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn extrapolates_from_completed_steps() {
        let mut estimator = TimeEstimator::start(4);
        assert_eq!(estimator.remaining(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(10)).await;
        let remaining = estimator.step_completed();
        assert_eq!(remaining.as_secs(), 30);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(estimator.step_completed().as_secs(), 20);
    }

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_duration(Duration::from_secs(59)), "0:00:59");
    }
}
