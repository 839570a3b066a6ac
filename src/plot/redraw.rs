//! Periodic redraw loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::plot::PlotSurface;
use crate::sweep::cancel::CancelFlag;

/// Redraw every panel each `interval` until `cancel` is set.
///
/// The flag is checked at each iteration boundary, so the loop ends within one interval of the
/// flag being set. Never touches acquisition state.
pub async fn redraw_loop(surface: Arc<dyn PlotSurface>, cancel: CancelFlag, interval: Duration) {
    let mut iterations = 0u64;
    while !cancel.is_set() {
        surface.redraw_all();
        iterations += 1;
        tokio::time::sleep(interval).await;
    }
    debug!(iterations, "Redraw loop stopped");
}

/// Spawn `redraw_loop` on the runtime.
pub fn spawn_redraw(
    surface: Arc<dyn PlotSurface>,
    cancel: CancelFlag,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(redraw_loop(surface, cancel, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::HeadlessSurface;

    #[tokio::test(start_paused = true)]
    async fn redraws_until_cancelled() {
        let surface = Arc::new(HeadlessSurface::new());
        let cancel = CancelFlag::new();
        let handle = spawn_redraw(surface.clone(), cancel.clone(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel("test finished");
        handle.await.unwrap();

        // t = 0, 5, 10
        assert_eq!(surface.redraw_count(), 3);
    }

    #[tokio::test]
    async fn preset_flag_never_redraws() {
        let surface = Arc::new(HeadlessSurface::new());
        let cancel = CancelFlag::new();
        cancel.cancel("already done");
        redraw_loop(surface.clone(), cancel, Duration::from_secs(5)).await;
        assert_eq!(surface.redraw_count(), 0);
    }
}
