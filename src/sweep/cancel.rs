//! Cooperative cancellation shared by the acquisition and redraw tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-way stop flag. Clones share the same state; once set it stays set.
///
/// The controller checks it after every point and every gate step; the redraw loop checks it at
/// every iteration. Closing the measurement window, Ctrl-C and the end of acquisition all set it.
#[derive(Clone)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<std::sync::RwLock<Option<String>>>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelFlag")
            .field("set", &self.is_set())
            .field("reason", &self.reason())
            .finish()
    }
}

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(std::sync::RwLock::new(None)),
        }
    }

    /// Set the flag. The first reason given is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            if let Ok(mut r) = self.reason.write() {
                *r = Some(reason.into());
            }
        }
    }

    /// Check if the flag is set.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Why the flag was set.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_set());

        flag.cancel("window closed");
        assert!(other.is_set());
        assert_eq!(other.reason(), Some("window closed".to_string()));

        // first reason wins
        other.cancel("acquisition finished");
        assert_eq!(flag.reason(), Some("window closed".to_string()));
    }

    #[tokio::test]
    async fn visible_across_tasks() {
        let flag = CancelFlag::new();
        let remote = flag.clone();
        tokio::spawn(async move { remote.cancel("ctrl-c") })
            .await
            .unwrap();
        assert!(flag.is_set());
    }
}
