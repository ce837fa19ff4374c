//! Cooperative shutdown.
//!
//! A single `Running` flag observed by every periodic task. No thread is
//! ever force-terminated: each loop uses [`responsive_sleep`], which
//! wakes in bounded increments so a shutdown is noticed within one tick
//! instead of blocking on a long sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on how long any periodic task may block before re-checking
/// `Running`.
pub const RESPONSIVE_TICK: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct Running(Arc<AtomicBool>);

impl Running {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

impl Default for Running {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for `duration`, but in chunks no larger than [`RESPONSIVE_TICK`],
/// bailing out early if `running` flips to `false`. Returns `true` if the
/// full duration elapsed, `false` if shutdown interrupted it.
pub async fn responsive_sleep(duration: Duration, running: &Running) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if !running.is_running() {
            return false;
        }
        let chunk = remaining.min(RESPONSIVE_TICK);
        tokio::time::sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
    running.is_running()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_sleep_elapses_when_running() {
        let running = Running::new();
        let ok = responsive_sleep(Duration::from_millis(10), &running).await;
        assert!(ok);
    }

    #[tokio::test]
    async fn sleep_is_interrupted_by_shutdown() {
        let running = Running::new();
        let r2 = running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            r2.stop();
        });
        let ok = responsive_sleep(Duration::from_secs(5), &running).await;
        assert!(!ok);
    }
}
