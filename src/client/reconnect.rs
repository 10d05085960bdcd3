//! Fixed-delay reconnect scheduling.
//!
//! At most one reconnect timer exists at a time. Loss notifications that
//! arrive while a timer is pending are no-ops, so a flapping socket cannot
//! pile up timers. The timer clears its flag before running the attempt;
//! a failed attempt may therefore schedule the next one, which gives a
//! steady retry cadence of one attempt per delay.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ============================================================================
// ReconnectScheduler
// ============================================================================

/// Schedules single delayed reconnect attempts.
pub struct ReconnectScheduler {
    /// Delay between loss and attempt.
    delay: Duration,
    /// Set while a timer is pending.
    scheduled: AtomicBool,
    /// Pending timer task.
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    /// Creates a scheduler with a fixed delay.
    #[inline]
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            scheduled: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    /// Schedules `attempt` to run after the delay.
    ///
    /// Returns `false` without doing anything if a timer is already
    /// pending.
    pub fn schedule<F, Fut>(self: &Arc<Self>, attempt: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reconnect already scheduled");
            return false;
        }

        warn!(
            delay_ms = self.delay.as_millis() as u64,
            "Scheduling gateway reconnect"
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.delay).await;
            this.scheduled.store(false, Ordering::Release);
            debug!("Reconnect timer fired");
            attempt().await;
        });

        // Any handle replaced here belongs to a timer that already fired.
        *self.timer.lock() = Some(handle);

        true
    }

    /// Cancels a pending timer, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        if self.scheduled.swap(false, Ordering::AcqRel) {
            debug!("Pending reconnect cancelled");
        }
    }

    /// Returns `true` while a timer is pending.
    #[inline]
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Returns the configured delay.
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
