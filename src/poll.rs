//! Shared polling driver for periodic refresh operations.
//!
//! One loop shape reused by every consumer that needs periodic refresh: the
//! first invocation happens after one full interval (consumers perform
//! their own initial fetch), invocations never overlap (the refresh is
//! awaited in place and ticks that come due meanwhile are skipped), and the
//! timer dies deterministically — cancelling the handle, dropping it, or
//! returning `Break` from the refresh all stop the loop.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shortest accepted polling interval; anything below clamps to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Builds one cancellable polling loop.
pub struct PollDriver {
    interval: Duration,
    cancel: CancellationToken,
}

impl PollDriver {
    /// Create a driver with the given period, clamped to
    /// [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::raw(interval.max(MIN_POLL_INTERVAL))
    }

    fn raw(interval: Duration) -> Self {
        Self {
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Bypass the interval floor. Test-only: production consumers go
    /// through [`new`](Self::new).
    #[cfg(test)]
    pub(crate) fn unclamped(interval: Duration) -> Self {
        Self::raw(interval)
    }

    /// The effective (clamped) interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop as a background task.
    ///
    /// `refresh` runs once per period; returning `Break` ends the loop from
    /// the inside (e.g. the consumer's identity key became empty).
    pub fn spawn<F, Fut>(self, mut refresh: F) -> PollHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send,
    {
        let cancel = self.cancel.clone();
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval completes immediately;
            // consume it so the first refresh lands one full period out.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        debug!("poll loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if refresh().await.is_break() {
                            debug!("poll consumer stopped the loop");
                            break;
                        }
                    }
                }
            }
        });
        PollHandle { cancel, task }
    }
}

/// Handle to a running polling loop. Dropping it cancels the loop.
pub struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Request cancellation. Idempotent; the loop exits at its next await
    /// point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop has fully exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
