//! Cooldown window for repeat-trigger rejection.
//!
//! Modeled as an explicit deadline compared against a caller-supplied
//! instant, not a hidden timer callback: the "reject within window"
//! property is testable without a clock.

use crate::error::CoreError;
use std::time::{Duration, Instant};

/// A fixed-duration cooldown armed after each confirmed dispatch.
#[derive(Debug, Clone)]
pub struct Cooldown {
    duration: Duration,
    until: Option<Instant>,
}

impl Cooldown {
    /// Create an unarmed cooldown with the given window.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            until: None,
        }
    }

    /// Check whether a trigger at `now` is allowed.
    ///
    /// Returns `CoreError::Throttled` with the remaining wait while the
    /// window is open. Never mutates state.
    pub fn check(&self, now: Instant) -> crate::error::Result<()> {
        let Some(until) = self.until else {
            return Ok(());
        };
        if now >= until {
            return Ok(());
        }
        let remaining = until.duration_since(now);
        Err(CoreError::Throttled {
            retry_after_secs: remaining.as_secs().saturating_add(1),
        })
    }

    /// Start the window at `now`.
    pub fn arm(&mut self, now: Instant) {
        self.until = Some(now + self.duration);
    }

    /// Whether the window is currently open at `now`.
    #[must_use]
    pub fn is_open(&self, now: Instant) -> bool {
        self.check(now).is_err()
    }
}
