//! Periodic heartbeat monitoring for one paired device.
//!
//! Owns the last known [`HeartbeatSnapshot`] and refreshes it through a
//! [`HeartbeatSource`], on demand or on the shared polling driver. A failed
//! refresh keeps the previous snapshot — a transient fetch error must not
//! blank out the panel — and records a message cleared by the next success.

use crate::config::{LivenessConfig, PollConfig};
use crate::error::Result;
use crate::liveness::{self, HeartbeatSnapshot, PanelStatus};
use crate::poll::{PollDriver, PollHandle};
use crate::remote::HeartbeatSource;
use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Default)]
struct MonitorInner {
    subject_id: String,
    snapshot: Option<HeartbeatSnapshot>,
    last_error: Option<String>,
}

/// Retains and classifies the latest heartbeat snapshot for a subject.
pub struct StatusMonitor<H> {
    source: Arc<H>,
    liveness: LivenessConfig,
    poll_interval: Duration,
    inner: Arc<Mutex<MonitorInner>>,
}

impl<H> Clone for StatusMonitor<H> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            liveness: self.liveness.clone(),
            poll_interval: self.poll_interval,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: HeartbeatSource + 'static> StatusMonitor<H> {
    /// Create a monitor for `subject_id` (empty means unbound).
    pub fn new(source: H, subject_id: &str, liveness: LivenessConfig, poll: &PollConfig) -> Self {
        Self {
            source: Arc::new(source),
            liveness,
            poll_interval: Duration::from_secs(poll.heartbeat_interval_secs),
            inner: Arc::new(Mutex::new(MonitorInner {
                subject_id: subject_id.to_owned(),
                snapshot: None,
                last_error: None,
            })),
        }
    }

    /// The monitored subject; empty when unbound.
    #[must_use]
    pub fn subject_id(&self) -> String {
        self.inner
            .lock()
            .map(|inner| inner.subject_id.clone())
            .unwrap_or_default()
    }

    /// Point the monitor at a different subject. The retained snapshot is
    /// dropped; it described the previous device.
    pub fn set_subject(&self, subject_id: &str) {
        if let Ok(mut inner) = self.inner.lock()
            && inner.subject_id != subject_id
        {
            inner.subject_id = subject_id.to_owned();
            inner.snapshot = None;
            inner.last_error = None;
        }
    }

    /// Last successfully fetched snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<HeartbeatSnapshot> {
        self.inner.lock().ok().and_then(|inner| inner.snapshot.clone())
    }

    /// Message from the most recent failed refresh, cleared by the next
    /// successful one.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|inner| inner.last_error.clone())
    }

    /// Fetch a fresh snapshot and replace the retained one wholesale.
    ///
    /// Quiet no-op when unbound. On failure the previous snapshot is kept
    /// and the error is recorded and returned.
    pub async fn refresh(&self) -> Result<()> {
        let subject = self.subject_id();
        if subject.is_empty() {
            return Ok(());
        }

        match self.source.fetch(&subject).await {
            Ok(snapshot) => {
                if let Ok(mut inner) = self.inner.lock() {
                    // The fetch raced a subject change; this snapshot
                    // describes a device nobody is watching anymore.
                    if inner.subject_id != subject {
                        return Ok(());
                    }
                    inner.snapshot = Some(snapshot);
                    inner.last_error = None;
                }
                debug!(subject = %subject, "heartbeat snapshot refreshed");
                Ok(())
            }
            Err(err) => {
                if let Ok(mut inner) = self.inner.lock() {
                    inner.last_error = Some(err.to_string());
                }
                warn!(subject = %subject, "heartbeat refresh failed: {err}");
                Err(err)
            }
        }
    }

    /// Classify the retained snapshot. `None` before the first successful
    /// refresh.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> Option<PanelStatus> {
        self.snapshot()
            .map(|snapshot| liveness::classify(&snapshot, &self.liveness, now))
    }

    /// Start periodic refresh on the shared polling driver.
    ///
    /// The loop stops itself once the subject key is empty; cancelling or
    /// dropping the handle stops it from the outside.
    pub fn spawn_polling(&self) -> PollHandle {
        self.spawn_on(PollDriver::new(self.poll_interval))
    }

    fn spawn_on(&self, driver: PollDriver) -> PollHandle {
        let monitor = self.clone();
        driver.spawn(move || {
            let monitor = monitor.clone();
            async move {
                if monitor.subject_id().is_empty() {
                    return ControlFlow::Break(());
                }
                // Transient failures keep the loop alive; the error is
                // already recorded on the monitor.
                let _ = monitor.refresh().await;
                ControlFlow::Continue(())
            }
        })
    }
}
