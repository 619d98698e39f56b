//! Offline-resilient emergency alert dispatch.
//!
//! One critical action with one pending slot: an alert triggered while the
//! device is known to be offline is queued silently instead of failing, and
//! flushed exactly once when connectivity returns. A cooldown window after
//! every confirmed dispatch (sent or queued) absorbs repeated taps.

mod cooldown;

pub use cooldown::Cooldown;

use crate::config::AlertConfig;
use crate::error::Result;
use crate::remote::AlertDispatcher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events emitted for UI and observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    /// An alert was stored for deferred dispatch while offline.
    Queued,
    /// An alert was accepted by the backend. `queued` distinguishes a
    /// deferred send from an immediate one.
    Sent {
        queued: bool,
    },
    /// A flush attempt failed; the alert remains queued.
    Error(String),
}

/// Alert body sent to the backend.
///
/// `alert_id` is generated at trigger time and survives queueing, so a
/// flushed alert carries the same identity the backend can deduplicate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub alert_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

impl AlertPayload {
    /// Create a payload stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(note: Option<String>) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            triggered_at: Utc::now(),
            note,
        }
    }
}

/// The single alert waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedAlert {
    pub payload: AlertPayload,
    pub queued_at: DateTime<Utc>,
}

/// How a trigger was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Dispatched immediately.
    Sent,
    /// Stored for deferred dispatch; a distinct success, not a failure.
    Queued,
}

/// Single-slot action queue in front of an [`AlertDispatcher`].
///
/// Owns the pending slot, the last-known connectivity flag, and the
/// cooldown; nothing else mutates them. Connectivity notifications from any
/// host mechanism drive [`set_connectivity`](Self::set_connectivity).
pub struct AlertQueue<D> {
    dispatcher: D,
    pending: Option<QueuedAlert>,
    connected: bool,
    cooldown: Cooldown,
    event_tx: mpsc::UnboundedSender<AlertEvent>,
    last_error: Option<String>,
}

impl<D: AlertDispatcher> AlertQueue<D> {
    /// Create a queue and the receiving end of its event stream.
    ///
    /// Connectivity starts as present; the host's first notification
    /// corrects it if not.
    pub fn new(dispatcher: D, config: &AlertConfig) -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let queue = Self {
            dispatcher,
            pending: None,
            connected: true,
            cooldown: Cooldown::new(Duration::from_secs(config.cooldown_secs)),
            event_tx,
            last_error: None,
        };
        (queue, event_rx)
    }

    /// Last-known connectivity.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// The alert waiting for connectivity, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&QueuedAlert> {
        self.pending.as_ref()
    }

    /// Message from the most recent failed dispatch, cleared by the next
    /// successful one.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Attempt to dispatch an alert, queueing it when offline.
    ///
    /// Within the cooldown window this rejects with `Throttled` before any
    /// other effect: no request, no queueing, no event. Otherwise: online,
    /// the dispatcher is called directly and a failure propagates; offline,
    /// the payload takes the pending slot (overwriting an unflushed
    /// predecessor) and the call reports [`TriggerOutcome::Queued`].
    pub async fn trigger(&mut self, payload: AlertPayload) -> Result<TriggerOutcome> {
        self.cooldown.check(Instant::now())?;

        if !self.connected {
            if self.pending.is_some() {
                debug!("overwriting unflushed pending alert");
            }
            self.pending = Some(QueuedAlert {
                payload,
                queued_at: Utc::now(),
            });
            self.cooldown.arm(Instant::now());
            self.emit(AlertEvent::Queued);
            info!("alert queued while offline");
            return Ok(TriggerOutcome::Queued);
        }

        match self.dispatcher.dispatch(&payload).await {
            Ok(()) => {
                self.cooldown.arm(Instant::now());
                self.last_error = None;
                self.emit(AlertEvent::Sent { queued: false });
                info!(alert_id = %payload.alert_id, "alert sent");
                Ok(TriggerOutcome::Sent)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                warn!("alert dispatch failed: {err}");
                Err(err)
            }
        }
    }

    /// Consume a connectivity notification from the host environment.
    ///
    /// Going offline is purely observational. Coming online flushes the
    /// pending alert exactly once; a failed flush leaves it queued for the
    /// next online transition, with the failure surfaced as
    /// [`AlertEvent::Error`] rather than dropped.
    pub async fn set_connectivity(&mut self, online: bool) -> Result<()> {
        self.connected = online;
        if !online {
            return Ok(());
        }
        self.flush_pending().await
    }

    /// Explicitly discard the pending alert, if any.
    pub fn cancel_pending(&mut self) -> Option<QueuedAlert> {
        self.pending.take()
    }

    async fn flush_pending(&mut self) -> Result<()> {
        let Some(queued) = self.pending.as_ref() else {
            return Ok(());
        };
        let payload = queued.payload.clone();

        match self.dispatcher.dispatch(&payload).await {
            Ok(()) => {
                // The emptied slot is the guard against a second flush.
                self.pending = None;
                self.last_error = None;
                self.emit(AlertEvent::Sent { queued: true });
                info!(alert_id = %payload.alert_id, "deferred alert flushed");
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.emit(AlertEvent::Error(err.to_string()));
                warn!("deferred alert flush failed, alert stays queued: {err}");
                Err(err)
            }
        }
    }

    fn emit(&self, event: AlertEvent) {
        // A dropped receiver must never fail a dispatch.
        let _ = self.event_tx.send(event);
    }
}
