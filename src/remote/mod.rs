//! Remote collaborators consumed by the core components.
//!
//! Each collaborator is a request/response operation that may fail with a
//! transport or rejection error. Components depend on these traits, never on
//! a concrete transport, so tests drive them with in-memory stubs and the
//! application wires in the HTTP implementations from [`http`].

pub mod http;

use crate::alert::AlertPayload;
use crate::error::Result;
use crate::liveness::HeartbeatSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One guide step as it travels over the wire.
///
/// The id stays a raw string here: the local enumeration is canonical and
/// unknown remote ids must be ignorable, not deserialization failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideStepPayload {
    pub id: String,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Authoritative guide state returned by both fetch and persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideStatePayload {
    pub device_id: String,
    #[serde(default)]
    pub steps: Vec<GuideStepPayload>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Remote store for the permission guide state.
#[async_trait]
pub trait GuideStore: Send + Sync {
    /// Fetch the authoritative guide state for a device.
    async fn fetch(&self, device_key: &str) -> Result<GuideStatePayload>;

    /// Persist the full step list and return the server's authoritative
    /// view of it (the server may adjust timestamps).
    async fn persist(&self, device_key: &str, steps: Vec<GuideStepPayload>)
    -> Result<GuideStatePayload>;
}

/// Remote sink for emergency alerts.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Deliver one alert. Success is an empty ack.
    async fn dispatch(&self, payload: &AlertPayload) -> Result<()>;
}

/// Remote source of device heartbeat snapshots.
#[async_trait]
pub trait HeartbeatSource: Send + Sync {
    /// Fetch the latest snapshot for a device.
    async fn fetch(&self, subject_id: &str) -> Result<HeartbeatSnapshot>;
}
