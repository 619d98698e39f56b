//! Permission guide flow: a linear sequence of setup steps tracked
//! optimistically against an authoritative server copy.

mod tracker;

pub use tracker::{GuideTracker, start_resync};

use crate::remote::GuideStepPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one guide step. The enumeration is fixed and ordered; the
/// flow is linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Location,
    Notification,
    Autostart,
    Usage,
}

impl StepId {
    /// All steps in flow order.
    pub const ALL: [Self; 4] = [Self::Location, Self::Notification, Self::Autostart, Self::Usage];

    /// Wire identifier for this step.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Notification => "notification",
            Self::Autostart => "autostart",
            Self::Usage => "usage",
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the guide flow.
///
/// Invariant: an incomplete step never carries a completion timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideStep {
    pub id: StepId,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GuideStep {
    fn incomplete(id: StepId) -> Self {
        Self {
            id,
            completed: false,
            completed_at: None,
        }
    }

    pub(crate) fn to_payload(&self) -> GuideStepPayload {
        GuideStepPayload {
            id: self.id.as_str().to_owned(),
            completed: self.completed,
            completed_at: self.completed_at,
        }
    }
}

/// Derived position in the guide flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// No reconciliation with the server has happened yet.
    Bootstrapping,
    /// At least one step is incomplete; the value is the active index.
    InProgress(usize),
    /// Every step is complete. Can regress if the server reports otherwise.
    AllComplete,
}

/// Guide flow state owned by the tracker.
///
/// `active_index` is always the index of the first incomplete step, or the
/// last index when everything is complete — recomputed after every
/// mutation, never set directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideState {
    steps: Vec<GuideStep>,
    active_index: usize,
    device_key: String,
    last_synced_at: Option<DateTime<Utc>>,
}

impl Default for GuideState {
    fn default() -> Self {
        Self {
            steps: StepId::ALL.iter().copied().map(GuideStep::incomplete).collect(),
            active_index: 0,
            device_key: String::new(),
            last_synced_at: None,
        }
    }
}

impl GuideState {
    /// All steps in flow order.
    #[must_use]
    pub fn steps(&self) -> &[GuideStep] {
        &self.steps
    }

    /// Index of the first incomplete step (or the last index if none).
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// The device this state belongs to; empty means unbound.
    #[must_use]
    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    /// When the state last merged an authoritative server response.
    #[must_use]
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Number of completed steps.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }

    /// Whether every step is complete.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    /// Look up one step by id.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&GuideStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Derived flow phase.
    #[must_use]
    pub fn phase(&self) -> FlowPhase {
        if self.last_synced_at.is_none() {
            FlowPhase::Bootstrapping
        } else if self.all_complete() {
            FlowPhase::AllComplete
        } else {
            FlowPhase::InProgress(self.active_index)
        }
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [GuideStep] {
        &mut self.steps
    }

    pub(crate) fn set_device_key(&mut self, device_key: &str) {
        if self.device_key != device_key {
            self.device_key = device_key.to_owned();
            // A different device invalidates whatever was synced before.
            self.last_synced_at = None;
        }
    }

    pub(crate) fn set_last_synced_at(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
    }

    /// Recompute `active_index` from the step list.
    pub(crate) fn recompute_active_index(&mut self) {
        self.active_index = self
            .steps
            .iter()
            .position(|s| !s.completed)
            .unwrap_or_else(|| self.steps.len().saturating_sub(1));
    }
}
