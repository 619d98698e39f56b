//! Tether: client-side resilience core for paired liveness monitoring.
//!
//! Two paired users monitor each other's liveness, location, and permission
//! posture over an unreliable mobile network. This crate keeps the locally
//! held state usable and eventually consistent while giving the user
//! immediate, optimistic feedback:
//!
//! - **Guide tracking**: a linear permission-setup flow marked done locally
//!   before the server confirms, rolled back step-exact when a write is
//!   rejected, and reconciled against the server's authoritative copy.
//! - **Alert queueing**: an emergency alert sent immediately when online,
//!   queued silently in a single slot when offline, and flushed exactly
//!   once when connectivity returns — with a cooldown against repeat taps.
//! - **Liveness classification**: pure functions turning heartbeat
//!   snapshots into battery severity and freshness tiers.
//! - **Polling**: one cancellable skip-if-busy driver shared by everything
//!   that refreshes on a period.
//!
//! Remote collaborators are traits ([`remote`]); the HTTP implementations
//! live in [`remote::http`] and tests drive the components with in-memory
//! stubs.

pub mod alert;
pub mod config;
pub mod error;
pub mod guide;
pub mod liveness;
pub mod monitor;
pub mod poll;
pub mod remote;

pub use alert::{AlertEvent, AlertPayload, AlertQueue, TriggerOutcome};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use guide::{FlowPhase, GuideState, GuideStep, GuideTracker, StepId};
pub use liveness::{Freshness, HeartbeatSnapshot, NetworkKind, PanelStatus, Severity};
pub use monitor::StatusMonitor;
pub use poll::{PollDriver, PollHandle};
