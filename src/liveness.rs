//! Liveness classification for heartbeat snapshots.
//!
//! Pure, deterministic functions that turn a last-seen timestamp and a
//! battery level into discrete severity tiers. Battery and freshness are
//! independent axes: a device can be live with a critical battery, or stale
//! with a full one. Nothing here performs I/O or reads the clock — callers
//! pass `now` in, which keeps every boundary testable.

use crate::config::LivenessConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete severity tier for an observed resource level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Caution,
    Critical,
}

/// Time-based freshness of an observation, independent of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Live,
    Stale,
}

/// Network attachment reported by the monitored device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Wifi,
    #[serde(rename = "5g")]
    FiveG,
    #[serde(rename = "4g")]
    FourG,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Immutable device status received from a heartbeat poll.
///
/// Replaced wholesale on each poll tick; never partially updated. The
/// timestamps stay raw strings because the wire may deliver garbage — the
/// classifier owns parsing and fails safe (unparseable means stale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSnapshot {
    /// Device this snapshot describes.
    #[serde(rename = "deviceId")]
    pub subject_id: String,
    /// Battery percentage 0–100, if the device reported one.
    #[serde(rename = "batteryPercent", default)]
    pub battery_percent: Option<u8>,
    /// Network the device was attached to when it reported.
    #[serde(rename = "networkType", default)]
    pub network: NetworkKind,
    /// SSID when attached to wifi.
    #[serde(default)]
    pub wifi_name: Option<String>,
    /// When the device last produced a heartbeat.
    pub heartbeat_at: String,
    /// When this snapshot was assembled server-side.
    pub reported_at: String,
}

impl HeartbeatSnapshot {
    /// Whether the device was reachable at report time.
    #[must_use]
    pub fn reachable(&self) -> bool {
        self.network != NetworkKind::Offline
    }
}

/// Both classification axes plus one combined tier for a snapshot.
///
/// `overall` applies the [`panel_severity`] policy; callers that want a
/// different combination rule can ignore it and combine the raw axes
/// themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelStatus {
    /// Battery tier, `None` when the level is unknown.
    pub battery: Option<Severity>,
    /// Freshness of the device's own heartbeat.
    pub heartbeat: Freshness,
    /// Freshness of the snapshot itself (server assembly time).
    pub data: Freshness,
    /// Combined tier per [`panel_severity`].
    pub overall: Severity,
}

/// Classify a battery level against the low/critical thresholds.
///
/// `None` input means the level is unknown — unknown is not critical, so
/// the output is `None` and callers decide how to render the absence.
#[must_use]
pub fn battery_severity(level: Option<u8>, low: u8, critical: u8) -> Option<Severity> {
    let level = level?;
    let tier = if level < critical {
        Severity::Critical
    } else if level < low {
        Severity::Caution
    } else {
        Severity::Normal
    };
    Some(tier)
}

/// Classify a timestamp's freshness against a staleness threshold.
///
/// Unparseable timestamps always classify as `Stale`, never as fresh: a
/// device whose clock output cannot be read must not look alive.
#[must_use]
pub fn freshness(observed_at: &str, stale_threshold_secs: u64, now: DateTime<Utc>) -> Freshness {
    let Ok(observed) = DateTime::parse_from_rfc3339(observed_at) else {
        return Freshness::Stale;
    };
    let elapsed = now.signed_duration_since(observed.with_timezone(&Utc));
    if elapsed.num_seconds() > stale_threshold_secs as i64 {
        Freshness::Stale
    } else {
        Freshness::Live
    }
}

/// Combine the battery tier and heartbeat freshness into one panel tier.
///
/// Critical battery dominates; a caution battery or a stale heartbeat each
/// raise the panel to caution; otherwise normal. An unknown battery
/// contributes nothing.
#[must_use]
pub fn panel_severity(battery: Option<Severity>, heartbeat: Freshness) -> Severity {
    match (battery, heartbeat) {
        (Some(Severity::Critical), _) => Severity::Critical,
        (Some(Severity::Caution), _) | (_, Freshness::Stale) => Severity::Caution,
        _ => Severity::Normal,
    }
}

/// Classify a full snapshot against the configured thresholds.
#[must_use]
pub fn classify(
    snapshot: &HeartbeatSnapshot,
    config: &LivenessConfig,
    now: DateTime<Utc>,
) -> PanelStatus {
    let battery = battery_severity(
        snapshot.battery_percent,
        config.low_battery_percent,
        config.critical_battery_percent,
    );
    let heartbeat = freshness(&snapshot.heartbeat_at, config.stale_heartbeat_secs, now);
    let data = freshness(&snapshot.reported_at, config.stale_data_secs, now);
    PanelStatus {
        battery,
        heartbeat,
        data,
        overall: panel_severity(battery, heartbeat),
    }
}
