//! Events exposed to the UI layer

use crate::domain::notification::Notification;
use crate::domain::types::{PositionSample, Zone};
use serde::Serialize;

/// Session status flag
///
/// Only `PermissionDenied` is a blocking, user-visible state; `Degraded` is
/// informational while the sampler retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TrackingStatus {
    Idle,
    Active,
    Degraded(String),
    PermissionDenied,
    Stopped,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Idle => "idle",
            TrackingStatus::Active => "active",
            TrackingStatus::Degraded(_) => "degraded",
            TrackingStatus::PermissionDenied => "permission_denied",
            TrackingStatus::Stopped => "stopped",
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, TrackingStatus::PermissionDenied)
    }
}

/// In-process contract towards the UI (`onZoneEnter`, `onZoneExit`, ...)
#[derive(Debug, Clone)]
pub enum UiEvent {
    ZoneEnter(Zone),
    ZoneExit(Zone),
    LocationUpdate(PositionSample),
    /// A notification reached the in-app list sink
    NotificationDelivered(Notification),
    /// The authoritative list changed (admit, read, dismiss, merge)
    NotificationsChanged { unread: usize },
    Status(TrackingStatus),
}
