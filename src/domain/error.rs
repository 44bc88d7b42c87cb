//! Error taxonomy for the geofence core.
//!
//! Sampling and channel errors are recovered locally and only surface as a
//! status flag. `PositionError::PermissionDenied` is the one error that stops a
//! session and must be shown to the user.

use crate::domain::types::ZoneId;
use std::time::Duration;
use thiserror::Error;

/// Malformed geometry input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("invalid radius: {0}")]
    InvalidRadius(f64),
}

/// Failures reported by a position source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    /// User declined location access. Fatal for the session.
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    Unavailable(String),

    #[error("position request timed out after {0:?}")]
    Timeout(Duration),

    /// The source has no more readings (stream ended).
    #[error("position source closed")]
    SourceClosed,
}

impl PositionError {
    /// Whether the session must stop instead of retrying
    pub fn is_fatal(&self) -> bool {
        matches!(self, PositionError::PermissionDenied | PositionError::SourceClosed)
    }

    /// Short label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionError::PermissionDenied => "permission_denied",
            PositionError::Unavailable(_) => "unavailable",
            PositionError::Timeout(_) => "timeout",
            PositionError::SourceClosed => "source_closed",
        }
    }
}

/// Zone catalog construction or fetch failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("duplicate zone id {0}")]
    DuplicateZone(ZoneId),

    #[error("invalid zone {id}: {reason}")]
    InvalidZone { id: ZoneId, reason: String },

    #[error("catalog source error: {0}")]
    Source(String),
}

/// Persistence / real-time channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Real-time channel is down; callers buffer and reconcile later.
    #[error("channel disconnected")]
    Disconnected,

    #[error("notification {0} not found")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A sink could not deliver a notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery via {sink} failed: {reason}")]
    Failed { sink: &'static str, reason: String },
}

/// Errors from the notification pipeline's public operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("notification {0} not found")]
    NotFound(String),

    #[error("notification {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: &'static str, to: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_error_fatality() {
        assert!(PositionError::PermissionDenied.is_fatal());
        assert!(PositionError::SourceClosed.is_fatal());
        assert!(!PositionError::Unavailable("gps off".into()).is_fatal());
        assert!(!PositionError::Timeout(Duration::from_secs(15)).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = GeoError::InvalidCoordinate { lat: 91.0, lon: 0.0 };
        assert_eq!(err.to_string(), "invalid coordinate: lat=91, lon=0");

        let err = DeliveryError::Failed { sink: "push", reason: "503".into() };
        assert_eq!(err.to_string(), "delivery via push failed: 503");
    }
}
