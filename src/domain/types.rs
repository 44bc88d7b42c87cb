//! Shared types for the geofence engine

use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Current wall-clock time as epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for zone IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the tracked entity (the signed-in user)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    #[inline]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One accepted position reading
///
/// Immutable once built. `captured_at_ms` orders samples; anything older than the
/// last accepted sample is discarded by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    pub captured_at_ms: u64,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, captured_at_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            altitude_m: None,
            heading_deg: None,
            speed_mps: None,
            captured_at_ms,
        }
    }

    #[inline]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Raw platform location reading, as delivered by a position source
///
/// Field names follow the browser/native geolocation payloads; the timestamp
/// may arrive as epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawReading {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: TimestampValue,
}

impl RawReading {
    /// Reading with an epoch-millisecond timestamp and no motion data
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            heading: None,
            speed: None,
            timestamp: TimestampValue::EpochMs(timestamp_ms),
        }
    }

    /// Convert into a sample, stamping with `received_at_ms` when the reading has no usable time
    pub fn into_sample(self, received_at_ms: u64) -> PositionSample {
        let captured_at_ms = match self.timestamp.epoch_ms() {
            Some(ms) => ms,
            None => received_at_ms,
        };
        PositionSample {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_m: self.accuracy,
            altitude_m: self.altitude,
            // NaN heading is what platforms report for a stationary device
            heading_deg: self.heading.filter(|h| h.is_finite()),
            speed_mps: self.speed.filter(|s| s.is_finite()),
            captured_at_ms,
        }
    }
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

impl TimestampValue {
    pub fn epoch_ms(&self) -> Option<u64> {
        match self {
            TimestampValue::EpochMs(ms) => Some(*ms),
            TimestampValue::IsoString(s) => OffsetDateTime::parse(s, &Rfc3339)
                .ok()
                .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as u64),
            TimestampValue::None => None,
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            let epoch_ms = u64::try_from(value).unwrap_or(0);
            Ok(TimestampValue::EpochMs(epoch_ms))
        }

        fn visit_f64<E>(self, value: f64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            // JS Date.now() sometimes arrives as a float
            if value.is_finite() && value >= 0.0 {
                Ok(TimestampValue::EpochMs(value as u64))
            } else {
                Ok(TimestampValue::None)
            }
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Safety tier of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyTier {
    Safe,
    Caution,
    Restricted,
}

impl SafetyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyTier::Safe => "safe",
            SafetyTier::Caution => "caution",
            SafetyTier::Restricted => "restricted",
        }
    }
}

/// Named circular safety zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: f64,
    pub tier: SafetyTier,
    #[serde(default)]
    pub description: String,
}

impl Zone {
    #[inline]
    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.center_lat, self.center_lon)
    }
}

/// Direction of a membership flip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Enter,
    Exit,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Enter => "enter",
            TransitionKind::Exit => "exit",
        }
    }
}

/// Emitted by the tracker only when a zone's membership flips
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub tier: SafetyTier,
    pub kind: TransitionKind,
    pub at_ms: u64,
    pub sample_latitude: f64,
    pub sample_longitude: f64,
    /// Time spent inside the zone (exit only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_reading_epoch_timestamp() {
        let raw: RawReading = serde_json::from_str(
            r#"{"latitude":18.922,"longitude":72.8347,"accuracy":12.5,"timestamp":1767617600000}"#,
        )
        .unwrap();
        let sample = raw.into_sample(1);
        assert_eq!(sample.captured_at_ms, 1767617600000);
        assert_eq!(sample.accuracy_m, 12.5);
        assert!(sample.heading_deg.is_none());
    }

    #[test]
    fn test_raw_reading_iso_timestamp() {
        let raw: RawReading = serde_json::from_str(
            r#"{"latitude":1.0,"longitude":2.0,"accuracy":5,"timestamp":"2026-01-05T16:41:30.048+00:00"}"#,
        )
        .unwrap();
        assert_eq!(raw.into_sample(1).captured_at_ms, 1767631290048);
    }

    #[test]
    fn test_raw_reading_missing_timestamp_uses_receive_time() {
        let raw: RawReading =
            serde_json::from_str(r#"{"latitude":1.0,"longitude":2.0,"accuracy":5}"#).unwrap();
        assert_eq!(raw.into_sample(42).captured_at_ms, 42);
    }

    #[test]
    fn test_zone_deserialize() {
        let zone: Zone = serde_json::from_str(
            r#"{"id":7,"name":"Gateway of India","center_lat":18.922,"center_lon":72.8347,
                "radius_m":500,"tier":"safe"}"#,
        )
        .unwrap();
        assert_eq!(zone.id, ZoneId(7));
        assert_eq!(zone.tier, SafetyTier::Safe);
        assert!(zone.description.is_empty());
    }
}
