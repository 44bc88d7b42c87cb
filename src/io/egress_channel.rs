//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::events::TrackingStatus;
use crate::domain::notification::Notification;
use crate::domain::types::{epoch_ms, PositionSample, TransitionEvent};
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Zone enter/exit for real-time display
    ZoneEvent(ZoneEventPayload),
    /// Accepted position sample
    Position(PositionPayload),
    /// Admitted or upgraded notification
    Notification(NotificationPayload),
    /// Session status change
    Status(StatusPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for zone transitions
#[derive(Debug, Clone, Serialize)]
pub struct ZoneEventPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Tracked entity
    pub entity: String,
    /// Event type (enter, exit)
    pub t: &'static str,
    pub zone_id: u32,
    /// Zone name
    pub z: String,
    pub tier: &'static str,
    /// Transition time (epoch ms, sample clock)
    pub ts: u64,
    pub lat: f64,
    pub lon: f64,
    /// Time spent inside the zone (on exit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_ms: Option<u64>,
}

impl ZoneEventPayload {
    pub fn from_transition(entity: &str, event: &TransitionEvent) -> Self {
        Self {
            site: None,
            entity: entity.to_string(),
            t: event.kind.as_str(),
            zone_id: event.zone_id.0,
            z: event.zone_name.clone(),
            tier: event.tier.as_str(),
            ts: event.at_ms,
            lat: event.sample_latitude,
            lon: event.sample_longitude,
            dwell_ms: event.dwell_ms,
        }
    }
}

/// Payload for position streaming
#[derive(Debug, Clone, Serialize)]
pub struct PositionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub entity: String,
    /// Capture time (epoch ms)
    pub ts: u64,
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy (m)
    pub acc: f64,
    /// Whether the sample was evaluated for membership
    pub evaluated: bool,
}

impl PositionPayload {
    pub fn from_sample(entity: &str, sample: &PositionSample, evaluated: bool) -> Self {
        Self {
            site: None,
            entity: entity.to_string(),
            ts: sample.captured_at_ms,
            lat: sample.latitude,
            lon: sample.longitude,
            acc: sample.accuracy_m,
            evaluated,
        }
    }
}

/// Payload for delivered notifications
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub entity: String,
    pub id: String,
    pub src: &'static str,
    pub priority: &'static str,
    pub title: String,
    pub body: String,
    /// Dedup key
    pub key: String,
    pub ts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    pub action_required: bool,
}

impl NotificationPayload {
    pub fn from_notification(entity: &str, n: &Notification) -> Self {
        Self {
            site: None,
            entity: entity.to_string(),
            id: n.id.clone(),
            src: n.source_kind.as_str(),
            priority: n.priority.as_str(),
            title: n.title.clone(),
            body: n.body.clone(),
            key: n.dedup_key.to_string(),
            ts: n.created_at_ms,
            expires_at: n.expires_at_ms,
            action_required: n.action_required,
        }
    }
}

/// Payload for session status changes
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub entity: String,
    pub ts: u64,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusPayload {
    pub fn new(entity: &str, status: &TrackingStatus) -> Self {
        let reason = match status {
            TrackingStatus::Degraded(reason) => Some(reason.clone()),
            _ => None,
        };
        Self { site: None, entity: entity.to_string(), ts: epoch_ms(), status: status.as_str(), reason }
    }
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub samples_total: u64,
    pub samples_per_sec: f64,
    /// Average sample processing latency (microseconds)
    pub avg_latency_us: u64,
    /// Max sample processing latency (microseconds)
    pub max_latency_us: u64,
    /// Sample processing latency histogram buckets (Prometheus-style exponential)
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub low_accuracy: u64,
    pub out_of_order: u64,
    pub zones_inside: u64,
    pub zone_enters: u64,
    pub zone_exits: u64,
    pub admitted: u64,
    pub deduplicated: u64,
    pub unread: u64,
    pub push_sent: u64,
    pub push_failed: u64,
    pub position_errors: u64,
    pub buffered_ops: u64,
}

impl MetricsPayload {
    /// Create a metrics payload from a summary with site info
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            samples_total: summary.samples_total,
            samples_per_sec: summary.samples_per_sec,
            avg_latency_us: summary.avg_process_latency_us,
            max_latency_us: summary.max_process_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            low_accuracy: summary.samples_low_accuracy,
            out_of_order: summary.samples_out_of_order,
            zones_inside: summary.zones_inside,
            zone_enters: summary.zone_enters,
            zone_exits: summary.zone_exits,
            admitted: summary.notifications_admitted,
            deduplicated: summary.notifications_deduplicated,
            unread: summary.unread,
            push_sent: summary.push_sent,
            push_failed: summary.push_failed,
            position_errors: summary.position_errors,
            buffered_ops: summary.buffered_ops,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone-able and can be passed to multiple producers. Every send is a
/// `try_send`: a full channel drops the message rather than blocking.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    pub fn send_zone_event(&self, mut payload: ZoneEventPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::ZoneEvent(payload));
    }

    pub fn send_position(&self, mut payload: PositionPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Position(payload));
    }

    pub fn send_notification(&self, mut payload: NotificationPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Notification(payload));
    }

    pub fn send_status(&self, mut payload: StatusPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Status(payload));
    }

    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create an egress channel pair
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{SafetyTier, TransitionKind, ZoneId};
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_site_is_injected() {
        let (sender, mut rx) = create_egress_channel(4, "mumbai-south".to_string());
        let event = TransitionEvent {
            zone_id: ZoneId(4),
            zone_name: "Dharavi".to_string(),
            tier: SafetyTier::Caution,
            kind: TransitionKind::Enter,
            at_ms: 42,
            sample_latitude: 19.04,
            sample_longitude: 72.85,
            dwell_ms: None,
        };
        sender.send_zone_event(ZoneEventPayload::from_transition("u1", &event));

        match rx.try_recv().unwrap() {
            EgressMessage::ZoneEvent(p) => {
                assert_eq!(p.site.as_deref(), Some("mumbai-south"));
                let json = serde_json::to_value(&p).unwrap();
                assert_eq!(json["t"], "enter");
                assert_eq!(json["tier"], "caution");
                assert!(json.get("dwell_ms").is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sender, mut rx) = create_egress_channel(1, "s".to_string());
        sender.send_status(StatusPayload::new("u1", &TrackingStatus::Active));
        sender.send_status(StatusPayload::new("u1", &TrackingStatus::Degraded("timeout".into())));
        sender.send_metrics(Metrics::new().report());

        assert!(matches!(rx.try_recv(), Ok(EgressMessage::Status(StatusPayload { status: "active", .. }))));
        assert!(rx.try_recv().is_err());
    }
}
