//! Delivery sinks
//!
//! Every sink is idempotent on notification id: delivering the same id twice is
//! a no-op unless the second delivery carries a higher priority (an upgrade).

use crate::domain::error::DeliveryError;
use crate::domain::events::UiEvent;
use crate::domain::notification::{Notification, Priority};
use crate::infra::config::SurfaceState;
use crate::infra::metrics::Metrics;
use crate::io::push::PushPayload;
use crate::services::push_worker::PushJob;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

const DELIVERED_SET_CAPACITY: usize = 1024;

/// Highest priority delivered per id, bounded FIFO
#[derive(Default)]
struct DeliveredSet {
    inner: Mutex<(FxHashMap<String, Priority>, VecDeque<String>)>,
}

impl DeliveredSet {
    /// Mark as delivered; false when this id was already delivered at this priority or above
    fn claim(&self, notification: &Notification) -> bool {
        let mut guard = self.inner.lock();
        let (seen, order) = &mut *guard;
        match seen.get_mut(&notification.id) {
            Some(prev) if *prev >= notification.priority => false,
            Some(prev) => {
                *prev = notification.priority;
                true
            }
            None => {
                if order.len() == DELIVERED_SET_CAPACITY {
                    if let Some(oldest) = order.pop_front() {
                        seen.remove(&oldest);
                    }
                }
                seen.insert(notification.id.clone(), notification.priority);
                order.push_back(notification.id.clone());
                true
            }
        }
    }

    /// Undo a claim so a later delivery is attempted again
    fn unclaim(&self, id: &str) {
        let mut guard = self.inner.lock();
        let (seen, order) = &mut *guard;
        if seen.remove(id).is_some() {
            order.retain(|x| x != id);
        }
    }
}

/// In-app list: forwards notifications to the UI event stream
pub struct UiListSink {
    ui_tx: broadcast::Sender<UiEvent>,
    delivered: DeliveredSet,
}

impl UiListSink {
    pub fn new(ui_tx: broadcast::Sender<UiEvent>) -> Self {
        Self { ui_tx, delivered: DeliveredSet::default() }
    }
}

#[async_trait]
impl NotificationSink for UiListSink {
    fn name(&self) -> &'static str {
        "ui_list"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        if !self.delivered.claim(notification) {
            return Ok(());
        }
        // No UI attached is not an error
        let _ = self.ui_tx.send(UiEvent::NotificationDelivered(notification.clone()));
        Ok(())
    }
}

/// Tone played for a notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub volume: f32,
    pub duration_ms: u64,
}

impl Tone {
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Low => Tone { frequency_hz: 440, volume: 0.3, duration_ms: 150 },
            Priority::Medium => Tone { frequency_hz: 660, volume: 0.5, duration_ms: 200 },
            Priority::High => Tone { frequency_hz: 880, volume: 0.7, duration_ms: 300 },
            Priority::Critical => Tone { frequency_hz: 1320, volume: 1.0, duration_ms: 600 },
        }
    }
}

/// Audio backend
pub trait AudioOutput: Send + Sync {
    fn play(&self, tone: Tone);
}

/// Audio output that only logs what it would play
pub struct LogAudioOutput;

impl AudioOutput for LogAudioOutput {
    fn play(&self, tone: Tone) {
        info!(
            frequency_hz = %tone.frequency_hz,
            volume = %tone.volume,
            duration_ms = %tone.duration_ms,
            "tone_played"
        );
    }
}

/// Plays a priority tone; mute is honored for everything below critical
pub struct AudibleSink {
    output: Arc<dyn AudioOutput>,
    muted: bool,
    metrics: Arc<Metrics>,
    delivered: DeliveredSet,
}

impl AudibleSink {
    pub fn new(output: Arc<dyn AudioOutput>, muted: bool, metrics: Arc<Metrics>) -> Self {
        Self { output, muted, metrics, delivered: DeliveredSet::default() }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

#[async_trait]
impl NotificationSink for AudibleSink {
    fn name(&self) -> &'static str {
        "audible"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        if !self.delivered.claim(notification) {
            return Ok(());
        }
        if self.is_muted() && notification.priority != Priority::Critical {
            self.metrics.record_audible(true);
            debug!(id = %notification.id, priority = %notification.priority.as_str(), "tone_muted");
            return Ok(());
        }
        self.metrics.record_audible(false);
        self.output.play(Tone::for_priority(notification.priority));
        Ok(())
    }
}

/// Hands notifications to the push worker while the surface is not visible
pub struct PushSink {
    job_tx: mpsc::Sender<PushJob>,
    surface: watch::Receiver<SurfaceState>,
    delivered: DeliveredSet,
}

impl PushSink {
    pub fn new(job_tx: mpsc::Sender<PushJob>, surface: watch::Receiver<SurfaceState>) -> Self {
        Self { job_tx, surface, delivered: DeliveredSet::default() }
    }
}

#[async_trait]
impl NotificationSink for PushSink {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let surface = *self.surface.borrow();
        if !surface.wants_push() {
            return Ok(());
        }
        if !self.delivered.claim(notification) {
            return Ok(());
        }
        let job = PushJob {
            notification_id: notification.id.clone(),
            payload: PushPayload::from_notification(notification),
            enqueued_at: Instant::now(),
        };
        if let Err(e) = self.job_tx.try_send(job) {
            self.delivered.unclaim(&notification.id);
            return Err(DeliveryError::Failed { sink: "push", reason: e.to_string() });
        }
        Ok(())
    }
}
