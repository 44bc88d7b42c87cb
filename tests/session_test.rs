//! End-to-end tests: position source -> session -> tracker -> pipeline -> sinks

use async_trait::async_trait;
use parking_lot::Mutex;
use safezone_gateway::domain::error::{DeliveryError, PositionError};
use safezone_gateway::domain::events::{TrackingStatus, UiEvent};
use safezone_gateway::domain::notification::Priority;
use safezone_gateway::domain::types::{epoch_ms, EntityId, RawReading, SafetyTier, Zone, ZoneId};
use safezone_gateway::infra::{Config, Metrics, SurfaceState};
use safezone_gateway::io::{
    InMemoryStore, PositionSource, PushPayload, PushService, PushSubscription, ScriptedPositionSource,
};
use safezone_gateway::services::delivery::{AudibleSink, AudioOutput, NotificationSink, PushSink, Tone, UiListSink};
use safezone_gateway::services::{
    create_push_worker, NotificationDeduplicator, NotificationDeliveryPipeline, SessionOptions, TrackingSession,
    ZoneCatalog, ZoneMembershipTracker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

fn zone(id: u32, name: &str, lat: f64, lon: f64, radius_m: f64, tier: SafetyTier) -> Zone {
    Zone {
        id: ZoneId(id),
        name: name.to_string(),
        center_lat: lat,
        center_lon: lon,
        radius_m,
        tier,
        description: String::new(),
    }
}

fn mumbai_zones() -> Vec<Zone> {
    vec![
        zone(1, "Gateway of India", 18.9220, 72.8347, 500.0, SafetyTier::Safe),
        zone(2, "Marine Drive", 18.9440, 72.8230, 700.0, SafetyTier::Safe),
        zone(3, "Crawford Market", 18.9475, 72.8340, 400.0, SafetyTier::Caution),
        zone(4, "Colaba Docks", 18.9067, 72.8200, 300.0, SafetyTier::Restricted),
    ]
}

#[derive(Default)]
struct RecordingAudio {
    tones: Mutex<Vec<Tone>>,
}

impl AudioOutput for RecordingAudio {
    fn play(&self, tone: Tone) {
        self.tones.lock().push(tone);
    }
}

#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<PushPayload>>,
}

#[async_trait]
impl PushService for RecordingPush {
    async fn send(&self, payload: &PushPayload, _subscription: &PushSubscription) -> Result<(), DeliveryError> {
        self.sent.lock().push(payload.clone());
        Ok(())
    }
}

struct Gateway {
    config: Config,
    metrics: Arc<Metrics>,
    ui_tx: broadcast::Sender<UiEvent>,
    pipeline: Arc<NotificationDeliveryPipeline>,
    audio: Arc<RecordingAudio>,
    push: Arc<RecordingPush>,
    _surface_tx: watch::Sender<SurfaceState>,
}

impl Gateway {
    fn new(config: Config, surface: SurfaceState) -> Self {
        let metrics = Arc::new(Metrics::new());
        let (ui_tx, _) = broadcast::channel(512);
        let audio = Arc::new(RecordingAudio::default());
        let push = Arc::new(RecordingPush::default());
        let (surface_tx, surface_rx) = watch::channel(surface);

        let (job_tx, worker) = create_push_worker(
            push.clone(),
            PushSubscription("device-1".to_string()),
            Duration::from_millis(config.push_retry_delay_ms()),
            metrics.clone(),
            16,
        );
        tokio::spawn(worker.run());

        let sinks: Vec<Arc<dyn NotificationSink>> = vec![
            Arc::new(UiListSink::new(ui_tx.clone())),
            Arc::new(AudibleSink::new(audio.clone(), config.muted(), metrics.clone())),
            Arc::new(PushSink::new(job_tx, surface_rx)),
        ];
        let pipeline = Arc::new(NotificationDeliveryPipeline::new(
            EntityId::new(config.entity_id()),
            NotificationDeduplicator::new(config.dedup_window_ms(), config.dedup_max_entries()),
            sinks,
            Arc::new(InMemoryStore::new()),
            ui_tx.clone(),
            metrics.clone(),
        ));

        Self { config, metrics, ui_tx, pipeline, audio, push, _surface_tx: surface_tx }
    }

    fn start(&self, source: impl PositionSource + 'static) -> TrackingSession {
        let catalog = ZoneCatalog::new(self.config.zones().to_vec()).unwrap();
        let tracker = ZoneMembershipTracker::new(catalog.snapshot(), &self.config, self.metrics.clone());
        TrackingSession::spawn(
            tracker,
            Box::new(source),
            self.pipeline.clone(),
            SessionOptions::from_config(&self.config),
            self.ui_tx.clone(),
            None,
            self.metrics.clone(),
        )
    }
}

fn default_config() -> Config {
    Config::default().with_zones(mumbai_zones()).with_exit_debounce_ms(10_000)
}

fn collect(rx: &mut broadcast::Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn zone_names(events: &[UiEvent], enter: bool) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match (e, enter) {
            (UiEvent::ZoneEnter(z), true) | (UiEvent::ZoneExit(z), false) => Some(z.name.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_gateway_of_india_enter_then_exit_after_debounce() {
    let gateway = Gateway::new(default_config(), SurfaceState::Foreground);
    let mut ui_rx = gateway.ui_tx.subscribe();

    let t0 = epoch_ms();
    let mut source = ScriptedPositionSource::new(Duration::from_secs(1));
    for i in 0..3 {
        source = source.reading(RawReading::new(18.9220, 72.8347, 8.0, t0 + i * 1_000));
    }
    for i in 3..5 {
        source = source.reading(RawReading::new(18.9500, 72.8500, 8.0, t0 + i * 1_000));
    }
    let session = gateway.start(source);

    // Last outside sample lands at t=4s; the exit is due 10 s after the first one
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(zone_names(&collect(&mut ui_rx), false).is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let events = collect(&mut ui_rx);
    assert_eq!(zone_names(&events, false), vec!["Gateway of India".to_string()]);

    assert_eq!(gateway.metrics.zone_enters(), 1);
    assert_eq!(gateway.metrics.zone_exits(), 1);

    let list = gateway.pipeline.notifications();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].priority, Priority::Medium);
    assert_eq!(list[1].priority, Priority::Low);
    assert_eq!(gateway.pipeline.unread_count(), 2);

    // Foreground: no push, one tone per notification
    assert!(gateway.push.sent.lock().is_empty());
    assert_eq!(gateway.audio.tones.lock().len(), 2);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_jitter_at_the_boundary_enters_once() {
    let gateway = Gateway::new(default_config(), SurfaceState::Foreground);
    let mut ui_rx = gateway.ui_tx.subscribe();

    // 0.00445 deg of latitude is ~495 m, 0.00454 deg ~505 m
    let t0 = epoch_ms();
    let mut source = ScriptedPositionSource::new(Duration::from_millis(100));
    for i in 0..50u64 {
        let offset = if i % 2 == 0 { 0.00445 } else { 0.00454 };
        source = source.reading(RawReading::new(18.9220 + offset, 72.8347, 5.0, t0 + i * 100));
    }
    let session = gateway.start(source);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let events = collect(&mut ui_rx);
    assert_eq!(zone_names(&events, true), vec!["Gateway of India".to_string()]);
    assert!(zone_names(&events, false).is_empty());
    assert_eq!(gateway.pipeline.notifications().len(), 1);

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_restricted_entry_alerts_while_muted_and_backgrounded() {
    let config = default_config().with_muted(true);
    let gateway = Gateway::new(config, SurfaceState::Background);

    let source = ScriptedPositionSource::new(Duration::from_secs(1))
        .reading(RawReading::new(18.9067, 72.8200, 6.0, epoch_ms()));
    let session = gateway.start(source);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let list = gateway.pipeline.notifications();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].priority, Priority::Critical);
    assert!(list[0].action_required);

    let tones = gateway.audio.tones.lock().clone();
    assert_eq!(tones, vec![Tone::for_priority(Priority::Critical)]);

    let sent = gateway.push.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tag, list[0].dedup_key.as_str());

    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_stops_session() {
    let gateway = Gateway::new(default_config(), SurfaceState::Foreground);
    let mut ui_rx = gateway.ui_tx.subscribe();

    let source = ScriptedPositionSource::new(Duration::from_secs(1))
        .reading(RawReading::new(18.9220, 72.8347, 8.0, epoch_ms()))
        .error(PositionError::PermissionDenied)
        .reading(RawReading::new(18.9500, 72.8500, 8.0, epoch_ms() + 2_000));
    let session = gateway.start(source);
    let status = session.status();

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(*status.borrow(), TrackingStatus::PermissionDenied);
    assert!(status.borrow().is_blocking());
    assert!(session.is_finished());

    let events = collect(&mut ui_rx);
    assert!(events.iter().any(|e| matches!(e, UiEvent::Status(TrackingStatus::PermissionDenied))));
    // The reading scripted after the denial is never consumed
    assert_eq!(events.iter().filter(|e| matches!(e, UiEvent::LocationUpdate(_))).count(), 1);

    session.stop().await;
    assert_eq!(*status.borrow(), TrackingStatus::PermissionDenied);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_with_backoff() {
    let config = default_config().with_position_timing(2_000, 1_000, 4_000);
    let gateway = Gateway::new(config, SurfaceState::Foreground);

    // Never yields a reading: every request times out
    let session = gateway.start(ScriptedPositionSource::new(Duration::from_secs(1)));
    let status = session.status();

    // Timeouts at 2 s, 5 s and 9 s (retry delays 1 s, 2 s, then capped at 4 s)
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(gateway.metrics.position_errors(), 3);
    assert_eq!(*status.borrow(), TrackingStatus::Degraded("timeout".to_string()));
    assert!(!session.is_finished());

    session.stop().await;
    assert_eq!(*status.borrow(), TrackingStatus::Stopped);
}
