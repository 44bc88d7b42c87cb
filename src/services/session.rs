//! Per-entity tracking session
//!
//! Two tasks per tracked entity:
//! - The sampler owns the `ZoneMembershipTracker` and waits on the next
//!   reading, the earliest exit deadline, a retry backoff, or shutdown
//! - The admission task feeds candidates from a bounded channel into the
//!   delivery pipeline
//!
//! The tracker runs on the sample clock. Exit deadlines are mapped to
//! `Instant`s through the last accepted sample, so a timer-driven exit is
//! stamped exactly at its deadline.

use crate::domain::error::PositionError;
use crate::domain::events::{TrackingStatus, UiEvent};
use crate::domain::notification::{Locale, Notification};
use crate::domain::types::{epoch_ms, RawReading, TransitionEvent, TransitionKind};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{
    EgressSender, NotificationPayload, PositionPayload, StatusPayload, ZoneEventPayload,
};
use crate::io::position::PositionSource;
use crate::services::dedup::DedupOutcome;
use crate::services::delivery::NotificationDeliveryPipeline;
use crate::services::tracker::{SampleOutcome, ZoneMembershipTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Session tuning, usually taken from `Config`
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub locale: Locale,
    pub notification_ttl_ms: Option<u64>,
    pub position_timeout: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub candidate_buffer: usize,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            locale: config.locale(),
            notification_ttl_ms: config.zone_notification_ttl_ms(),
            position_timeout: Duration::from_millis(config.position_timeout_ms()),
            retry_initial: Duration::from_millis(config.retry_initial_ms()),
            retry_max: Duration::from_millis(config.retry_max_ms()),
            candidate_buffer: config.candidate_buffer().max(1),
        }
    }
}

/// Handle to a running session
pub struct TrackingSession {
    shutdown_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<TrackingStatus>,
    candidate_tx: mpsc::Sender<Notification>,
    sampler: JoinHandle<()>,
    admission: JoinHandle<()>,
}

impl TrackingSession {
    /// Spawn the sampler and admission tasks
    pub fn spawn(
        tracker: ZoneMembershipTracker,
        source: Box<dyn PositionSource>,
        pipeline: Arc<NotificationDeliveryPipeline>,
        options: SessionOptions,
        ui_tx: broadcast::Sender<UiEvent>,
        egress: Option<EgressSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(TrackingStatus::Idle);
        let (candidate_tx, candidate_rx) = mpsc::channel(options.candidate_buffer);
        let entity = pipeline.entity().to_string();

        info!(entity = %entity, zones = %tracker.membership().len(), "tracking_session_started");

        let admission = Admission {
            pipeline,
            rx: candidate_rx,
            egress: egress.clone(),
            metrics: metrics.clone(),
            entity: entity.clone(),
        };
        let admission = tokio::spawn(admission.run(shutdown_tx.subscribe()));

        let backoff = options.retry_initial;
        let sampler = Sampler {
            tracker,
            source,
            candidate_tx: candidate_tx.clone(),
            status_tx,
            ui_tx,
            egress,
            metrics,
            options,
            entity,
            anchor: None,
            retry_at: None,
            request_deadline: None,
            backoff,
        };
        let sampler = tokio::spawn(sampler.run(shutdown_tx.subscribe()));

        Self { shutdown_tx, status_rx, candidate_tx, sampler, admission }
    }

    /// Sender into the admission queue
    pub fn candidates(&self) -> mpsc::Sender<Notification> {
        self.candidate_tx.clone()
    }

    pub fn status(&self) -> watch::Receiver<TrackingStatus> {
        self.status_rx.clone()
    }

    /// True once the sampler has ended (stop, permission denied, source closed)
    pub fn is_finished(&self) -> bool {
        self.sampler.is_finished()
    }

    /// Stop both tasks; queued candidates are discarded, not flushed
    pub async fn stop(self) {
        self.shutdown_tx.send_replace(true);
        drop(self.candidate_tx);
        if let Err(e) = self.sampler.await {
            error!(error = %e, "sampler_task_failed");
        }
        if let Err(e) = self.admission.await {
            error!(error = %e, "admission_task_failed");
        }
        info!("tracking_session_stopped");
    }
}

/// Sampler task state
struct Sampler {
    tracker: ZoneMembershipTracker,
    source: Box<dyn PositionSource>,
    candidate_tx: mpsc::Sender<Notification>,
    status_tx: watch::Sender<TrackingStatus>,
    ui_tx: broadcast::Sender<UiEvent>,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
    options: SessionOptions,
    entity: String,
    /// Last accepted sample: when it was processed and its sample-clock time
    anchor: Option<(Instant, u64)>,
    retry_at: Option<Instant>,
    /// When the outstanding reading request times out
    request_deadline: Option<Instant>,
    backoff: Duration,
}

enum Flow {
    Continue,
    Stop,
}

impl Sampler {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.set_status(TrackingStatus::Active);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let deadline = self.deadline_instant();
            let retry_at = self.retry_at;
            let position_timeout = self.options.position_timeout;
            let request_deadline = match retry_at {
                Some(_) => None,
                None => Some(*self.request_deadline.get_or_insert_with(|| Instant::now() + position_timeout)),
            };

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    let now_ms = self.sample_clock_now();
                    let events = self.tracker.expire_pending(now_ms);
                    self.emit_transitions(&events);
                }
                _ = sleep_until_opt(retry_at), if retry_at.is_some() => {
                    self.retry_at = None;
                }
                result = timeout_at(request_deadline.unwrap_or_else(Instant::now), self.source.next_reading()),
                    if request_deadline.is_some() =>
                {
                    self.request_deadline = None;
                    let flow = match result {
                        Ok(Ok(reading)) => {
                            self.on_reading(reading);
                            Flow::Continue
                        }
                        Ok(Err(e)) => self.on_error(e),
                        Err(_) => self.on_error(PositionError::Timeout(position_timeout)),
                    };
                    if let Flow::Stop = flow {
                        break;
                    }
                }
            }
        }

        self.tracker.reset();
        if !self.status_tx.borrow().is_blocking() {
            self.set_status(TrackingStatus::Stopped);
        }
        debug!(entity = %self.entity, "sampler_stopped");
    }

    fn on_reading(&mut self, reading: RawReading) {
        let sample = reading.into_sample(epoch_ms());
        let captured_at_ms = sample.captured_at_ms;
        let outcome = self.tracker.process_sample(sample.clone());
        if !outcome.is_accepted() {
            return;
        }

        self.anchor = Some((Instant::now(), captured_at_ms));
        self.backoff = self.options.retry_initial;
        if *self.status_tx.borrow() != TrackingStatus::Active {
            self.set_status(TrackingStatus::Active);
        }

        if let Some(egress) = &self.egress {
            let evaluated = matches!(outcome, SampleOutcome::Evaluated(_));
            egress.send_position(PositionPayload::from_sample(&self.entity, &sample, evaluated));
        }
        let _ = self.ui_tx.send(UiEvent::LocationUpdate(sample));
        self.emit_transitions(outcome.transitions());
    }

    fn on_error(&mut self, e: PositionError) -> Flow {
        self.metrics.record_position_error(matches!(e, PositionError::Timeout(_)));
        match e {
            PositionError::PermissionDenied => {
                error!(entity = %self.entity, "position_permission_denied");
                self.set_status(TrackingStatus::PermissionDenied);
                Flow::Stop
            }
            PositionError::SourceClosed => {
                warn!(entity = %self.entity, "position_source_closed");
                Flow::Stop
            }
            PositionError::Unavailable(_) | PositionError::Timeout(_) => {
                warn!(
                    entity = %self.entity,
                    error = %e,
                    retry_in_ms = %self.backoff.as_millis(),
                    "position_error"
                );
                self.set_status(TrackingStatus::Degraded(e.as_str().to_string()));
                self.retry_at = Some(Instant::now() + self.backoff);
                self.backoff = (self.backoff * 2).min(self.options.retry_max);
                Flow::Continue
            }
        }
    }

    fn emit_transitions(&mut self, events: &[TransitionEvent]) {
        for event in events {
            if let Some(zone) = self.tracker.zone(event.zone_id) {
                let ui_event = match event.kind {
                    TransitionKind::Enter => UiEvent::ZoneEnter(zone.clone()),
                    TransitionKind::Exit => UiEvent::ZoneExit(zone.clone()),
                };
                let _ = self.ui_tx.send(ui_event);
            }
            if let Some(egress) = &self.egress {
                egress.send_zone_event(ZoneEventPayload::from_transition(&self.entity, event));
            }

            let candidate =
                Notification::from_transition(event, self.options.locale, self.options.notification_ttl_ms);
            match self.candidate_tx.try_send(candidate) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    warn!(key = %dropped.dedup_key, "candidate_queue_full");
                    self.metrics.record_candidates_discarded(1);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("candidate_queue_closed");
                }
            }
        }
    }

    fn set_status(&self, status: TrackingStatus) {
        info!(entity = %self.entity, status = %status.as_str(), "tracking_status");
        if let Some(egress) = &self.egress {
            egress.send_status(StatusPayload::new(&self.entity, &status));
        }
        let _ = self.ui_tx.send(UiEvent::Status(status.clone()));
        self.status_tx.send_replace(status);
    }

    fn deadline_instant(&self) -> Option<Instant> {
        let deadline_ms = self.tracker.next_deadline_ms()?;
        let (at, anchor_ms) = self.anchor?;
        Some(at + Duration::from_millis(deadline_ms.saturating_sub(anchor_ms)))
    }

    /// Sample-clock time derived from the anchor
    fn sample_clock_now(&self) -> u64 {
        match self.anchor {
            Some((at, anchor_ms)) => anchor_ms + at.elapsed().as_millis() as u64,
            None => epoch_ms(),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Admission task state
struct Admission {
    pipeline: Arc<NotificationDeliveryPipeline>,
    rx: mpsc::Receiver<Notification>,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
    entity: String,
}

impl Admission {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                candidate = self.rx.recv() => {
                    let Some(candidate) = candidate else {
                        break;
                    };
                    match self.pipeline.admit(candidate).await {
                        DedupOutcome::Admitted(n) | DedupOutcome::Upgraded(n) => {
                            if let Some(egress) = &self.egress {
                                egress.send_notification(NotificationPayload::from_notification(&self.entity, &n));
                            }
                        }
                        DedupOutcome::Dropped { .. } => {}
                    }
                }
            }
        }

        self.rx.close();
        let mut discarded = 0u64;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            self.metrics.record_candidates_discarded(discarded);
            info!(discarded = %discarded, "candidates_discarded_on_stop");
        }
    }
}
