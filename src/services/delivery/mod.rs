//! Notification delivery pipeline
//!
//! Owns the authoritative notification list for one entity:
//! - Admission through the deduplicator, then fan-out to sinks
//! - Read/dismiss lifecycle (`Created -> Delivered -> {Read | Dismissed}`)
//! - Persistence through `NotificationStore`, buffered while the channel is down
//! - Reconcile on reconnect: flush, fetch, merge by id (server wins)
//!
//! The list lives behind a `parking_lot::Mutex` that is never held across an
//! await; store and sink calls happen after the guard is dropped.

pub mod sinks;

pub use sinks::{AudibleSink, AudioOutput, LogAudioOutput, NotificationSink, PushSink, Tone, UiListSink};

use crate::domain::error::{PipelineError, StoreError};
use crate::domain::events::UiEvent;
use crate::domain::notification::{DeliveryState, Notification, Priority, SourceKind};
use crate::domain::types::{epoch_ms, EntityId};
use crate::infra::metrics::Metrics;
use crate::io::store::{ConnectionState, NotificationStore, StoreEvent, StoreUpdate};
use crate::services::dedup::{DedupOutcome, NotificationDeduplicator};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Write waiting for the channel to come back
#[derive(Debug, Clone, PartialEq)]
enum PendingOp {
    Upsert(Notification),
    MarkRead(String),
    Delete(String),
}

impl PendingOp {
    fn id(&self) -> &str {
        match self {
            PendingOp::Upsert(n) => &n.id,
            PendingOp::MarkRead(id) | PendingOp::Delete(id) => id,
        }
    }
}

struct PipelineState {
    /// Sorted by `created_at_ms` descending, ties by id descending
    list: Vec<Notification>,
    channel: ConnectionState,
    pending: Vec<PendingOp>,
}

impl PipelineState {
    fn prune_expired(&mut self, now_ms: u64) {
        self.list.retain(|n| !n.is_expired(now_ms));
    }

    fn unread(&self, now_ms: u64) -> usize {
        self.list.iter().filter(|n| !n.is_read && !n.is_expired(now_ms)).count()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.list.iter().position(|n| n.id == id)
    }

    /// Insert or replace by id, keeping the list order
    fn upsert(&mut self, notification: Notification) {
        if let Some(idx) = self.position(&notification.id) {
            self.list.remove(idx);
        }
        let idx = self
            .list
            .partition_point(|existing| newest_first(existing, &notification) == Ordering::Less);
        self.list.insert(idx, notification);
    }

    /// Upsert a locally admitted row
    ///
    /// Upgrades keep the id and only raise priority, so a lower-priority write
    /// for an id already listed is stale and is refused.
    fn upsert_admitted(&mut self, notification: Notification) -> bool {
        let stale = self
            .position(&notification.id)
            .is_some_and(|idx| self.list[idx].priority > notification.priority);
        if !stale {
            self.upsert(notification);
        }
        !stale
    }
}

fn newest_first(a: &Notification, b: &Notification) -> Ordering {
    b.created_at_ms.cmp(&a.created_at_ms).then_with(|| b.id.cmp(&a.id))
}

pub struct NotificationDeliveryPipeline {
    entity: EntityId,
    state: Mutex<PipelineState>,
    dedup: NotificationDeduplicator,
    sinks: Vec<Arc<dyn NotificationSink>>,
    store: Arc<dyn NotificationStore>,
    ui_tx: broadcast::Sender<UiEvent>,
    metrics: Arc<Metrics>,
}

impl NotificationDeliveryPipeline {
    pub fn new(
        entity: EntityId,
        dedup: NotificationDeduplicator,
        sinks: Vec<Arc<dyn NotificationSink>>,
        store: Arc<dyn NotificationStore>,
        ui_tx: broadcast::Sender<UiEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let channel = *store.connection_state().borrow();
        Self {
            entity,
            state: Mutex::new(PipelineState { list: Vec::new(), channel, pending: Vec::new() }),
            dedup,
            sinks,
            store,
            ui_tx,
            metrics,
        }
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// Run a candidate through dedup and deliver it if admitted or upgraded
    pub async fn admit(&self, candidate: Notification) -> DedupOutcome {
        self.metrics.record_candidate();
        let outcome = self.dedup.offer(candidate, epoch_ms());
        match &outcome {
            DedupOutcome::Admitted(n) => {
                self.metrics.record_admitted();
                info!(
                    id = %n.id,
                    key = %n.dedup_key,
                    priority = %n.priority.as_str(),
                    "notification_admitted"
                );
                self.deliver(n.clone()).await;
            }
            DedupOutcome::Upgraded(n) => {
                self.metrics.record_upgraded();
                info!(id = %n.id, key = %n.dedup_key, priority = %n.priority.as_str(), "notification_upgraded");
                self.deliver(n.clone()).await;
            }
            DedupOutcome::Dropped { .. } => self.metrics.record_deduplicated(),
        }
        outcome
    }

    /// Wrap a received push message as a `push_echo` candidate and admit it
    pub async fn ingest_push_echo(&self, title: &str, body: &str, priority: Priority, tag: &str) -> DedupOutcome {
        let candidate = Notification::new(SourceKind::PushEcho, tag, "received", title, body, priority, epoch_ms());
        self.admit(candidate).await
    }

    async fn deliver(&self, mut notification: Notification) {
        notification.state = DeliveryState::Delivered;
        notification.is_read = false;

        let connected = {
            let mut state = self.state.lock();
            if !state.upsert_admitted(notification.clone()) {
                debug!(id = %notification.id, priority = %notification.priority.as_str(), "stale_delivery_skipped");
                return;
            }
            let connected = state.channel == ConnectionState::Connected;
            if !connected {
                state.pending.push(PendingOp::Upsert(notification.clone()));
                self.metrics.set_buffered_ops(state.pending.len());
            }
            connected
        };

        if connected {
            self.persist(PendingOp::Upsert(notification.clone())).await;
        }
        self.fan_out(&notification).await;
        self.publish_changed();
    }

    async fn fan_out(&self, notification: &Notification) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(notification).await {
                warn!(id = %notification.id, sink = %sink.name(), error = %e, "delivery_failed");
            }
        }
    }

    /// Live notifications, newest first
    pub fn notifications(&self) -> Vec<Notification> {
        let mut state = self.state.lock();
        state.prune_expired(epoch_ms());
        state.list.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().unread(epoch_ms())
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        let state = self.state.lock();
        state.position(id).map(|idx| state.list[idx].clone())
    }

    pub fn connection(&self) -> ConnectionState {
        self.state.lock().channel
    }

    pub fn buffered_ops(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Delivered -> Read. Already read is a no-op.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), PipelineError> {
        let connected = {
            let mut state = self.state.lock();
            state.prune_expired(epoch_ms());
            let idx = state.position(id).ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
            let n = &mut state.list[idx];
            match n.state {
                DeliveryState::Read => return Ok(()),
                DeliveryState::Created | DeliveryState::Dismissed => {
                    return Err(PipelineError::InvalidTransition {
                        id: id.to_string(),
                        from: n.state.as_str(),
                        to: DeliveryState::Read.as_str(),
                    });
                }
                DeliveryState::Delivered => {}
            }
            n.state = DeliveryState::Read;
            n.is_read = true;
            let connected = state.channel == ConnectionState::Connected;
            if !connected {
                state.pending.push(PendingOp::MarkRead(id.to_string()));
                self.metrics.set_buffered_ops(state.pending.len());
            }
            connected
        };

        self.metrics.record_read();
        debug!(id = %id, "notification_read");
        if connected {
            self.persist(PendingOp::MarkRead(id.to_string())).await;
        }
        self.publish_changed();
        Ok(())
    }

    /// Delivered|Read -> Dismissed, removing it from the list
    ///
    /// The dedup key stays registered, so a dismissed condition does not come
    /// straight back while it is still inside the window.
    pub async fn dismiss(&self, id: &str) -> Result<(), PipelineError> {
        let connected = {
            let mut state = self.state.lock();
            let idx = state.position(id).ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
            if state.list[idx].state == DeliveryState::Created {
                return Err(PipelineError::InvalidTransition {
                    id: id.to_string(),
                    from: DeliveryState::Created.as_str(),
                    to: DeliveryState::Dismissed.as_str(),
                });
            }
            state.list.remove(idx);
            let connected = state.channel == ConnectionState::Connected;
            if !connected {
                // A buffered upsert for a row that never reached the server is simply dropped
                let before = state.pending.len();
                state.pending.retain(|op| !matches!(op, PendingOp::Upsert(n) if n.id == id));
                if state.pending.len() == before {
                    state.pending.push(PendingOp::Delete(id.to_string()));
                } else {
                    state.pending.retain(|op| op.id() != id);
                }
                self.metrics.set_buffered_ops(state.pending.len());
            }
            connected
        };

        self.metrics.record_dismissed();
        debug!(id = %id, "notification_dismissed");
        if connected {
            self.persist(PendingOp::Delete(id.to_string())).await;
        }
        self.publish_changed();
        Ok(())
    }

    /// Apply one write against the store, buffering it if the channel dropped
    async fn persist(&self, op: PendingOp) {
        let result = match &op {
            PendingOp::Upsert(n) => self.store.insert(&self.entity, n).await,
            PendingOp::MarkRead(id) => self.store.mark_read(&self.entity, id).await,
            PendingOp::Delete(id) => self.store.delete(&self.entity, id).await,
        };
        match result {
            Ok(()) => {}
            Err(StoreError::Disconnected) => {
                let mut state = self.state.lock();
                if state.channel == ConnectionState::Connected {
                    self.metrics.record_channel_disconnect();
                }
                state.channel = ConnectionState::Disconnected;
                state.pending.push(op);
                self.metrics.set_buffered_ops(state.pending.len());
                debug!(pending = %state.pending.len(), "store_write_buffered");
            }
            Err(StoreError::NotFound(id)) => {
                debug!(id = %id, "store_row_missing");
            }
            Err(e) => {
                warn!(id = %op.id(), error = %e, "store_write_failed");
            }
        }
    }

    /// Mark the channel as down; subsequent writes are buffered
    pub fn on_disconnect(&self) {
        let mut state = self.state.lock();
        if state.channel == ConnectionState::Connected {
            state.channel = ConnectionState::Disconnected;
            self.metrics.record_channel_disconnect();
            info!(entity = %self.entity, "channel_disconnected");
        }
    }

    /// Flush buffered writes, fetch the server list and merge it (server wins)
    ///
    /// Leaves the channel Disconnected if the store drops again midway.
    pub async fn reconcile(&self) -> Result<(), PipelineError> {
        loop {
            let ops = std::mem::take(&mut self.state.lock().pending);
            let flushed = ops.len();
            for (i, op) in ops.iter().enumerate() {
                let result = match op {
                    PendingOp::Upsert(n) => self.store.insert(&self.entity, n).await,
                    PendingOp::MarkRead(id) => self.store.mark_read(&self.entity, id).await,
                    PendingOp::Delete(id) => self.store.delete(&self.entity, id).await,
                };
                match result {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => {
                        let mut state = self.state.lock();
                        let mut rest: Vec<PendingOp> = ops[i..].to_vec();
                        rest.append(&mut state.pending);
                        state.pending = rest;
                        state.channel = ConnectionState::Disconnected;
                        self.metrics.set_buffered_ops(state.pending.len());
                        return Err(e.into());
                    }
                }
            }

            let server_rows = match self.store.list_by_entity(&self.entity).await {
                Ok(rows) => rows,
                Err(e) => {
                    self.state.lock().channel = ConnectionState::Disconnected;
                    return Err(e.into());
                }
            };

            let (arrived, drained) = {
                let mut state = self.state.lock();
                let arrived = self.merge_rows(&mut state, server_rows);
                // Writes buffered while we were flushing need another pass
                let drained = state.pending.is_empty();
                if drained {
                    state.channel = ConnectionState::Connected;
                    self.metrics.set_buffered_ops(0);
                }
                (arrived, drained)
            };

            let arrived_count = arrived.len();
            self.deliver_arrivals(arrived).await;
            if !drained {
                continue;
            }

            self.metrics.record_channel_reconcile();
            info!(entity = %self.entity, flushed = %flushed, arrived = %arrived_count, "channel_reconciled");
            self.publish_changed();
            return Ok(());
        }
    }

    /// Merge server rows by id (server wins); returns rows not known locally
    fn merge_rows(&self, state: &mut PipelineState, rows: Vec<Notification>) -> Vec<Notification> {
        let now = epoch_ms();
        let mut arrived = Vec::new();
        for mut row in rows {
            if row.is_expired(now) {
                continue;
            }
            row.state = if row.is_read { DeliveryState::Read } else { DeliveryState::Delivered };
            if state.position(&row.id).is_none() {
                self.dedup.record(&row, now);
                arrived.push(row.clone());
            }
            state.upsert(row);
        }
        arrived
    }

    async fn deliver_arrivals(&self, arrived: Vec<Notification>) {
        for n in &arrived {
            debug!(id = %n.id, source = %n.source_kind.as_str(), "notification_arrived");
            self.fan_out(n).await;
        }
    }

    /// Apply a change pushed by the store
    pub async fn apply_remote(&self, update: StoreUpdate) {
        match update {
            StoreUpdate::Upserted(row) => {
                let arrived = {
                    let mut state = self.state.lock();
                    self.merge_rows(&mut state, vec![row])
                };
                self.deliver_arrivals(arrived).await;
            }
            StoreUpdate::Deleted(id) => {
                let mut state = self.state.lock();
                if let Some(idx) = state.position(&id) {
                    state.list.remove(idx);
                }
            }
        }
        self.publish_changed();
    }

    fn publish_changed(&self) {
        let unread = self.unread_count();
        self.metrics.set_unread(unread);
        // No UI attached is not an error
        let _ = self.ui_tx.send(UiEvent::NotificationsChanged { unread });
    }

    /// Follow the store's connection status and row stream until shutdown
    ///
    /// A reconnect (or a lagged update stream) triggers `reconcile`.
    pub async fn run_channel_watch(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut connection = self.store.connection_state();
        let mut updates = self.store.subscribe();
        info!(entity = %self.entity, "channel_watch_started");

        if *connection.borrow_and_update() == ConnectionState::Disconnected {
            self.on_disconnect();
        }

        loop {
            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *connection.borrow_and_update();
                    match status {
                        ConnectionState::Disconnected => self.on_disconnect(),
                        ConnectionState::Connected => {
                            if let Err(e) = self.reconcile().await {
                                warn!(error = %e, "reconcile_failed");
                            }
                        }
                    }
                }
                update = updates.recv() => {
                    match update {
                        Ok(StoreEvent { entity, update }) if entity == self.entity => {
                            self.apply_remote(update).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = %skipped, "store_updates_lagged");
                            if let Err(e) = self.reconcile().await {
                                warn!(error = %e, "reconcile_failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        info!(entity = %self.entity, "channel_watch_stopped");
    }
}
