//! Notification persistence and real-time channel
//!
//! `NotificationStore` is the seam towards the backend that holds the
//! authoritative rows. It exposes a connection status (`watch`) and a stream of
//! row changes (`broadcast`) so the pipeline can merge remote writes and
//! reconcile after a reconnect.

use crate::domain::error::StoreError;
use crate::domain::notification::Notification;
use crate::domain::types::EntityId;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Real-time channel status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Row change pushed by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    Upserted(Notification),
    Deleted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub entity: EntityId,
    pub update: StoreUpdate,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert or replace a row (keyed by notification id)
    async fn insert(&self, entity: &EntityId, notification: &Notification) -> Result<(), StoreError>;

    async fn mark_read(&self, entity: &EntityId, id: &str) -> Result<(), StoreError>;

    async fn delete(&self, entity: &EntityId, id: &str) -> Result<(), StoreError>;

    async fn list_by_entity(&self, entity: &EntityId) -> Result<Vec<Notification>, StoreError>;

    /// Live row changes for all entities; consumers filter by entity
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// In-process store with a connectivity switch
///
/// While disconnected every operation fails with `StoreError::Disconnected`
/// and no updates are broadcast. `server_insert`/`server_delete` model rows
/// written by another device or by the backend itself.
pub struct InMemoryStore {
    rows: Mutex<FxHashMap<EntityId, FxHashMap<String, Notification>>>,
    updates: broadcast::Sender<StoreEvent>,
    connection: watch::Sender<ConnectionState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (connection, _) = watch::channel(ConnectionState::Connected);
        Self { rows: Mutex::new(FxHashMap::default()), updates, connection }
    }

    /// Flip the channel state; subscribers see the change on `connection_state()`
    pub fn set_connected(&self, connected: bool) {
        let state = if connected { ConnectionState::Connected } else { ConnectionState::Disconnected };
        self.connection.send_replace(state);
        info!(connected = %connected, "store_connection_changed");
    }

    pub fn is_connected(&self) -> bool {
        *self.connection.borrow() == ConnectionState::Connected
    }

    /// Row written outside this process
    pub fn server_insert(&self, entity: &EntityId, notification: Notification) {
        self.rows
            .lock()
            .entry(entity.clone())
            .or_default()
            .insert(notification.id.clone(), notification.clone());
        self.publish(entity, StoreUpdate::Upserted(notification));
    }

    /// Row deleted outside this process
    pub fn server_delete(&self, entity: &EntityId, id: &str) {
        let removed = self.rows.lock().get_mut(entity).and_then(|rows| rows.remove(id));
        if removed.is_some() {
            self.publish(entity, StoreUpdate::Deleted(id.to_string()));
        }
    }

    /// Snapshot of an entity's rows regardless of connectivity
    pub fn rows(&self, entity: &EntityId) -> Vec<Notification> {
        self.rows.lock().get(entity).map(|rows| rows.values().cloned().collect()).unwrap_or_default()
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }

    fn publish(&self, entity: &EntityId, update: StoreUpdate) {
        if !self.is_connected() {
            return;
        }
        // No receivers is fine
        let _ = self.updates.send(StoreEvent { entity: entity.clone(), update });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert(&self, entity: &EntityId, notification: &Notification) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.rows
            .lock()
            .entry(entity.clone())
            .or_default()
            .insert(notification.id.clone(), notification.clone());
        debug!(entity = %entity, id = %notification.id, "store_insert");
        self.publish(entity, StoreUpdate::Upserted(notification.clone()));
        Ok(())
    }

    async fn mark_read(&self, entity: &EntityId, id: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let updated = {
            let mut rows = self.rows.lock();
            let row = rows
                .get_mut(entity)
                .and_then(|rows| rows.get_mut(id))
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            row.is_read = true;
            row.clone()
        };
        self.publish(entity, StoreUpdate::Upserted(updated));
        Ok(())
    }

    async fn delete(&self, entity: &EntityId, id: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let removed = self.rows.lock().get_mut(entity).and_then(|rows| rows.remove(id));
        if removed.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.publish(entity, StoreUpdate::Deleted(id.to_string()));
        Ok(())
    }

    async fn list_by_entity(&self, entity: &EntityId) -> Result<Vec<Notification>, StoreError> {
        self.ensure_connected()?;
        Ok(self.rows(entity))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.updates.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::{Priority, SourceKind};

    fn notification(at: u64) -> Notification {
        Notification::new(SourceKind::System, "store", "test", "t", "b", Priority::Low, at)
    }

    #[tokio::test]
    async fn test_insert_list_mark_delete() {
        let store = InMemoryStore::new();
        let entity = EntityId::new("u1");
        let n = notification(1);

        store.insert(&entity, &n).await.unwrap();
        assert_eq!(store.list_by_entity(&entity).await.unwrap().len(), 1);

        store.mark_read(&entity, &n.id).await.unwrap();
        assert!(store.list_by_entity(&entity).await.unwrap()[0].is_read);

        store.delete(&entity, &n.id).await.unwrap();
        assert!(store.list_by_entity(&entity).await.unwrap().is_empty());
        assert_eq!(store.delete(&entity, &n.id).await, Err(StoreError::NotFound(n.id.clone())));
    }

    #[tokio::test]
    async fn test_disconnected_rejects_operations() {
        let store = InMemoryStore::new();
        let entity = EntityId::new("u1");
        let mut conn = store.connection_state();

        store.set_connected(false);
        assert_eq!(*conn.borrow_and_update(), ConnectionState::Disconnected);
        assert_eq!(store.insert(&entity, &notification(1)).await, Err(StoreError::Disconnected));
        assert_eq!(store.list_by_entity(&entity).await, Err(StoreError::Disconnected));
    }

    #[tokio::test]
    async fn test_updates_broadcast_only_when_connected() {
        let store = InMemoryStore::new();
        let entity = EntityId::new("u1");
        let mut rx = store.subscribe();

        let n = notification(1);
        store.server_insert(&entity, n.clone());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity, entity);
        assert_eq!(event.update, StoreUpdate::Upserted(n));

        store.set_connected(false);
        store.server_insert(&entity, notification(2));
        assert!(rx.try_recv().is_err());
        // The row itself is stored and shows up after reconnect
        store.set_connected(true);
        assert_eq!(store.list_by_entity(&entity).await.unwrap().len(), 2);
    }
}
