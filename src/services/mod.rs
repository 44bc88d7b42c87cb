//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `catalog` - Zone catalog snapshot and its source
//! - `tracker` - Zone membership tracking with exit debounce
//! - `dedup` - Notification deduplication window
//! - `delivery` - Notification list, sinks and store reconcile
//! - `push_worker` - Async push delivery worker
//! - `session` - Per-entity sampler and admission tasks

pub mod catalog;
pub mod dedup;
pub mod delivery;
pub mod push_worker;
pub mod session;
pub mod tracker;

// Re-export commonly used types
pub use catalog::{StaticCatalogSource, ZoneCatalog, ZoneCatalogSource};
pub use dedup::{DedupOutcome, NotificationDeduplicator};
pub use delivery::NotificationDeliveryPipeline;
pub use push_worker::{create_push_worker, PushJob, PushWorker};
pub use session::{SessionOptions, TrackingSession};
pub use tracker::ZoneMembershipTracker;
