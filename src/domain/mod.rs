//! Domain models - geometry, zones, samples, notifications
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - `PositionSample`, `Zone`, `TransitionEvent` and id newtypes
//! - `geo` - haversine distance and point-in-circle tests
//! - `notification` - `Notification`, `Priority`, `DedupKey`
//! - `events` - `UiEvent` and `TrackingStatus` exposed to the UI layer
//! - `error` - typed error taxonomy

pub mod error;
pub mod events;
pub mod geo;
pub mod notification;
pub mod types;

// Re-export commonly used types at module level
pub use error::{CatalogError, DeliveryError, GeoError, PipelineError, PositionError, StoreError};
pub use events::{TrackingStatus, UiEvent};
pub use notification::{DedupKey, DeliveryState, Locale, Notification, Priority, SourceKind};
pub use types::{
    epoch_ms, Coordinate, EntityId, PositionSample, RawReading, SafetyTier, TransitionEvent,
    TransitionKind, Zone, ZoneId,
};
