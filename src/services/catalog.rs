//! Zone catalog snapshot
//!
//! The catalog is an immutable `Arc<[Zone]>` snapshot. Refreshing builds a new
//! catalog; sessions already running keep the snapshot they were started with.

use crate::domain::error::CatalogError;
use crate::domain::geo;
use crate::domain::types::{Coordinate, Zone, ZoneId};
use async_trait::async_trait;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Backend that provides zone definitions
#[async_trait]
pub trait ZoneCatalogSource: Send + Sync {
    /// All zones known to the backend
    async fn fetch_all(&self) -> Result<Vec<Zone>, CatalogError>;

    /// Zones whose center lies within `radius_m` of `point`
    async fn query_near(&self, point: Coordinate, radius_m: f64) -> Result<Vec<Zone>, CatalogError>;
}

/// Catalog source backed by the `[[zones]]` config section
pub struct StaticCatalogSource {
    zones: Vec<Zone>,
}

impl StaticCatalogSource {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }
}

#[async_trait]
impl ZoneCatalogSource for StaticCatalogSource {
    async fn fetch_all(&self) -> Result<Vec<Zone>, CatalogError> {
        Ok(self.zones.clone())
    }

    async fn query_near(&self, point: Coordinate, radius_m: f64) -> Result<Vec<Zone>, CatalogError> {
        let mut near = Vec::new();
        for zone in &self.zones {
            let inside = geo::is_inside_circle(point, zone.center(), radius_m)
                .map_err(|e| CatalogError::Source(e.to_string()))?;
            if inside {
                near.push(zone.clone());
            }
        }
        Ok(near)
    }
}

/// Validated, read-only set of zones
#[derive(Debug, Clone)]
pub struct ZoneCatalog {
    zones: Arc<[Zone]>,
}

impl ZoneCatalog {
    /// Build a catalog, rejecting duplicate ids and malformed geometry
    pub fn new(zones: Vec<Zone>) -> Result<Self, CatalogError> {
        let mut seen = FxHashSet::default();
        for zone in &zones {
            if !seen.insert(zone.id) {
                return Err(CatalogError::DuplicateZone(zone.id));
            }
            if !zone.radius_m.is_finite() || zone.radius_m <= 0.0 {
                return Err(CatalogError::InvalidZone {
                    id: zone.id,
                    reason: format!("radius must be positive, got {}", zone.radius_m),
                });
            }
            if let Err(e) = geo::validate(zone.center()) {
                return Err(CatalogError::InvalidZone { id: zone.id, reason: e.to_string() });
            }
        }
        debug!(zones = %zones.len(), "catalog_built");
        Ok(Self { zones: zones.into() })
    }

    /// Fetch from a source and build a fresh snapshot
    pub async fn load(source: &dyn ZoneCatalogSource) -> Result<Self, CatalogError> {
        let zones = source.fetch_all().await?;
        let catalog = Self::new(zones)?;
        info!(zones = %catalog.len(), "catalog_loaded");
        Ok(catalog)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Shared snapshot handle
    pub fn snapshot(&self) -> Arc<[Zone]> {
        Arc::clone(&self.zones)
    }

    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SafetyTier;

    fn zone(id: u32, lat: f64, lon: f64, radius_m: f64) -> Zone {
        Zone {
            id: ZoneId(id),
            name: format!("zone-{id}"),
            center_lat: lat,
            center_lon: lon,
            radius_m,
            tier: SafetyTier::Safe,
            description: String::new(),
        }
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = ZoneCatalog::new(vec![zone(1, 18.9, 72.8, 100.0), zone(1, 19.0, 72.9, 50.0)]).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateZone(ZoneId(1)));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(matches!(
            ZoneCatalog::new(vec![zone(1, 18.9, 72.8, 0.0)]),
            Err(CatalogError::InvalidZone { .. })
        ));
        assert!(matches!(
            ZoneCatalog::new(vec![zone(2, 95.0, 72.8, 10.0)]),
            Err(CatalogError::InvalidZone { .. })
        ));
        assert!(matches!(
            ZoneCatalog::new(vec![zone(3, 18.9, 72.8, f64::NAN)]),
            Err(CatalogError::InvalidZone { .. })
        ));
    }

    #[test]
    fn test_lookup_and_snapshot() {
        let catalog = ZoneCatalog::new(vec![zone(1, 18.9, 72.8, 100.0), zone(2, 19.0, 72.9, 50.0)]).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(ZoneId(2)).map(|z| z.radius_m), Some(50.0));
        assert!(catalog.get(ZoneId(9)).is_none());

        let snap = catalog.snapshot();
        let refreshed = ZoneCatalog::new(vec![zone(3, 19.1, 72.9, 10.0)]).unwrap();
        // Old snapshot is unaffected by a refresh
        assert_eq!(snap.len(), 2);
        assert_eq!(refreshed.len(), 1);
    }

    #[tokio::test]
    async fn test_static_source_query_near() {
        let source = StaticCatalogSource::new(vec![
            zone(1, 18.9220, 72.8347, 500.0),
            zone(2, 19.0760, 72.8777, 500.0),
        ]);
        let near = source.query_near(Coordinate::new(18.9230, 72.8350), 1_000.0).await.unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].id, ZoneId(1));

        let catalog = ZoneCatalog::load(&source).await.unwrap();
        assert_eq!(catalog.len(), 2);
    }
}
