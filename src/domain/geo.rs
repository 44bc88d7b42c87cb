//! Great-circle geometry for circular zones

use crate::domain::error::GeoError;
use crate::domain::types::Coordinate;
use geo::{Distance, Haversine, Point};

/// Reject NaN/infinite and out-of-range coordinates
#[inline]
pub fn validate(c: Coordinate) -> Result<(), GeoError> {
    let valid = c.lat.is_finite()
        && c.lon.is_finite()
        && (-90.0..=90.0).contains(&c.lat)
        && (-180.0..=180.0).contains(&c.lon);
    if valid {
        Ok(())
    } else {
        Err(GeoError::InvalidCoordinate { lat: c.lat, lon: c.lon })
    }
}

/// Haversine distance in meters between two coordinates
pub fn distance_meters(a: Coordinate, b: Coordinate) -> Result<f64, GeoError> {
    validate(a)?;
    validate(b)?;
    // geo points are (x = lon, y = lat)
    Ok(Haversine::distance(Point::new(a.lon, a.lat), Point::new(b.lon, b.lat)))
}

/// True iff `point` lies within `radius_m` of `center` (boundary inclusive)
pub fn is_inside_circle(point: Coordinate, center: Coordinate, radius_m: f64) -> Result<bool, GeoError> {
    if !radius_m.is_finite() || radius_m < 0.0 {
        return Err(GeoError::InvalidRadius(radius_m));
    }
    Ok(distance_meters(point, center)? <= radius_m)
}
