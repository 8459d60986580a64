//! Great-circle distance and bearing arithmetic.

use crate::types::PositionSample;

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Distance between two samples' positions in meters.
pub fn distance_meters(a: &PositionSample, b: &PositionSample) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Map an angle difference into (-180, 180].
///
/// A single correction is applied, which covers any difference of two
/// headings in [0, 360).
pub fn normalize_angle_delta(degrees: f64) -> f64 {
    let mut angle = degrees;
    if angle > 180.0 {
        angle -= 360.0;
    }
    if angle < -180.0 {
        angle += 360.0;
    }
    if angle == -180.0 {
        angle = 180.0;
    }
    angle
}

/// Absolute heading change going from `from` to `to`, in degrees.
pub fn heading_delta(from: f64, to: f64) -> f64 {
    normalize_angle_delta(to - from).abs()
}
