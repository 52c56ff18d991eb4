//! # Geographic Utilities
//!
//! Core geographic computations shared by the segmenter, the fuser and the analytics.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`geodesic_distance`] | Ellipsoidal distance between two (lat, lon) pairs |
//! | [`distance_to`] | Distance to an optional neighbour, 0 at sequence boundaries |
//! | [`polyline_length`] | Total geodesic length of a trace |
//! | [`to_web_mercator`] | Project WGS84 to EPSG:3857 meters |
//! | [`seconds_between`] | Time gap between two samples |
//!
//! ## Algorithm Notes
//!
//! Distances use the geodesic on the WGS84 ellipsoid (Karney's algorithm, via
//! [`geo::Geodesic`]) rather than a spherical or planar model, so they stay accurate at high
//! latitudes and across segments several kilometers long.

use chrono::{DateTime, Utc};
use geo::{Coord, Distance, Geodesic, Point};

use crate::TrackPoint;

/// WGS84 semi-major axis, the sphere radius used by web mercator.
const EARTH_RADIUS_MERCATOR: f64 = 6_378_137.0;

/// Latitude at which web mercator becomes square.
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

// =============================================================================
// Distance Functions
// =============================================================================

/// Geodesic distance in meters between two `(latitude, longitude)` pairs.
///
/// # Example
///
/// ```rust
/// use trace_matcher::geo_utils;
///
/// let london = (51.5074, -0.1278);
/// let paris = (48.8566, 2.3522);
///
/// let distance = geo_utils::geodesic_distance(london, paris);
/// assert!((distance - 343_900.0).abs() < 2_000.0);
/// ```
#[inline]
pub fn geodesic_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let point1 = Point::new(a.1, a.0);
    let point2 = Point::new(b.1, b.0);
    Geodesic::distance(point1, point2)
}

/// Geodesic distance between two track points in meters.
#[inline]
pub fn point_distance(a: &TrackPoint, b: &TrackPoint) -> f64 {
    geodesic_distance((a.latitude, a.longitude), (b.latitude, b.longitude))
}

/// Distance from `a` to its neighbour, 0 when there is none.
#[inline]
pub fn distance_to(a: &TrackPoint, next: Option<&TrackPoint>) -> f64 {
    next.map_or(0.0, |b| point_distance(a, b))
}

/// Distance from every point to its successor; the last entry is 0.
///
/// The result has the same length as `points`.
pub fn distances_to_next(points: &[TrackPoint]) -> Vec<f64> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| distance_to(p, points.get(i + 1)))
        .collect()
}

/// Total geodesic length of a trace in meters. Empty or single-point traces return 0.
pub fn polyline_length(points: &[TrackPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| point_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Projection
// =============================================================================

/// Project WGS84 latitude/longitude to web-mercator (EPSG:3857) meters.
///
/// Latitudes beyond ±85.0511° are clamped to the projection's edge.
pub fn to_web_mercator(latitude: f64, longitude: f64) -> Coord<f64> {
    let lat = latitude.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let x = EARTH_RADIUS_MERCATOR * longitude.to_radians();
    let y = EARTH_RADIUS_MERCATOR
        * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0)
            .tan()
            .ln();
    Coord { x, y }
}

/// Inverse of [`to_web_mercator`], returns `(latitude, longitude)`.
pub fn from_web_mercator(coord: Coord<f64>) -> (f64, f64) {
    let longitude = (coord.x / EARTH_RADIUS_MERCATOR).to_degrees();
    let latitude = (2.0 * (coord.y / EARTH_RADIUS_MERCATOR).exp().atan()
        - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    (latitude, longitude)
}

// =============================================================================
// Time
// =============================================================================

/// Signed gap from `a` to `b` in fractional seconds.
#[inline]
pub fn seconds_between(a: &DateTime<Utc>, b: &DateTime<Utc>) -> f64 {
    (*b - *a).num_milliseconds() as f64 / 1000.0
}

/// True when the gap between two consecutive points exceeds the pause threshold.
///
/// A gap exactly at the threshold is not a pause.
#[inline]
pub fn is_pause(prev: &TrackPoint, next: &TrackPoint, threshold_secs: f64) -> bool {
    seconds_between(&prev.timestamp, &next.timestamp) > threshold_secs
}

// =============================================================================
// Unit Tests
// =============================================================================
