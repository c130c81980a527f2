//! # Geographic Utilities
//!
//! Geodesy primitives used by every stage of segment matching.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_km`] | Great-circle distance between two coordinates |
//! | [`distance_km`] | Same, for [`GpsPoint`]s |
//! | [`bearing_deg`] | Initial bearing from one coordinate to another |
//! | [`bearings_similar`] | Circular bearing comparison with wraparound |
//! | [`compass_direction`] | Eight-way compass label for a bearing |
//! | [`polyline_length_km`] | Total length of a path |
//! | [`km_to_degrees`] | Conservative km-to-degree conversion at a latitude |
//!
//! ## Example
//!
//! ```rust
//! use segment_matcher::geo_utils;
//!
//! let d = geo_utils::haversine_km(46.5197, 6.6323, 46.2044, 6.1432); // Lausanne -> Geneva
//! assert!((d - 51.0).abs() < 2.0);
//!
//! let b = geo_utils::bearing_deg(0.0, 0.0, 1.0, 0.0);
//! assert!(b.abs() < 1e-9); // due north
//! assert!(geo_utils::bearings_similar(10.0, 350.0, 45.0));
//! ```
//!
//! All functions expect WGS84 latitude/longitude in degrees.

use geo::{Distance, Haversine, Point};

use crate::{CompassDirection, GpsPoint};

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in kilometers between two coordinates.
///
/// Symmetric, and exactly 0.0 for identical coordinates.
#[inline]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let point1 = Point::new(lon1, lat1);
    let point2 = Point::new(lon2, lat2);
    Haversine::distance(point1, point2) / 1000.0
}

/// Great-circle distance in kilometers between two GPS points.
#[inline]
pub fn distance_km(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    haversine_km(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
}

/// Total length of a path in kilometers.
///
/// Empty or single-point paths return 0.0.
pub fn polyline_length_km(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| distance_km(&w[0], &w[1]))
        .sum()
}

/// Kilometers per degree of latitude on the sphere [`haversine_km`] uses
/// (mean radius 6371.0088 km).
const KM_PER_DEGREE: f64 = 111.195_08;

/// Slack for float error and for the chord being shorter than the arc.
const MARGIN_FACTOR: f64 = 1.01;

/// Convert kilometers to degrees at a given latitude, rounding up.
///
/// Uses the longitude scale, which is the larger of the two, taken at the
/// pole-ward edge of the reach (`|latitude| + km`). Any point within `km`
/// of a point at `latitude` lies inside a box expanded by the result.
/// Near the poles the result saturates at 360.
#[inline]
pub fn km_to_degrees(km: f64, latitude: f64) -> f64 {
    let lat_degrees = km / KM_PER_DEGREE;
    let reach = (latitude.abs() + lat_degrees).min(90.0);
    let cos = reach.to_radians().cos();
    if cos <= 0.0 {
        return 360.0;
    }
    (MARGIN_FACTOR * km / (KM_PER_DEGREE * cos)).min(360.0)
}

// =============================================================================
// Bearing Functions
// =============================================================================

/// Initial bearing in degrees `[0, 360)` from point 1 to point 2.
///
/// 0 is north, 90 is east. Coincident points yield 0.
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();

    normalize_bearing(y.atan2(x).to_degrees())
}

/// Bearing between two GPS points, see [`bearing_deg`].
#[inline]
pub fn point_bearing(from: &GpsPoint, to: &GpsPoint) -> f64 {
    bearing_deg(from.latitude, from.longitude, to.latitude, to.longitude)
}

/// Map any angle in degrees into `[0, 360)`.
#[inline]
fn normalize_bearing(deg: f64) -> f64 {
    let b = (deg % 360.0 + 360.0) % 360.0;
    // -1e-15 + 360 rounds to 360
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

/// Smallest angle between two bearings, accounting for wraparound.
#[inline]
pub fn bearing_difference(b1: f64, b2: f64) -> f64 {
    let diff = (b1 - b2).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// True if the circular difference between two bearings is within tolerance.
///
/// ```rust
/// use segment_matcher::geo_utils::bearings_similar;
/// assert!(bearings_similar(10.0, 350.0, 45.0));
/// assert!(!bearings_similar(0.0, 180.0, 45.0));
/// ```
#[inline]
pub fn bearings_similar(b1: f64, b2: f64, tolerance_deg: f64) -> bool {
    bearing_difference(b1, b2) <= tolerance_deg
}

/// Eight-way compass label: `round(bearing / 45) mod 8`.
pub fn compass_direction(bearing_deg: f64) -> CompassDirection {
    let sector = (bearing_deg / 45.0).round().rem_euclid(8.0) as usize;
    CompassDirection::ALL[sector % 8]
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_same_point() {
        assert_eq!(haversine_km(46.5197, 6.6323, 46.5197, 6.6323), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let pairs = [
            ((46.5197, 6.6323), (46.2044, 6.1432)),
            ((-33.8688, 151.2093), (-37.8136, 144.9631)),
            ((0.0, 179.9), (0.0, -179.9)),
        ];
        for ((lat1, lon1), (lat2, lon2)) in pairs {
            assert_eq!(
                haversine_km(lat1, lon1, lat2, lon2),
                haversine_km(lat2, lon2, lat1, lon1)
            );
        }
    }

    #[test]
    fn test_haversine_known_value() {
        // London to Paris is approximately 344 km
        let dist = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!(approx_eq(dist, 343.56, 5.0));
    }

    #[test]
    fn test_one_degree_latitude() {
        let dist = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!(approx_eq(dist, 111.19, 0.1));
    }

    #[test]
    fn test_polyline_length() {
        assert_eq!(polyline_length_km(&[]), 0.0);
        assert_eq!(polyline_length_km(&[GpsPoint::new(1.0, 1.0)]), 0.0);

        let path = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.01, 0.0),
            GpsPoint::new(0.02, 0.0),
        ];
        assert!(approx_eq(polyline_length_km(&path), 2.2239, 0.01));
    }

    #[test]
    fn test_bearing_cardinal() {
        assert!(approx_eq(bearing_deg(0.0, 0.0, 1.0, 0.0), 0.0, 1e-9));
        assert!(approx_eq(bearing_deg(0.0, 0.0, 0.0, 1.0), 90.0, 1e-9));
        assert!(approx_eq(bearing_deg(1.0, 0.0, 0.0, 0.0), 180.0, 1e-9));
        assert!(approx_eq(bearing_deg(0.0, 1.0, 0.0, 0.0), 270.0, 1e-9));
    }

    #[test]
    fn test_bearing_range() {
        let b = bearing_deg(46.5, 6.6, 46.5 + 1e-7, 6.6 - 1e-12);
        assert!((0.0..360.0).contains(&b));
        assert_eq!(bearing_deg(46.5, 6.6, 46.5, 6.6), 0.0);
    }

    #[test]
    fn test_bearings_similar_wraparound() {
        assert!(bearings_similar(10.0, 350.0, 45.0));
        assert!(bearings_similar(350.0, 10.0, 45.0));
        assert!(!bearings_similar(0.0, 180.0, 45.0));
        assert!(bearings_similar(100.0, 145.0, 45.0));
        assert!(!bearings_similar(100.0, 146.0, 45.0));
    }

    #[test]
    fn test_compass_direction() {
        assert_eq!(compass_direction(0.0), CompassDirection::N);
        assert_eq!(compass_direction(22.0), CompassDirection::N);
        assert_eq!(compass_direction(23.0), CompassDirection::NE);
        assert_eq!(compass_direction(90.0), CompassDirection::E);
        assert_eq!(compass_direction(180.0), CompassDirection::S);
        assert_eq!(compass_direction(225.0), CompassDirection::SW);
        assert_eq!(compass_direction(315.0), CompassDirection::NW);
        assert_eq!(compass_direction(340.0), CompassDirection::N);
        assert_eq!(compass_direction(359.9), CompassDirection::N);
    }

    #[test]
    fn test_km_to_degrees() {
        let deg = km_to_degrees(111.195, 0.0);
        assert!(approx_eq(deg, 1.0, 0.02));

        // Higher latitude, same distance = more degrees
        assert!(km_to_degrees(111.195, 45.0) > 1.4);
        assert_eq!(km_to_degrees(1.0, 90.0), 360.0);
    }

    #[test]
    fn test_km_to_degrees_covers_haversine_radius() {
        for &lat in &[0.0, 0.3, 30.0, 60.0, 80.0, 89.0, -45.0] {
            for &km in &[0.01, 0.05, 0.2, 1.0] {
                let deg = km_to_degrees(km, lat);
                // A point exactly `deg` away, either axis, is at least `km` away
                let north = haversine_km(lat, 0.0, (lat + deg).min(90.0), 0.0);
                let east = haversine_km(lat, 0.0, lat, deg.min(179.0));
                assert!(north >= km || lat + deg >= 90.0, "lat {} km {}: north {}", lat, km, north);
                assert!(east >= km || deg >= 179.0, "lat {} km {}: east {}", lat, km, east);
            }
        }
    }
}
