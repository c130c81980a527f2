//! Polyline reduction for display paths.
//!
//! Matched paths are smoothed first (moving average removes per-point GPS
//! jitter) and then simplified (Douglas-Peucker drops redundant colinear
//! points). Both work in plain lat/lng degrees and always keep the true
//! first and last points.

use geo::{algorithm::simplify::Simplify, Coord, LineString};

use crate::GpsPoint;

/// Douglas-Peucker simplification with a tolerance in degrees.
///
/// Distances are measured in the lng/lat plane to the nearest point of each
/// chord, so a closed loop (first == last) still keeps its far side. Paths
/// of two points or fewer come back unchanged. The result is idempotent:
/// simplifying it again with the same tolerance is a no-op.
///
/// ```rust
/// use segment_matcher::{douglas_peucker, GpsPoint};
///
/// let line: Vec<GpsPoint> = (0..10).map(|i| GpsPoint::new(i as f64 * 0.001, 0.0)).collect();
/// assert_eq!(douglas_peucker(&line, 0.000015).len(), 2);
/// ```
pub fn douglas_peucker(points: &[GpsPoint], tolerance: f64) -> Vec<GpsPoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();

    line.simplify(&tolerance)
        .coords()
        .map(|c| GpsPoint::new(c.y, c.x))
        .collect()
}

/// Centered moving average over `window` points, clamped at the ends.
///
/// The first and last output points are the input endpoints, never
/// averaged.
pub fn smooth(points: &[GpsPoint], window: usize) -> Vec<GpsPoint> {
    if points.len() <= 2 || window <= 1 {
        return points.to_vec();
    }

    let half = window / 2;
    let last = points.len() - 1;
    let mut smoothed = Vec::with_capacity(points.len());

    for i in 0..points.len() {
        if i == 0 || i == last {
            smoothed.push(points[i]);
            continue;
        }
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(points.len());
        let count = (end - start) as f64;

        let avg_lat: f64 = points[start..end].iter().map(|p| p.latitude).sum::<f64>() / count;
        let avg_lng: f64 = points[start..end].iter().map(|p| p.longitude).sum::<f64>() / count;

        smoothed.push(GpsPoint::new(avg_lat, avg_lng));
    }

    smoothed
}

/// Display pipeline: smooth, then simplify.
pub fn smooth_then_simplify(points: &[GpsPoint], window: usize, tolerance: f64) -> Vec<GpsPoint> {
    douglas_peucker(&smooth(points, window), tolerance)
}
