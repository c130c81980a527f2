//! Synthetic track generation shared by the integration tests.

#![allow(dead_code)]

use segment_matcher::{MatchRequest, Track};

/// Mean earth radius used by the haversine distance.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Move `distance_m` from `(lat, lng)` along `bearing_deg`.
///
/// Flat-earth step, accurate to well under a meter for the few-kilometer
/// tracks built here.
pub fn offset(lat: f64, lng: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let d = distance_m / 1000.0 / EARTH_RADIUS_KM;
    let b = bearing_deg.to_radians();
    let dlat = (d * b.cos()).to_degrees();
    let dlng = (d * b.sin() / lat.to_radians().cos()).to_degrees();
    (lat + dlat, lng + dlng)
}

/// Polyline starting at `start`, walking each `(bearing_deg, length_km)` leg
/// with a point every `spacing_m`. Joints are not duplicated.
pub fn polyline(start: (f64, f64), legs: &[(f64, f64)], spacing_m: f64) -> Vec<(f64, f64)> {
    let mut points = vec![start];
    let mut current = start;
    for &(bearing, length_km) in legs {
        let steps = (length_km * 1000.0 / spacing_m).round() as usize;
        for _ in 0..steps {
            current = offset(current.0, current.1, bearing, spacing_m);
            points.push(current);
        }
    }
    points
}

/// Shift every point sideways.
pub fn shifted(points: &[(f64, f64)], bearing_deg: f64, distance_m: f64) -> Vec<(f64, f64)> {
    points
        .iter()
        .map(|&(lat, lng)| offset(lat, lng, bearing_deg, distance_m))
        .collect()
}

/// Small deterministic jitter source.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    /// Uniform in `[-1, 1)`.
    pub fn next_signed(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }
}

/// Add up to `amplitude_m` of random jitter to every point.
pub fn jittered(points: &[(f64, f64)], amplitude_m: f64, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = Lcg::new(seed);
    points
        .iter()
        .map(|&(lat, lng)| {
            let (lat, lng) = offset(lat, lng, 0.0, rng.next_signed() * amplitude_m);
            offset(lat, lng, 90.0, rng.next_signed() * amplitude_m)
        })
        .collect()
}

pub fn track(id: &str, points: &[(f64, f64)]) -> Track {
    let coords: Vec<(f64, f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, &(lat, lng))| (lat, lng, 400.0 + (i as f64 * 0.05).sin() * 20.0))
        .collect();
    Track::from_coordinates(id, id, &coords)
}

pub fn reversed(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    points.iter().rev().copied().collect()
}

pub const START: (f64, f64) = (46.5197, 6.6323);

/// Two 2 km runs due north, 20 m apart, a point every 5 m.
pub fn parallel_pair() -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let a = polyline(START, &[(0.0, 2.0)], 5.0);
    let b = shifted(&a, 90.0, 20.0);
    (a, b)
}

pub fn pair_request(delta: f64) -> MatchRequest {
    let (a, b) = parallel_pair();
    MatchRequest::new(
        &[track("a", &a), track("b", &b)],
        delta,
        segment_matcher::Algorithm::Standard,
    )
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
