//! # Segment Matcher
//!
//! Finds the stretches where two or more GPS tracks travel the same physical
//! route in the same direction.
//!
//! This library provides:
//! - A cached uniform spatial grid for "nearest point within radius" queries
//! - Direction-aware point matching between track pairs
//! - Grouping and merging of matches into shared segments
//! - Douglas-Peucker simplification and moving-average smoothing for display
//! - A debounced background dispatcher with an inline fallback
//!
//! ## Features
//!
//! - **`parallel`** - Match track pairs in parallel with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use segment_matcher::{Algorithm, MatchEngine, Track};
//!
//! // Two runs up the same street, ~20m apart
//! let run1: Vec<(f64, f64, f64)> = (0..400)
//!     .map(|i| (46.5 + i as f64 * 0.000045, 6.6, 400.0))
//!     .collect();
//! let run2: Vec<(f64, f64, f64)> = run1
//!     .iter()
//!     .map(|&(lat, lng, ele)| (lat, lng + 0.00026, ele))
//!     .collect();
//!
//! let tracks = vec![
//!     Track::from_coordinates("run-1", "Monday", &run1),
//!     Track::from_coordinates("run-2", "Thursday", &run2),
//! ];
//!
//! let engine = MatchEngine::new();
//! let segments = engine.match_tracks(&tracks, 50.0, Algorithm::Standard);
//! for seg in &segments {
//!     println!("{} <-> {}: {:.2} km heading {}", seg.track_a_name, seg.track_b_name,
//!         seg.distance_km, seg.direction_label);
//! }
//! ```

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{MatchError, Result};

// Geodesy primitives (distance, bearing, compass labels)
pub mod geo_utils;
pub use geo_utils::{bearing_deg, bearings_similar, compass_direction, haversine_km};

// Uniform lat/lng grid for nearest-neighbour lookups
pub mod grid;
pub use grid::{GridCache, NearestPoint, SpatialGrid};

// Display polyline reduction
pub mod simplify;
pub use simplify::{douglas_peucker, smooth};

// Per-pair matching pipeline
pub mod matcher;

// Multi-track orchestration with owned grid cache
pub mod engine;
pub use engine::{MatchEngine, MatchStats};

// Background worker with debouncing
pub mod dispatcher;
pub use dispatcher::{DispatchMode, MatchDispatcher, MatchRequest};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use segment_matcher::GpsPoint;
/// let point = GpsPoint::new(46.5197, 6.6323); // Lausanne
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box for a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from track points.
    pub fn from_points(points: &[TrackPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }
}

/// One recorded sample of a track, as produced by the GPX parser.
///
/// `cumulative_distance_km` is non-decreasing along the track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
    pub elevation_meters: f64,
    pub cumulative_distance_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<u32>,
}

impl TrackPoint {
    /// Create a track point without biometric data.
    pub fn new(
        latitude: f64,
        longitude: f64,
        elevation_meters: f64,
        cumulative_distance_km: f64,
    ) -> Self {
        Self {
            latitude,
            longitude,
            elevation_meters,
            cumulative_distance_km,
            heart_rate: None,
            cadence: None,
        }
    }

    /// The horizontal position of this sample.
    #[inline]
    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// A complete recorded activity.
///
/// The engine only reads tracks. `id` keys the spatial grid cache, so a
/// track whose points change must either change length or be invalidated
/// explicitly (see [`MatchEngine::invalidate_track`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub name: String,
    pub points: Vec<TrackPoint>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Display color, opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl Track {
    /// Create a visible track from already-parsed points.
    pub fn new(id: impl Into<String>, name: impl Into<String>, points: Vec<TrackPoint>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            points,
            visible: true,
            color: None,
        }
    }

    /// Build a track from raw `(lat, lng, elevation)` samples, accumulating
    /// haversine distance the same way the GPX parser does.
    pub fn from_coordinates(
        id: impl Into<String>,
        name: impl Into<String>,
        coords: &[(f64, f64, f64)],
    ) -> Self {
        let mut points = Vec::with_capacity(coords.len());
        let mut cumulative = 0.0;
        for (i, &(lat, lng, ele)) in coords.iter().enumerate() {
            if i > 0 {
                let (prev_lat, prev_lng, _) = coords[i - 1];
                cumulative += haversine_km(prev_lat, prev_lng, lat, lng);
            }
            points.push(TrackPoint::new(lat, lng, ele, cumulative));
        }
        Self::new(id, name, points)
    }

    /// Copy of this track carrying only what matching needs.
    pub fn matching_copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            points: self.points.clone(),
            visible: self.visible,
            color: None,
        }
    }

    /// True if every point has finite, in-range coordinates.
    pub fn has_valid_coordinates(&self) -> bool {
        self.points.iter().all(|p| p.position().is_valid())
    }
}

/// One of the eight compass directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompassDirection {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl CompassDirection {
    /// Directions in clockwise order starting at north.
    pub const ALL: [CompassDirection; 8] = [
        CompassDirection::N,
        CompassDirection::NE,
        CompassDirection::E,
        CompassDirection::SE,
        CompassDirection::S,
        CompassDirection::SW,
        CompassDirection::W,
        CompassDirection::NW,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompassDirection::N => "N",
            CompassDirection::NE => "NE",
            CompassDirection::E => "E",
            CompassDirection::SE => "SE",
            CompassDirection::S => "S",
            CompassDirection::SW => "SW",
            CompassDirection::W => "W",
            CompassDirection::NW => "NW",
        }
    }
}

impl fmt::Display for CompassDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a matched pair a segment index range refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSide {
    A,
    B,
}

/// A section two tracks share, ready for rendering.
///
/// Index ranges always ascend; `start_index_b <= end_index_b` even when
/// track B was ridden the opposite way (bidirectional matching).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedSegment {
    pub id: String,
    pub track_a_id: String,
    pub track_b_id: String,
    pub track_a_name: String,
    pub track_b_name: String,
    /// Smoothed and simplified path along track A
    pub points: Vec<GpsPoint>,
    /// Length measured over the unsimplified range of track A
    pub distance_km: f64,
    pub direction_bearing_deg: f64,
    pub direction_label: CompassDirection,
    pub start_index_a: usize,
    pub end_index_a: usize,
    pub start_index_b: usize,
    pub end_index_b: usize,
}

impl MatchedSegment {
    /// Inclusive index range into track A's points.
    pub fn index_range_a(&self) -> RangeInclusive<usize> {
        self.start_index_a..=self.end_index_a
    }

    /// Inclusive index range into track B's points.
    pub fn index_range_b(&self) -> RangeInclusive<usize> {
        self.start_index_b..=self.end_index_b
    }

    /// Slice `(cumulative_distance_km, elevation_meters)` pairs out of one
    /// side of the match, for elevation comparison charts.
    ///
    /// Returns an empty vector when the range does not fit the given track.
    pub fn elevation_profile(&self, track: &Track, side: TrackSide) -> Vec<(f64, f64)> {
        let range = match side {
            TrackSide::A => self.index_range_a(),
            TrackSide::B => self.index_range_b(),
        };
        match track.points.get(range) {
            Some(slice) => slice
                .iter()
                .map(|p| (p.cumulative_distance_km, p.elevation_meters))
                .collect(),
            None => Vec::new(),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Matching strategy selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Fixed sample rate, direction filter, same-progression grouping
    #[default]
    Standard,
    /// Sample rate proportional to track length
    Adaptive,
    /// No bearing filter and either progression, for out-and-back paths
    Bidirectional,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Standard => "standard",
            Algorithm::Adaptive => "adaptive",
            Algorithm::Bidirectional => "bidirectional",
        }
    }

    /// The switches the shared pipeline runs with for this algorithm.
    pub fn profile(&self) -> AlgorithmProfile {
        match self {
            Algorithm::Standard => AlgorithmProfile {
                sample_rate: SampleRateStrategy::Fixed,
                direction_filter: true,
                progression_check: true,
            },
            Algorithm::Adaptive => AlgorithmProfile {
                sample_rate: SampleRateStrategy::Adaptive,
                direction_filter: true,
                progression_check: true,
            },
            Algorithm::Bidirectional => AlgorithmProfile {
                sample_rate: SampleRateStrategy::Adaptive,
                direction_filter: false,
                progression_check: false,
            },
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = MatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Algorithm::Standard),
            "adaptive" => Ok(Algorithm::Adaptive),
            "bidirectional" => Ok(Algorithm::Bidirectional),
            other => Err(MatchError::config(format!("unknown algorithm '{}'", other))),
        }
    }
}

/// How the stride over track A is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRateStrategy {
    /// Always `point_sample_rate`
    Fixed,
    /// `ceil(len / adaptive_target_points)` clamped to the adaptive range
    Adaptive,
}

/// Tagged switches for the one shared matching pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmProfile {
    pub sample_rate: SampleRateStrategy,
    /// Reject candidates whose local bearings disagree, and require merged
    /// segments to share direction
    pub direction_filter: bool,
    /// Require both indices to progress the same way within a segment
    pub progression_check: bool,
}

/// Tunable constants for segment matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Raw segments with fewer matched points are dropped.
    /// Default: 8
    pub min_segment_points: usize,

    /// Final segments shorter than this are dropped.
    /// Default: 0.08 km
    pub min_segment_distance_km: f64,

    /// Stride over track A for the standard algorithm.
    /// Default: 3
    pub point_sample_rate: usize,

    /// Largest index jump (on either track) that still continues a segment.
    /// Default: 30
    pub max_index_gap: usize,

    /// Consecutive segments closer than this are joined; endpoint proximity
    /// for the overlap merge is twice this.
    /// Default: 0.25 km
    pub merge_gap_km: f64,

    /// Fraction of the shorter segment's index span that must overlap.
    /// Default: 0.2
    pub overlap_threshold: f64,

    /// Sampled point budget per track for the adaptive stride.
    /// Default: 500
    pub adaptive_target_points: usize,

    /// Adaptive stride clamp, lower bound. Default: 1
    pub adaptive_min_rate: usize,

    /// Adaptive stride clamp, upper bound. Default: 5
    pub adaptive_max_rate: usize,

    /// Point-level bearing tolerance. Default: 45°
    pub point_bearing_tolerance_deg: f64,

    /// Segment-level bearing tolerance used when merging. Default: 60°
    pub segment_bearing_tolerance_deg: f64,

    /// Grid cells are `max(2 * delta, min_grid_cell_km)` wide.
    /// Default: 0.5 km
    pub min_grid_cell_km: f64,

    /// Moving-average window for display paths. Default: 5
    pub smoothing_window: usize,

    /// Douglas-Peucker tolerance in degrees. Default: 0.000015 (~1.5 m)
    pub simplify_tolerance_deg: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_segment_points: 8,
            min_segment_distance_km: 0.08,
            point_sample_rate: 3,
            max_index_gap: 30,
            merge_gap_km: 0.25,
            overlap_threshold: 0.2,
            adaptive_target_points: 500,
            adaptive_min_rate: 1,
            adaptive_max_rate: 5,
            point_bearing_tolerance_deg: 45.0,
            segment_bearing_tolerance_deg: 60.0,
            min_grid_cell_km: 0.5,
            smoothing_window: 5,
            simplify_tolerance_deg: 0.000015,
        }
    }
}

impl MatchConfig {
    /// Check every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.point_sample_rate == 0 {
            return Err(MatchError::config("point_sample_rate must be at least 1"));
        }
        if self.adaptive_target_points == 0 {
            return Err(MatchError::config("adaptive_target_points must be at least 1"));
        }
        if self.adaptive_min_rate == 0 || self.adaptive_min_rate > self.adaptive_max_rate {
            return Err(MatchError::config(format!(
                "adaptive rate range [{}, {}] is invalid",
                self.adaptive_min_rate, self.adaptive_max_rate
            )));
        }
        if self.smoothing_window == 0 {
            return Err(MatchError::config("smoothing_window must be at least 1"));
        }
        let positive = [
            ("merge_gap_km", self.merge_gap_km),
            ("min_grid_cell_km", self.min_grid_cell_km),
            ("point_bearing_tolerance_deg", self.point_bearing_tolerance_deg),
            ("segment_bearing_tolerance_deg", self.segment_bearing_tolerance_deg),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MatchError::config(format!("{} must be positive, got {}", name, value)));
            }
        }
        let non_negative = [
            ("min_segment_distance_km", self.min_segment_distance_km),
            ("overlap_threshold", self.overlap_threshold),
            ("simplify_tolerance_deg", self.simplify_tolerance_deg),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MatchError::config(format!("{} must be non-negative, got {}", name, value)));
            }
        }
        Ok(())
    }

    /// Grid cell size for a matching distance, wide enough that a
    /// one-cell search radius never misses a neighbour.
    pub fn grid_cell_size_km(&self, delta_km: f64) -> f64 {
        (2.0 * delta_km).max(self.min_grid_cell_km)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_coords() -> Vec<(f64, f64, f64)> {
        vec![
            (46.5197, 6.6323, 372.0),
            (46.5207, 6.6330, 375.0),
            (46.5217, 6.6338, 381.0),
            (46.5227, 6.6345, 390.0),
        ]
    }

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(46.5197, 6.6323).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_track_from_coordinates_accumulates_distance() {
        let track = Track::from_coordinates("t1", "Morning", &sample_coords());
        assert_eq!(track.points.len(), 4);
        assert_eq!(track.points[0].cumulative_distance_km, 0.0);
        for w in track.points.windows(2) {
            assert!(w[1].cumulative_distance_km > w[0].cumulative_distance_km);
        }
        assert!(track.visible);
    }

    #[test]
    fn test_matching_copy_drops_color() {
        let mut track = Track::from_coordinates("t1", "Morning", &sample_coords());
        track.color = Some("#ff0000".to_string());
        let copy = track.matching_copy();
        assert_eq!(copy.color, None);
        assert_eq!(copy.points, track.points);
    }

    #[test]
    fn test_algorithm_parse_and_display() {
        assert_eq!("standard".parse::<Algorithm>().unwrap(), Algorithm::Standard);
        assert_eq!("Bidirectional".parse::<Algorithm>().unwrap(), Algorithm::Bidirectional);
        assert!("fastest".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::Adaptive.to_string(), "adaptive");
    }

    #[test]
    fn test_algorithm_profiles() {
        let standard = Algorithm::Standard.profile();
        assert_eq!(standard.sample_rate, SampleRateStrategy::Fixed);
        assert!(standard.direction_filter && standard.progression_check);

        let bidi = Algorithm::Bidirectional.profile();
        assert_eq!(bidi.sample_rate, SampleRateStrategy::Adaptive);
        assert!(!bidi.direction_filter && !bidi.progression_check);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(MatchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MatchConfig {
            adaptive_min_rate: 6,
            ..MatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(MatchError::InvalidConfig { .. })));

        let config = MatchConfig {
            merge_gap_km: -1.0,
            ..MatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grid_cell_size() {
        let config = MatchConfig::default();
        assert_eq!(config.grid_cell_size_km(0.05), 0.5);
        assert_eq!(config.grid_cell_size_km(0.4), 0.8);
    }

    #[test]
    fn test_elevation_profile_slices_range() {
        let track = Track::from_coordinates("t1", "Morning", &sample_coords());
        let segment = MatchedSegment {
            id: "t1:t2:0".to_string(),
            track_a_id: "t1".to_string(),
            track_b_id: "t2".to_string(),
            track_a_name: "Morning".to_string(),
            track_b_name: "Evening".to_string(),
            points: vec![track.points[1].position(), track.points[2].position()],
            distance_km: 0.1,
            direction_bearing_deg: 0.0,
            direction_label: CompassDirection::N,
            start_index_a: 1,
            end_index_a: 2,
            start_index_b: 2,
            end_index_b: 9,
        };

        let profile = segment.elevation_profile(&track, TrackSide::A);
        assert_eq!(profile.len(), 2);
        assert_eq!(profile[0].1, 375.0);
        assert_eq!(profile[1].1, 381.0);

        // Out of range for this track
        assert!(segment.elevation_profile(&track, TrackSide::B).is_empty());
    }

    #[test]
    fn test_segment_json_uses_camel_case() {
        let segment = MatchedSegment {
            id: "a:b:0".to_string(),
            track_a_id: "a".to_string(),
            track_b_id: "b".to_string(),
            track_a_name: "A".to_string(),
            track_b_name: "B".to_string(),
            points: vec![GpsPoint::new(1.0, 2.0), GpsPoint::new(1.1, 2.0)],
            distance_km: 11.1,
            direction_bearing_deg: 0.0,
            direction_label: CompassDirection::NE,
            start_index_a: 0,
            end_index_a: 5,
            start_index_b: 3,
            end_index_b: 8,
        };
        let json = serde_json::to_string(&segment).unwrap();
        assert!(json.contains("\"trackAId\":\"a\""));
        assert!(json.contains("\"startIndexB\":3"));
        assert!(json.contains("\"directionLabel\":\"NE\""));
        assert!(json.contains("\"lat\":1.0"));
    }
}
