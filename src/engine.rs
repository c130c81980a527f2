//! Multi-track matching engine.
//!
//! Owns the configuration and the spatial grid cache, and runs the pair
//! pipeline from [`crate::matcher`] over every unordered pair of visible
//! tracks. Pairs whose bounding boxes are further apart than the matching
//! distance are pruned with an R-tree before any grid is touched.

use std::time::Instant;

use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};

use crate::geo_utils::km_to_degrees;
use crate::grid::GridCache;
use crate::matcher::{match_pair, PairOutcome};
use crate::{Algorithm, Bounds, MatchConfig, MatchedSegment, Result, Track};

/// Counters from one matching run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchStats {
    /// Visible tracks in the input
    pub visible_tracks: usize,
    /// Tracks long enough and with valid coordinates
    pub eligible_tracks: usize,
    /// Pairs that went through the pipeline
    pub pairs_considered: usize,
    /// Pairs skipped because their bounds are out of reach
    pub pairs_pruned: usize,
    pub candidate_matches: usize,
    pub raw_segments: usize,
    pub final_segments: usize,
    pub elapsed_ms: u64,
}

/// Bounding box of one eligible track, indexed by its position in the
/// eligible list.
#[derive(Debug, Clone)]
struct TrackBounds {
    slot: usize,
    bounds: Bounds,
}

impl RTreeObject for TrackBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min_lng, self.bounds.min_lat],
            [self.bounds.max_lng, self.bounds.max_lat],
        )
    }
}

/// Segment matching over a set of tracks.
///
/// ```rust
/// use segment_matcher::{Algorithm, MatchEngine, Track};
///
/// let engine = MatchEngine::new();
/// let only = Track::from_coordinates("a", "Solo", &[(46.5, 6.6, 0.0), (46.51, 6.6, 0.0)]);
/// assert!(engine.match_tracks(&[only], 50.0, Algorithm::Standard).is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MatchEngine {
    config: MatchConfig,
    grids: GridCache,
}

impl MatchEngine {
    /// Engine with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with a custom configuration, validated up front.
    pub fn with_config(config: MatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            grids: GridCache::new(),
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn grid_cache(&self) -> &GridCache {
        &self.grids
    }

    /// Forget the cached grid of a removed or edited track.
    pub fn invalidate_track(&self, track_id: &str) -> bool {
        let removed = self.grids.invalidate(track_id);
        if removed {
            debug!("[Engine] Invalidated grid for '{}'", track_id);
        }
        removed
    }

    pub fn clear_cache(&self) {
        self.grids.clear();
    }

    /// Drop cached grids for tracks no longer in `tracks`.
    pub fn retain_tracks(&self, tracks: &[Track]) -> usize {
        self.grids.retain(tracks.iter().map(|t| t.id.as_str()))
    }

    /// Matched segments across all visible tracks, longest first.
    pub fn match_tracks(
        &self,
        tracks: &[Track],
        delta_meters: f64,
        algorithm: Algorithm,
    ) -> Vec<MatchedSegment> {
        self.match_tracks_with_stats(tracks, delta_meters, algorithm).0
    }

    /// Same as [`MatchEngine::match_tracks`], plus run counters.
    pub fn match_tracks_with_stats(
        &self,
        tracks: &[Track],
        delta_meters: f64,
        algorithm: Algorithm,
    ) -> (Vec<MatchedSegment>, MatchStats) {
        let start = Instant::now();
        let mut stats = MatchStats::default();

        let visible: Vec<&Track> = tracks.iter().filter(|t| t.visible).collect();
        stats.visible_tracks = visible.len();
        if visible.len() < 2 {
            return (Vec::new(), stats);
        }

        if !(delta_meters.is_finite() && delta_meters > 0.0) {
            debug!("[Engine] Ignoring non-positive delta {}", delta_meters);
            return (Vec::new(), stats);
        }
        let delta_km = delta_meters / 1000.0;

        let min_points = self.config.min_segment_points.max(2);
        let eligible: Vec<&Track> = visible
            .into_iter()
            .filter(|t| {
                if t.points.len() < min_points {
                    return false;
                }
                if !t.has_valid_coordinates() {
                    warn!("[Engine] Skipping track '{}': invalid coordinates", t.id);
                    return false;
                }
                true
            })
            .collect();
        stats.eligible_tracks = eligible.len();
        if eligible.len() < 2 {
            return (Vec::new(), stats);
        }

        let pairs = self.candidate_pairs(&eligible, delta_km);
        let total_pairs = eligible.len() * (eligible.len() - 1) / 2;
        stats.pairs_considered = pairs.len();
        stats.pairs_pruned = total_pairs - pairs.len();

        let profile = algorithm.profile();
        let cell_size_km = self.config.grid_cell_size_km(delta_km);
        let run_pair = |&(i, j): &(usize, usize)| -> PairOutcome {
            let (a, b) = (eligible[i], eligible[j]);
            let grid_b = self.grids.get_or_build(b, cell_size_km);
            match_pair(a, b, &grid_b, delta_km, &profile, &self.config)
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<PairOutcome> = {
            use rayon::prelude::*;
            pairs.par_iter().map(run_pair).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<PairOutcome> = pairs.iter().map(run_pair).collect();

        let mut segments = Vec::new();
        for outcome in outcomes {
            stats.candidate_matches += outcome.candidates;
            stats.raw_segments += outcome.raw_segments;
            segments.extend(outcome.segments);
        }

        // Stable: pair order, then start index, breaks distance ties
        segments.sort_by(|a, b| b.distance_km.total_cmp(&a.distance_km));

        stats.final_segments = segments.len();
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "[Engine] {} segments from {} pairs ({} pruned, {} algorithm) in {}ms",
            segments.len(),
            stats.pairs_considered,
            stats.pairs_pruned,
            algorithm,
            stats.elapsed_ms
        );

        (segments, stats)
    }

    /// Unordered pairs `(i, j)`, `i < j`, whose bounds come within
    /// `delta_km` of each other, in ascending order.
    fn candidate_pairs(&self, tracks: &[&Track], delta_km: f64) -> Vec<(usize, usize)> {
        let all_bounds: Vec<TrackBounds> = tracks
            .iter()
            .enumerate()
            .filter_map(|(slot, t)| {
                Bounds::from_points(&t.points).map(|bounds| TrackBounds { slot, bounds })
            })
            .collect();
        let rtree = RTree::bulk_load(all_bounds.clone());

        let mut pairs = Vec::new();
        for entry in &all_bounds {
            let b = &entry.bounds;
            let reach_lat = b.min_lat.abs().max(b.max_lat.abs());
            let margin = km_to_degrees(delta_km, reach_lat);
            let search = AABB::from_corners(
                [b.min_lng - margin, b.min_lat - margin],
                [b.max_lng + margin, b.max_lat + margin],
            );

            for other in rtree.locate_in_envelope_intersecting(&search) {
                if other.slot > entry.slot {
                    pairs.push((entry.slot, other.slot));
                }
            }
        }

        pairs.sort_unstable();
        pairs
    }
}
