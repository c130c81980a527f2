//! # Pair Matcher
//!
//! The shared pipeline that turns one ordered pair of tracks into matched
//! segments. Every algorithm runs the same stages; an [`AlgorithmProfile`]
//! switches the sample-rate strategy, the bearing filter and the
//! progression check.
//!
//! ## Stages
//! 1. Pick a stride over track A ([`sample_rate`])
//! 2. Query B's grid for each sampled A point, filtering by local bearing
//!    ([`collect_matches`])
//! 3. Cut the match stream into raw segments where indices jump or
//!    progression reverses ([`group_matches`])
//! 4. Join raw segments separated by a short gap ([`merge_sequential`])
//! 5. Fold overlapping or nearby segments together ([`merge_overlapping`])
//! 6. Expand each group to the full A range and build the display path
//!    ([`materialize_segment`])

use log::debug;

use crate::geo_utils::{
    bearings_similar, compass_direction, distance_km, point_bearing, polyline_length_km,
};
use crate::grid::SpatialGrid;
use crate::simplify::smooth_then_simplify;
use crate::{
    AlgorithmProfile, GpsPoint, MatchConfig, MatchedSegment, SampleRateStrategy, Track, TrackPoint,
};

/// A sampled point of track A paired with its nearest neighbour on track B.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingPoint {
    pub point_a: GpsPoint,
    pub point_b: GpsPoint,
    pub index_a: usize,
    pub index_b: usize,
}

/// Result of matching one pair, with the counters the engine aggregates.
#[derive(Debug, Clone, Default)]
pub struct PairOutcome {
    pub segments: Vec<MatchedSegment>,
    /// Matches accepted after the bearing filter
    pub candidates: usize,
    /// Segments that survived grouping, before any merge
    pub raw_segments: usize,
}

/// Stride over a track of `len` points.
pub fn sample_rate(len: usize, profile: &AlgorithmProfile, config: &MatchConfig) -> usize {
    match profile.sample_rate {
        SampleRateStrategy::Fixed => config.point_sample_rate.max(1),
        SampleRateStrategy::Adaptive => {
            let target = config.adaptive_target_points.max(1);
            len.div_ceil(target)
                .clamp(config.adaptive_min_rate.max(1), config.adaptive_max_rate.max(1))
        }
    }
}

/// Bearing of the short step ending at `index`, looking back `step` points.
///
/// At the start of a track there is no step behind, so the step ahead is
/// used instead. `None` for a single-point track.
fn local_bearing(points: &[TrackPoint], index: usize, step: usize) -> Option<f64> {
    let mut from = index.saturating_sub(step);
    let mut to = index;
    if from == to {
        from = index;
        to = (index + step).min(points.len().saturating_sub(1));
    }
    if from == to {
        return None;
    }
    Some(point_bearing(&points[from].position(), &points[to].position()))
}

/// Sample track A and pair each sampled point with its nearest B point.
pub fn collect_matches(
    track_a: &Track,
    track_b: &Track,
    grid_b: &SpatialGrid,
    delta_km: f64,
    rate: usize,
    profile: &AlgorithmProfile,
    config: &MatchConfig,
) -> Vec<MatchingPoint> {
    let rate = rate.max(1);
    let mut matches = Vec::with_capacity(track_a.points.len() / rate + 1);

    for index_a in (0..track_a.points.len()).step_by(rate) {
        let point_a = track_a.points[index_a].position();
        let Some(nearest) =
            grid_b.find_nearest_within_distance(point_a.latitude, point_a.longitude, delta_km)
        else {
            continue;
        };

        if profile.direction_filter {
            let bearing_a = local_bearing(&track_a.points, index_a, rate);
            let bearing_b = local_bearing(&track_b.points, nearest.index, rate);
            if let (Some(a), Some(b)) = (bearing_a, bearing_b) {
                if !bearings_similar(a, b, config.point_bearing_tolerance_deg) {
                    continue;
                }
            }
        }

        matches.push(MatchingPoint {
            point_a,
            point_b: nearest.point,
            index_a,
            index_b: nearest.index,
        });
    }

    matches
}

/// Cut an ordered match stream into raw segments.
///
/// A match continues the current segment when both index jumps are within
/// `max_index_gap` and, with the progression check on, track B does not run
/// backwards. Segments shorter than `min_segment_points` are dropped.
pub fn group_matches(
    matches: &[MatchingPoint],
    profile: &AlgorithmProfile,
    config: &MatchConfig,
) -> Vec<Vec<MatchingPoint>> {
    let mut segments = Vec::new();
    let mut current: Vec<MatchingPoint> = Vec::new();

    for m in matches {
        let continues = match current.last() {
            Some(last) => {
                let gap_a = m.index_a.abs_diff(last.index_a);
                let gap_b = m.index_b.abs_diff(last.index_b);
                let same_progression = !profile.progression_check
                    || (m.index_a >= last.index_a) == (m.index_b >= last.index_b);
                gap_a <= config.max_index_gap && gap_b <= config.max_index_gap && same_progression
            }
            None => true,
        };

        if !continues {
            let finished = std::mem::take(&mut current);
            if finished.len() >= config.min_segment_points {
                segments.push(finished);
            }
        }
        current.push(*m);
    }

    if current.len() >= config.min_segment_points {
        segments.push(current);
    }

    segments
}

/// Concatenate consecutive segments whose gap on track A is within
/// `merge_gap_km`.
pub fn merge_sequential(
    segments: Vec<Vec<MatchingPoint>>,
    config: &MatchConfig,
) -> Vec<Vec<MatchingPoint>> {
    let mut merged: Vec<Vec<MatchingPoint>> = Vec::with_capacity(segments.len());

    for segment in segments {
        if let Some(previous) = merged.last_mut() {
            if let (Some(end), Some(start)) = (previous.last(), segment.first()) {
                if distance_km(&end.point_a, &start.point_a) <= config.merge_gap_km {
                    previous.extend(segment);
                    continue;
                }
            }
        }
        merged.push(segment);
    }

    merged
}

fn index_span(segment: &[MatchingPoint]) -> Option<(usize, usize)> {
    let min = segment.iter().map(|m| m.index_a).min()?;
    let max = segment.iter().map(|m| m.index_a).max()?;
    Some((min, max))
}

/// Endpoint-to-endpoint bearing on track A.
fn segment_bearing(segment: &[MatchingPoint]) -> Option<f64> {
    let first = segment.first()?;
    let last = segment.last()?;
    Some(point_bearing(&first.point_a, &last.point_a))
}

fn should_merge(
    acc: &[MatchingPoint],
    next: &[MatchingPoint],
    profile: &AlgorithmProfile,
    config: &MatchConfig,
) -> bool {
    let (Some((start1, end1)), Some((start2, end2))) = (index_span(acc), index_span(next)) else {
        return false;
    };

    if profile.direction_filter {
        if let (Some(b1), Some(b2)) = (segment_bearing(acc), segment_bearing(next)) {
            if !bearings_similar(b1, b2, config.segment_bearing_tolerance_deg) {
                return false;
            }
        }
    }

    // Index overlap on A relative to the shorter span
    let overlap_start = start1.max(start2);
    let overlap_end = end1.min(end2);
    if overlap_end >= overlap_start {
        let overlap = (overlap_end - overlap_start) as f64;
        let shorter = (end1 - start1).min(end2 - start2) as f64;
        if shorter == 0.0 || overlap / shorter >= config.overlap_threshold {
            return true;
        }
    }

    // Endpoint proximity
    let endpoints = |s: &[MatchingPoint]| -> Vec<GpsPoint> {
        s.first()
            .into_iter()
            .chain(s.last())
            .map(|m| m.point_a)
            .collect()
    };
    let proximity = 2.0 * config.merge_gap_km;
    let ends1 = endpoints(acc);
    let ends2 = endpoints(next);
    ends1
        .iter()
        .any(|p| ends2.iter().any(|q| distance_km(p, q) <= proximity))
}

/// Union two match sets, one match per A index, ordered by A index.
fn union_by_index_a(mut acc: Vec<MatchingPoint>, next: Vec<MatchingPoint>) -> Vec<MatchingPoint> {
    acc.extend(next);
    acc.sort_by_key(|m| m.index_a);
    acc.dedup_by_key(|m| m.index_a);
    acc
}

/// Fold segments that overlap on track A or end near each other.
///
/// Segments are visited in order of their first A index and merged into a
/// running accumulator. Direction is compared endpoint to endpoint only.
pub fn merge_overlapping(
    mut segments: Vec<Vec<MatchingPoint>>,
    profile: &AlgorithmProfile,
    config: &MatchConfig,
) -> Vec<Vec<MatchingPoint>> {
    segments.retain(|s| !s.is_empty());
    segments.sort_by_key(|s| index_span(s).map(|(start, _)| start).unwrap_or(0));

    let mut merged = Vec::with_capacity(segments.len());
    let mut iter = segments.into_iter();
    let Some(mut acc) = iter.next() else {
        return merged;
    };

    for next in iter {
        if should_merge(&acc, &next, profile, config) {
            acc = union_by_index_a(acc, next);
        } else {
            merged.push(std::mem::replace(&mut acc, next));
        }
    }
    merged.push(acc);

    merged
}

/// Build the output segment for one merged group.
///
/// The path covers every point of track A between the group's first and
/// last A index, smoothed and simplified. Returns `None` if the segment is
/// shorter than `min_segment_distance_km` or has no drawable path.
pub fn materialize_segment(
    id: String,
    track_a: &Track,
    track_b: &Track,
    group: &[MatchingPoint],
    config: &MatchConfig,
) -> Option<MatchedSegment> {
    let (start_a, end_a) = index_span(group)?;
    let start_b = group.iter().map(|m| m.index_b).min()?;
    let end_b = group.iter().map(|m| m.index_b).max()?;

    let mut raw: Vec<GpsPoint> = track_a
        .points
        .get(start_a..=end_a)
        .map(|slice| slice.iter().map(TrackPoint::position).collect())
        .unwrap_or_default();
    if raw.len() < 2 {
        raw = group.iter().map(|m| m.point_a).collect();
    }
    if raw.len() < 2 {
        return None;
    }

    let distance_km = polyline_length_km(&raw);
    if distance_km < config.min_segment_distance_km {
        return None;
    }

    let points = smooth_then_simplify(&raw, config.smoothing_window, config.simplify_tolerance_deg);
    let (first, last) = (points.first()?, points.last()?);
    let bearing = point_bearing(first, last);

    Some(MatchedSegment {
        id,
        track_a_id: track_a.id.clone(),
        track_b_id: track_b.id.clone(),
        track_a_name: track_a.name.clone(),
        track_b_name: track_b.name.clone(),
        points,
        distance_km,
        direction_bearing_deg: bearing,
        direction_label: compass_direction(bearing),
        start_index_a: start_a,
        end_index_a: end_a,
        start_index_b: start_b,
        end_index_b: end_b,
    })
}

/// Run the full pipeline for one pair, A sampled against B's grid.
pub fn match_pair(
    track_a: &Track,
    track_b: &Track,
    grid_b: &SpatialGrid,
    delta_km: f64,
    profile: &AlgorithmProfile,
    config: &MatchConfig,
) -> PairOutcome {
    let rate = sample_rate(track_a.points.len(), profile, config);
    let matches = collect_matches(track_a, track_b, grid_b, delta_km, rate, profile, config);
    if matches.len() < config.min_segment_points {
        return PairOutcome {
            candidates: matches.len(),
            ..PairOutcome::default()
        };
    }

    let raw = group_matches(&matches, profile, config);
    let raw_segments = raw.len();
    let sequential = merge_sequential(raw, config);
    let merged = merge_overlapping(sequential, profile, config);

    let mut segments = Vec::with_capacity(merged.len());
    for group in &merged {
        let id = format!("{}:{}:{}", track_a.id, track_b.id, segments.len());
        if let Some(segment) = materialize_segment(id, track_a, track_b, group, config) {
            segments.push(segment);
        }
    }

    debug!(
        "[Matcher] {} vs {}: rate {}, {} candidates, {} raw, {} merged, {} final",
        track_a.id,
        track_b.id,
        rate,
        matches.len(),
        raw_segments,
        merged.len(),
        segments.len()
    );

    PairOutcome {
        segments,
        candidates: matches.len(),
        raw_segments,
    }
}
