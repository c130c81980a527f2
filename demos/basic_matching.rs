//! Basic example of finding shared segments between GPS tracks.
//!
//! Run with: cargo run --example basic_matching

use segment_matcher::{Algorithm, MatchEngine, Track, TrackSide};

/// A point every ~5.5 m heading north from `(lat, lng)`.
fn northbound(n: usize, lat: f64, lng: f64) -> Vec<(f64, f64, f64)> {
    (0..n)
        .map(|i| (lat + i as f64 * 0.00005, lng, 380.0 + i as f64 * 0.1))
        .collect()
}

fn main() {
    env_logger::init();

    // Two runs up the same street (Lausanne), ~15 m apart
    let monday = northbound(400, 46.5197, 6.6323);
    let thursday = northbound(400, 46.5197, 6.6325);

    // The same street ridden downhill
    let mut descent = thursday.clone();
    descent.reverse();

    // Somewhere else entirely (Geneva)
    let elsewhere = northbound(400, 46.2044, 6.1432);

    let tracks = vec![
        Track::from_coordinates("monday", "Monday run", &monday),
        Track::from_coordinates("thursday", "Thursday run", &thursday),
        Track::from_coordinates("descent", "Saturday descent", &descent),
        Track::from_coordinates("geneva", "Geneva loop", &elsewhere),
    ];

    let engine = MatchEngine::new();

    println!("Segment Matching Examples\n");
    println!(
        "Config: min_points={}, min_distance={}km, merge_gap={}km\n",
        engine.config().min_segment_points,
        engine.config().min_segment_distance_km,
        engine.config().merge_gap_km
    );

    for algorithm in [Algorithm::Standard, Algorithm::Adaptive, Algorithm::Bidirectional] {
        let (segments, stats) = engine.match_tracks_with_stats(&tracks, 50.0, algorithm);
        println!(
            "{} ({} pairs, {} pruned, {}ms):",
            algorithm, stats.pairs_considered, stats.pairs_pruned, stats.elapsed_ms
        );
        if segments.is_empty() {
            println!("   No shared segments\n");
            continue;
        }
        for seg in &segments {
            println!(
                "   {} <-> {}: {:.2} km heading {} ({:.0}°), {} display points",
                seg.track_a_name,
                seg.track_b_name,
                seg.distance_km,
                seg.direction_label,
                seg.direction_bearing_deg,
                seg.points.len()
            );
        }
        println!();
    }

    // Elevation comparison for the longest segment
    let segments = engine.match_tracks(&tracks, 50.0, Algorithm::Standard);
    if let Some(seg) = segments.first() {
        let a = tracks.iter().find(|t| t.id == seg.track_a_id);
        let b = tracks.iter().find(|t| t.id == seg.track_b_id);
        if let (Some(a), Some(b)) = (a, b) {
            let profile_a = seg.elevation_profile(a, TrackSide::A);
            let profile_b = seg.elevation_profile(b, TrackSide::B);
            println!(
                "Elevation over the longest segment: {} samples on {}, {} on {}",
                profile_a.len(),
                a.name,
                profile_b.len(),
                b.name
            );
        }
    }
}
