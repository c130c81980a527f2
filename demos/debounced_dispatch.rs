//! Debounced background matching, as a UI would drive it.
//!
//! Run with: RUST_LOG=debug cargo run --example debounced_dispatch

use std::sync::Arc;
use std::time::Duration;

use segment_matcher::{Algorithm, MatchDispatcher, MatchEngine, MatchRequest, Track};

fn northbound(id: &str, lng: f64) -> Track {
    let coords: Vec<(f64, f64, f64)> = (0..1000)
        .map(|i| (46.5197 + i as f64 * 0.00005, lng, 400.0))
        .collect();
    Track::from_coordinates(id, id, &coords)
}

fn main() -> segment_matcher::Result<()> {
    env_logger::init();

    let tracks = vec![
        northbound("a", 6.6323),
        northbound("b", 6.6325),
        northbound("c", 6.6328),
    ];

    let mut dispatcher = MatchDispatcher::new(Arc::new(MatchEngine::new()));
    println!("Dispatch mode: {:?}", dispatcher.mode());

    // A user dragging the tolerance slider: only the last value is computed
    for delta in [10.0, 20.0, 30.0, 40.0, 50.0] {
        let generation =
            dispatcher.schedule(MatchRequest::new(&tracks, delta, Algorithm::Standard))?;
        println!("Scheduled generation {} (delta {}m)", generation, delta);
    }

    match dispatcher.wait(Duration::from_secs(10)) {
        Some(segments) => {
            println!("Generation {}: {} segments", dispatcher.generation(), segments.len());
            for seg in &segments {
                println!("   {}: {:.2} km {}", seg.id, seg.distance_km, seg.direction_label);
            }
        }
        None => println!("No result in time"),
    }

    // Toggling matching off drops whatever is in flight
    dispatcher.schedule(MatchRequest::new(&tracks, 50.0, Algorithm::Bidirectional))?;
    dispatcher.set_enabled(false);
    println!(
        "After disabling: {:?}",
        dispatcher.wait(Duration::from_millis(500)).map(|s| s.len())
    );

    // Same request sent over a message transport
    let json = MatchRequest::new(&tracks, 50.0, Algorithm::Adaptive).to_json()?;
    let request = MatchRequest::from_json(&json)?;
    let segments = dispatcher.run_blocking(&request)?;
    println!("Blocking run from {} bytes of JSON: {} segments", json.len(), segments.len());

    Ok(())
}
