//! Uniform lat/lng grid for nearest-point lookups, plus a per-track cache.
//!
//! Points are bucketed by `(floor(lng / cell), floor(lat / cell))` with the
//! cell size converted from km at 111 km per degree. A query scans every
//! cell within `ceil(radius / cell)` rows of the query cell, widened in
//! longitude by `1 / cos(lat)`, and keeps the closest point by haversine
//! distance. The result always equals an exhaustive scan.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use crate::geo_utils::haversine_km;
use crate::{GpsPoint, Track, TrackPoint};

/// Approximate kilometers per degree used for cell sizing.
const KM_PER_DEGREE: f64 = 111.0;

/// Grid coordinate: (lng cell, lat cell)
type CellCoord = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct GridEntry {
    point: GpsPoint,
    index: usize,
}

/// Result of a nearest-neighbour query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoint {
    /// Index into the track the grid was built from
    pub index: usize,
    pub point: GpsPoint,
    pub distance_km: f64,
}

/// Sparse uniform grid over one track's points.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size_km: f64,
    cell_size_deg: f64,
    cells: HashMap<CellCoord, Vec<GridEntry>>,
    point_count: usize,
}

impl SpatialGrid {
    /// Bucket every point of a track.
    pub fn new(points: &[TrackPoint], cell_size_km: f64) -> Self {
        debug_assert!(cell_size_km > 0.0, "cell size must be positive");
        let cell_size_km = if cell_size_km.is_finite() && cell_size_km > 0.0 {
            cell_size_km
        } else {
            1e-6
        };
        let cell_size_deg = cell_size_km / KM_PER_DEGREE;

        let mut cells: HashMap<CellCoord, Vec<GridEntry>> = HashMap::new();
        for (index, p) in points.iter().enumerate() {
            let coord = cell_coord(p.latitude, p.longitude, cell_size_deg);
            cells.entry(coord).or_default().push(GridEntry {
                point: p.position(),
                index,
            });
        }

        Self {
            cell_size_km,
            cell_size_deg,
            cells,
            point_count: points.len(),
        }
    }

    /// Closest indexed point within `max_distance_km` of `(lat, lng)`.
    ///
    /// Ties on distance go to the lower index. Returns `None` if nothing is
    /// in range.
    pub fn find_nearest_within_distance(
        &self,
        lat: f64,
        lng: f64,
        max_distance_km: f64,
    ) -> Option<NearestPoint> {
        if self.cells.is_empty() || !(max_distance_km.is_finite() && max_distance_km >= 0.0) {
            return None;
        }

        let lat_radius = (max_distance_km / KM_PER_DEGREE / self.cell_size_deg).ceil() as i64;
        // Longitude degrees shrink with cos(lat); take the most poleward
        // latitude the radius can reach.
        let reach_lat = (lat.abs() + max_distance_km / KM_PER_DEGREE).min(90.0);
        let lng_scale = reach_lat.to_radians().cos().max(0.01);
        let lng_radius =
            (max_distance_km / (KM_PER_DEGREE * lng_scale) / self.cell_size_deg).ceil() as i64;
        let (qx, qy) = cell_coord(lat, lng, self.cell_size_deg);

        let mut best: Option<NearestPoint> = None;
        let mut consider = |entries: &[GridEntry]| {
            for entry in entries {
                let d = haversine_km(lat, lng, entry.point.latitude, entry.point.longitude);
                if d > max_distance_km {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(b) => d < b.distance_km || (d == b.distance_km && entry.index < b.index),
                };
                if better {
                    best = Some(NearestPoint {
                        index: entry.index,
                        point: entry.point,
                        distance_km: d,
                    });
                }
            }
        };

        // Large radii: walking occupied cells is cheaper than the window
        let window = (2 * lng_radius + 1).saturating_mul(2 * lat_radius + 1);
        if window as usize > self.cells.len() {
            for (&(cx, cy), entries) in &self.cells {
                if (cx - qx).abs() <= lng_radius && (cy - qy).abs() <= lat_radius {
                    consider(entries);
                }
            }
        } else {
            for dx in -lng_radius..=lng_radius {
                for dy in -lat_radius..=lat_radius {
                    if let Some(entries) = self.cells.get(&(qx + dx, qy + dy)) {
                        consider(entries);
                    }
                }
            }
        }

        best
    }

    /// Number of points the grid was built from.
    pub fn len(&self) -> usize {
        self.point_count
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    /// Number of occupied cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_size_km(&self) -> f64 {
        self.cell_size_km
    }
}

#[inline]
fn cell_coord(lat: f64, lng: f64, cell_size_deg: f64) -> CellCoord {
    (
        (lng / cell_size_deg).floor() as i64,
        (lat / cell_size_deg).floor() as i64,
    )
}

// =============================================================================
// Per-track cache
// =============================================================================

#[derive(Debug)]
struct CachedGrid {
    point_count: usize,
    cell_size_km: f64,
    grid: Arc<SpatialGrid>,
}

/// Grids keyed by track id, rebuilt when the track's point count (or the
/// requested cell size) changes.
///
/// Safe to share between threads: lookups clone an `Arc` snapshot under a
/// read lock, rebuilds happen outside the lock and swap the entry in.
#[derive(Debug, Default)]
pub struct GridCache {
    entries: RwLock<HashMap<String, CachedGrid>>,
}

impl GridCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached grid for `track`, building it if missing or stale.
    pub fn get_or_build(&self, track: &Track, cell_size_km: f64) -> Arc<SpatialGrid> {
        if let Some(entry) = self.read().get(&track.id) {
            if entry.point_count == track.points.len() && entry.cell_size_km == cell_size_km {
                return Arc::clone(&entry.grid);
            }
        }

        let grid = Arc::new(SpatialGrid::new(&track.points, cell_size_km));
        debug!(
            "[Grid] Built grid for '{}': {} points in {} cells ({:.3} km)",
            track.id,
            track.points.len(),
            grid.cell_count(),
            cell_size_km
        );

        self.write().insert(
            track.id.clone(),
            CachedGrid {
                point_count: track.points.len(),
                cell_size_km,
                grid: Arc::clone(&grid),
            },
        );
        grid
    }

    /// Drop the grid for one track. Returns true if one was cached.
    pub fn invalidate(&self, track_id: &str) -> bool {
        self.write().remove(track_id).is_some()
    }

    /// Drop every cached grid.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Keep only grids for the given track ids. Returns how many were dropped.
    pub fn retain<'a, I>(&self, track_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: std::collections::HashSet<&str> = track_ids.into_iter().collect();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|id, _| keep.contains(id.as_str()));
        before - entries.len()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.read().contains_key(track_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a half-written entry
    // (inserts and removes are single calls), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CachedGrid>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedGrid>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
