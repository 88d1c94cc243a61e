//! Uniform lat/lon grid that maps lattice points to the district they fall in.
//!
//! The index is built offline ([`build_grid_index`]) by rasterizing district
//! boundaries, then used at match time to turn a notification polygon into
//! district hit counts ([`assign_polygon`]) or, when the polygon is too small
//! to cover any lattice point, into the nearest indexed district
//! ([`nearest_district`]).

use std::collections::HashMap;
use std::ops::RangeInclusive;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::region::classify::{MatchOptions, TieBreak};
use crate::region::district::DistrictCode;
use crate::region::geometry::{BBox, Point, Ring, RingRule, polygon_contains, vertex_centroid};

/// Lattice step in degrees (≈5 km).
pub const DEFAULT_GRID_STEP: f64 = 0.05;

/// Slack for float error when snapping a bound onto the lattice.
const LATTICE_EPS: f64 = 1e-9;

// ───────────────────────────── Lattice math ──────────────────────────────

/// Lattice indices `i` with `min <= i * step <= max`.
pub fn lattice_range(min: f64, max: f64, step: f64) -> RangeInclusive<i64> {
    let lo = (min / step - LATTICE_EPS).ceil() as i64;
    let hi = (max / step + LATTICE_EPS).floor() as i64;
    lo..=hi
}

fn range_len(range: &RangeInclusive<i64>) -> u64 {
    range
        .end()
        .saturating_sub(*range.start())
        .saturating_add(1)
        .max(0) as u64
}

pub fn lattice_coord(idx: i64, step: f64) -> f64 {
    idx as f64 * step
}

/// `"lon,lat"`, each with three decimals.
pub fn grid_key(lon: f64, lat: f64) -> String {
    format!("{lon:.3},{lat:.3}")
}

pub fn parse_grid_key(key: &str) -> Option<Point> {
    let (lon, lat) = key.split_once(',')?;
    Some([lon.trim().parse().ok()?, lat.trim().parse().ok()?])
}

/// Whether the point's key survives snapping to the nearest lattice point.
fn on_lattice(lon: f64, lat: f64, step: f64) -> bool {
    let snap = |v: f64| lattice_coord((v / step).round() as i64, step);
    grid_key(snap(lon), snap(lat)) == grid_key(lon, lat)
}

// ───────────────────────────── Grid index ────────────────────────────────

/// One indexed lattice point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub lon: f64,
    pub lat: f64,
    pub code: DistrictCode,
}

/// Sparse `grid key → district code` table.  Points outside every district
/// are absent.
#[derive(Debug, Clone)]
pub struct GridIndex {
    step: f64,
    cells: HashMap<String, DistrictCode>,
    /// Insertion order, for the linear nearest-point scan.
    points: Vec<GridPoint>,
    /// Bounding box of every indexed point.
    extent: Option<BBox>,
}

impl GridIndex {
    pub fn new(step: f64) -> Self {
        Self {
            step,
            cells: HashMap::new(),
            points: Vec::new(),
            extent: None,
        }
    }

    /// Record `code` for the point.  The first claim wins; later claims for
    /// the same key are ignored and reported as `false`.
    pub fn insert(&mut self, lon: f64, lat: f64, code: DistrictCode) -> bool {
        let key = grid_key(lon, lat);
        if self.cells.contains_key(&key) {
            return false;
        }
        self.cells.insert(key, code);
        self.points.push(GridPoint { lon, lat, code });
        match &mut self.extent {
            Some(extent) => extent.extend([lon, lat]),
            None => self.extent = Some(BBox::of_point([lon, lat])),
        }
        true
    }

    /// Parse the flat `{ "lon,lat": code }` JSON document.
    ///
    /// Entries with an unparsable key or a non-integer code are skipped.
    pub fn from_value(step: f64, value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(anyhow!("grid matrix must be a JSON object"));
        };

        let mut index = Self::new(step);
        let mut skipped = 0usize;
        for (key, code) in map {
            let (Some([lon, lat]), Some(code)) = (parse_grid_key(&key), code.as_i64()) else {
                skipped += 1;
                continue;
            };
            index.insert(lon, lat, code);
        }
        if skipped > 0 {
            warn!("Grid matrix: skipped {skipped} malformed entries");
        }
        let off = index.off_lattice_points();
        if off > 0 {
            warn!(
                "Grid matrix: {off} of {} points are off the {step} lattice; check GRID_STEP",
                index.len()
            );
        }
        Ok(index)
    }

    /// Flat JSON object in insertion order.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .points
            .iter()
            .map(|p| (grid_key(p.lon, p.lat), Value::from(p.code)))
            .collect();
        Value::Object(map)
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, lon: f64, lat: f64) -> Option<DistrictCode> {
        self.cells.get(&grid_key(lon, lat)).copied()
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    /// Indexed points that no lookup at this step can reach.  Non-zero when
    /// the grid was built with a different step.
    pub fn off_lattice_points(&self) -> usize {
        self.points
            .iter()
            .filter(|p| !on_lattice(p.lon, p.lat, self.step))
            .count()
    }

    /// Territory covered by the index, `None` when empty.
    pub fn extent(&self) -> Option<BBox> {
        self.extent
    }
}

// ───────────────────────────── Builder ───────────────────────────────────

/// Territory covered by a build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Boundary of one district.  A district may own several disjoint polygons
/// (islands), each a ring list.
#[derive(Debug, Clone)]
pub struct DistrictBoundary {
    pub code: DistrictCode,
    parts: Vec<(BBox, Vec<Ring>)>,
}

impl DistrictBoundary {
    /// Polygons without any vertex are dropped.
    pub fn new(code: DistrictCode, polygons: Vec<Vec<Ring>>) -> Self {
        let parts = polygons
            .into_iter()
            .filter_map(|rings| Some((BBox::of_rings(&rings)?, rings)))
            .collect();
        Self { code, parts }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn contains(&self, point: Point, rule: RingRule) -> bool {
        self.parts
            .iter()
            .any(|(bbox, rings)| bbox.contains(point) && polygon_contains(point, rings, rule))
    }
}

/// Rasterize `boundaries` onto the lattice covering `bounds`.
///
/// Boundaries are tried in slice order and the first one containing a point
/// claims it, so the caller's ordering is the tie-break for overlaps.
/// Cost is points × districts × vertices; run it offline.
pub fn build_grid_index(
    boundaries: &[DistrictBoundary],
    bounds: &BuildBounds,
    step: f64,
    rule: RingRule,
) -> GridIndex {
    let lon_range = lattice_range(bounds.min_lon, bounds.max_lon, step);
    let lat_range = lattice_range(bounds.min_lat, bounds.max_lat, step);
    info!(
        "Building grid: {} x {} points, {} districts, step {step}",
        range_len(&lon_range),
        range_len(&lat_range),
        boundaries.len()
    );

    let mut index = GridIndex::new(step);
    for lon_idx in lon_range {
        let lon = lattice_coord(lon_idx, step);
        for lat_idx in lat_range.clone() {
            let lat = lattice_coord(lat_idx, step);
            if let Some(boundary) = boundaries.iter().find(|b| b.contains([lon, lat], rule)) {
                index.insert(lon, lat, boundary.code);
            }
        }
    }

    info!("Grid built: {} indexed points", index.len());
    index
}

// ───────────────────────────── Assigner ──────────────────────────────────

/// District hit counts for one polygon, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistrictTally {
    counts: Vec<(DistrictCode, u32)>,
}

impl DistrictTally {
    pub fn add(&mut self, code: DistrictCode) {
        match self.counts.iter_mut().find(|(c, _)| *c == code) {
            Some((_, n)) => *n += 1,
            None => self.counts.push((code, 1)),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[cfg(test)]
    pub fn count(&self, code: DistrictCode) -> u32 {
        self.counts
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(0, |(_, n)| *n)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (DistrictCode, u32)> + '_ {
        self.counts.iter().copied()
    }

    /// District with the highest count.
    pub fn best(&self, tie_break: TieBreak) -> Option<DistrictCode> {
        let mut best: Option<(DistrictCode, u32)> = None;
        for &(code, n) in &self.counts {
            let better = match best {
                None => true,
                Some((b_code, b_n)) => {
                    n > b_n || (n == b_n && tie_break == TieBreak::LowestCode && code < b_code)
                }
            };
            if better {
                best = Some((code, n));
            }
        }
        best.map(|(code, _)| code)
    }
}

/// How many lattice steps to advance per sample so that at most
/// `max_samples` points are visited.
fn sample_stride(points: u64, options: &MatchOptions) -> usize {
    if !options.coarsen || options.max_samples == 0 || points <= options.max_samples as u64 {
        return 1;
    }
    (points as f64 / options.max_samples as f64).sqrt().ceil() as usize
}

/// Count, per district, the indexed lattice points inside `rings`.
///
/// Only points within both the polygon's bounding box and the indexed
/// territory are visited.  Large boxes are sampled at an integer multiple of
/// the grid step, so every sample is still a lattice point.
pub fn assign_polygon(rings: &[Ring], grid: &GridIndex, options: &MatchOptions) -> DistrictTally {
    let mut tally = DistrictTally::default();
    let Some(bbox) = BBox::of_rings(rings) else {
        return tally;
    };
    let Some(bbox) = grid.extent().and_then(|extent| bbox.intersection(&extent)) else {
        return tally;
    };

    let step = grid.step();
    let lon_range = lattice_range(bbox.min_lon, bbox.max_lon, step);
    let lat_range = lattice_range(bbox.min_lat, bbox.max_lat, step);
    let points = range_len(&lon_range).saturating_mul(range_len(&lat_range));
    let stride = sample_stride(points, options);
    if stride > 1 {
        debug!("Assigner: coarsening large polygon by {stride}x");
    }

    for lon_idx in lon_range.step_by(stride) {
        let lon = lattice_coord(lon_idx, step);
        for lat_idx in lat_range.clone().step_by(stride) {
            let lat = lattice_coord(lat_idx, step);
            let Some(code) = grid.get(lon, lat) else {
                continue;
            };
            if polygon_contains([lon, lat], rings, options.ring_rule) {
                tally.add(code);
            }
        }
    }
    tally
}

// ───────────────────────────── Fallback ──────────────────────────────────

/// District of the indexed point closest to the polygon's vertex centroid.
///
/// `None` when the polygon has no vertices, the index is empty, or the
/// polygon's bounding box lies entirely outside the indexed territory.
/// Equal distances keep the earlier point.
pub fn nearest_district(rings: &[Ring], grid: &GridIndex) -> Option<DistrictCode> {
    let extent = grid.extent()?;
    let bbox = BBox::of_rings(rings)?;
    if !bbox.intersects(&extent) {
        debug!("Fallback: polygon lies outside the indexed territory");
        return None;
    }

    let [cx, cy] = vertex_centroid(rings)?;
    let mut best: Option<(f64, DistrictCode)> = None;
    for p in grid.points() {
        let d = ((p.lon - cx).powi(2) + (p.lat - cy).powi(2)).sqrt();
        if best.is_none_or(|(best_d, _)| d < best_d) {
            best = Some((d, p.code));
        }
    }
    best.map(|(_, code)| code)
}
