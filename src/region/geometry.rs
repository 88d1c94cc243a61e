//! Planar polygon helpers shared by the grid builder and the matcher.
//!
//! Coordinates are `[lon, lat]` pairs in degrees and every computation is a
//! flat-earth approximation, which is good enough at the scale of a single
//! country's district grid.

/// `[lon, lat]`.
pub type Point = [f64; 2];

/// A closed (or implicitly closed) list of vertices.
pub type Ring = Vec<Point>;

// ───────────────────────────── Ring rules ────────────────────────────────

/// How a multi-ring polygon decides containment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingRule {
    /// Every ring is an independent candidate shape: inside any ring means
    /// inside the polygon.  Holes therefore count as inside.
    #[default]
    AnyRing,
    /// All rings share a single even-odd crossing count, so a hole ring
    /// cancels the outer ring it sits in.
    EvenOdd,
}

impl RingRule {
    /// Parse from a config value.  Case-insensitive.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "any" | "any_ring" | "anyring" => Some(Self::AnyRing),
            "even_odd" | "evenodd" | "holes" => Some(Self::EvenOdd),
            _ => None,
        }
    }
}

// ───────────────────────────── Bounding box ──────────────────────────────

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    /// Bounding box of every vertex in `rings`, or `None` when there are no
    /// vertices at all.
    pub fn of_rings(rings: &[Ring]) -> Option<Self> {
        let mut points = rings.iter().flatten();
        let mut bbox = Self::of_point(*points.next()?);
        for p in points {
            bbox.extend(*p);
        }
        Some(bbox)
    }

    /// Inclusive on every edge.
    pub fn contains(&self, p: Point) -> bool {
        p[0] >= self.min_lon && p[0] <= self.max_lon && p[1] >= self.min_lat && p[1] <= self.max_lat
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Grow to include `p`.
    pub fn extend(&mut self, p: Point) {
        self.min_lon = self.min_lon.min(p[0]);
        self.min_lat = self.min_lat.min(p[1]);
        self.max_lon = self.max_lon.max(p[0]);
        self.max_lat = self.max_lat.max(p[1]);
    }

    /// Overlap of two boxes, `None` when they are disjoint.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self {
            min_lon: self.min_lon.max(other.min_lon),
            min_lat: self.min_lat.max(other.min_lat),
            max_lon: self.max_lon.min(other.max_lon),
            max_lat: self.max_lat.min(other.max_lat),
        })
    }

    pub fn of_point(p: Point) -> Self {
        Self {
            min_lon: p[0],
            min_lat: p[1],
            max_lon: p[0],
            max_lat: p[1],
        }
    }
}

// ─────────────────────────── Point in polygon ────────────────────────────

/// Toggle `inside` once for every edge of `ring` crossed by the horizontal
/// ray cast from `point` towards +x.
///
/// Boundary points are not special-cased: whatever the strict comparisons
/// produce is the answer.
fn toggle_crossings(point: Point, ring: &[Point], mut inside: bool) -> bool {
    let [x, y] = point;
    let n = ring.len();
    if n == 0 {
        return inside;
    }
    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Even-odd test of `point` against a single ring.
pub fn ring_contains(point: Point, ring: &[Point]) -> bool {
    toggle_crossings(point, ring, false)
}

/// Test `point` against a polygon given as a list of rings.
pub fn polygon_contains(point: Point, rings: &[Ring], rule: RingRule) -> bool {
    match rule {
        RingRule::AnyRing => rings.iter().any(|ring| ring_contains(point, ring)),
        RingRule::EvenOdd => rings
            .iter()
            .fold(false, |inside, ring| toggle_crossings(point, ring, inside)),
    }
}

// ─────────────────────────── Derived values ──────────────────────────────

/// Unweighted mean of every vertex across every ring.
///
/// This is not the area centroid: concave shapes and shapes with holes can
/// land it outside the polygon.  `None` when there are no vertices.
pub fn vertex_centroid(rings: &[Ring]) -> Option<Point> {
    let mut count = 0usize;
    let mut sum = [0.0, 0.0];
    for p in rings.iter().flatten() {
        sum[0] += p[0];
        sum[1] += p[1];
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some([sum[0] / n, sum[1] / n])
}

/// Cache key built from the bounding box and vertex centroid, rounded to
/// four decimals.  Distinct shapes sharing both collide.
pub fn fingerprint(rings: &[Ring]) -> Option<String> {
    let bbox = BBox::of_rings(rings)?;
    let [cx, cy] = vertex_centroid(rings)?;
    Some(format!(
        "{:.4},{:.4},{:.4},{:.4}|{cx:.4},{cy:.4}",
        bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat
    ))
}
