//! Per-notification region matching.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::region::cache::PolygonTallyCache;
use crate::region::district::{DistrictCode, DistrictDataset};
use crate::region::geometry::RingRule;
use crate::region::grid::{GridIndex, assign_polygon, nearest_district};
use crate::region::notification::{Notification, parse_code};

/// Default sample budget for one polygon before the Assigner coarsens.
const DEFAULT_MAX_SAMPLES: usize = 2500;

// ───────────────────────────── Options ───────────────────────────────────

/// How equal tallies are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// The district first encountered while scanning wins.
    #[default]
    FirstSeen,
    /// The lowest district code wins, independent of scan order.
    LowestCode,
}

impl TieBreak {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "first_seen" | "first" => Some(Self::FirstSeen),
            "lowest_code" | "lowest" | "code" => Some(Self::LowestCode),
            _ => None,
        }
    }
}

/// Matching knobs shared by the Assigner and the Classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub ring_rule: RingRule,
    pub tie_break: TieBreak,
    /// Sample large bounding boxes at a wider step.
    pub coarsen: bool,
    pub max_samples: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            ring_rule: RingRule::AnyRing,
            tie_break: TieBreak::FirstSeen,
            coarsen: true,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

impl MatchOptions {
    /// Construct from environment variables.
    ///
    /// | Env var                  | Default      | Purpose                                |
    /// |--------------------------|--------------|----------------------------------------|
    /// | `RING_RULE`              | `any`        | `any` or `even_odd`                    |
    /// | `TIE_BREAK`              | `first_seen` | `first_seen` or `lowest_code`          |
    /// | `COARSEN_LARGE_POLYGONS` | `true`       | Widen the step for large polygons      |
    /// | `MAX_POLYGON_SAMPLES`    | `2500`       | Sample budget that triggers coarsening |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ring_rule: std::env::var("RING_RULE")
                .ok()
                .and_then(|v| RingRule::from_name(&v))
                .unwrap_or(defaults.ring_rule),
            tie_break: std::env::var("TIE_BREAK")
                .ok()
                .and_then(|v| TieBreak::from_name(&v))
                .unwrap_or(defaults.tie_break),
            coarsen: std::env::var("COARSEN_LARGE_POLYGONS")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.coarsen),
            max_samples: std::env::var("MAX_POLYGON_SAMPLES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_samples),
        }
    }
}

impl fmt::Display for MatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MatchOptions(rings={:?}, tie={:?}, coarsen={}, max_samples={})",
            self.ring_rule, self.tie_break, self.coarsen, self.max_samples,
        )
    }
}

// ───────────────────────────── Result ────────────────────────────────────

/// Which of the four mutually exclusive outcomes a result describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AreaClass {
    Matched,
    Nationwide,
    UnknownArea,
    OtherArea,
}

impl AreaClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Nationwide => "nationwide",
            Self::UnknownArea => "unknown area",
            Self::OtherArea => "other area",
        }
    }
}

/// Derived classification of one notification.  The flags are only ever set
/// when `matched_regions` is empty, and at most one of them is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionMatchResult {
    pub matched_regions: BTreeSet<DistrictCode>,
    pub is_nationwide: bool,
    pub is_unknown_area: bool,
    pub is_other_area: bool,
}

impl RegionMatchResult {
    pub fn area(&self) -> AreaClass {
        if !self.matched_regions.is_empty() {
            AreaClass::Matched
        } else if self.is_nationwide {
            AreaClass::Nationwide
        } else if self.is_unknown_area {
            AreaClass::UnknownArea
        } else {
            AreaClass::OtherArea
        }
    }
}

// ───────────────────────────── Classifier ────────────────────────────────

/// Classify without a tally cache.
pub fn classify(
    notification: &Notification,
    districts: &DistrictDataset,
    grid: &GridIndex,
    options: &MatchOptions,
) -> RegionMatchResult {
    classify_with(notification, districts, grid, options, None)
}

/// Classify, reading and filling `tallies` for the polygon step when given.
///
/// 1. Integer codes present in `districts` are matched directly.
/// 2. Each polygon contributes its best-tallied district, or the nearest
///    indexed district when it covers no lattice point.  Unrecognized
///    shapes contribute nothing.
/// 3. With nothing matched: nationwide when there is neither a code nor a
///    polygon, or every code is non-numeric; unknown area when polygons were
///    present; other area otherwise.
pub fn classify_with(
    notification: &Notification,
    districts: &DistrictDataset,
    grid: &GridIndex,
    options: &MatchOptions,
    tallies: Option<&PolygonTallyCache>,
) -> RegionMatchResult {
    let mut matched = BTreeSet::new();

    let mut numeric_codes = 0usize;
    for raw in &notification.codes {
        let Some(code) = parse_code(raw) else {
            continue;
        };
        numeric_codes += 1;
        if districts.contains_code(code) {
            matched.insert(code);
        }
    }

    for geometry in &notification.polygons {
        let Some(rings) = geometry.to_rings() else {
            debug!(
                "Notification {}: skipping unrecognized geometry",
                notification.key()
            );
            continue;
        };

        let tally = match tallies {
            Some(cache) => cache.get_or_assign(&rings, grid, options),
            None => assign_polygon(&rings, grid, options),
        };

        if let Some(best) = tally.best(options.tie_break) {
            matched.insert(best);
        } else if let Some(nearest) = nearest_district(&rings, grid) {
            debug!(
                "Notification {}: polygon covers no grid point, nearest district {nearest}",
                notification.key()
            );
            matched.insert(nearest);
        }
    }

    let mut result = RegionMatchResult {
        matched_regions: matched,
        ..Default::default()
    };
    if result.matched_regions.is_empty() {
        let has_codes = !notification.codes.is_empty();
        let has_polygons = !notification.polygons.is_empty();
        if (!has_codes && !has_polygons) || (has_codes && numeric_codes == 0) {
            result.is_nationwide = true;
        } else if has_polygons {
            result.is_unknown_area = true;
        } else {
            result.is_other_area = true;
        }
    }
    result
}
