//! Consumers of match results: list filtering and per-region aggregation.
//!
//! Every function takes a `match_for` callback instead of a concrete cache so
//! callers decide whether results come from a precomputed cache or are
//! computed inline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::region::classify::{AreaClass, RegionMatchResult};
use crate::region::district::DistrictDataset;
use crate::region::notification::{Notification, parse_instant};

// ───────────────────────────── Filters ───────────────────────────────────

/// What a list view is filtered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionFilter {
    /// `"<city><district>"` or a bare city name.
    Name(String),
    Nationwide,
    UnknownArea,
    OtherArea,
}

impl RegionFilter {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "nationwide" | "全國" | "全国" => Self::Nationwide,
            "unknown" | "unknown_area" | "未知區域" => Self::UnknownArea,
            "other" | "other_area" | "其他區域" => Self::OtherArea,
            _ => Self::Name(s.to_string()),
        }
    }
}

impl fmt::Display for RegionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Nationwide => write!(f, "{}", AreaClass::Nationwide.label()),
            Self::UnknownArea => write!(f, "{}", AreaClass::UnknownArea.label()),
            Self::OtherArea => write!(f, "{}", AreaClass::OtherArea.label()),
        }
    }
}

/// Notifications whose matched districts intersect the districts named by
/// `region_name`.  An unknown name selects nothing.
pub fn filter_notifications_by_region_name<'a, F>(
    notifications: &'a [Notification],
    region_name: &str,
    districts: &DistrictDataset,
    match_for: F,
) -> Vec<&'a Notification>
where
    F: FnMut(&Notification) -> RegionMatchResult,
{
    filter_notifications(
        notifications,
        &RegionFilter::Name(region_name.to_string()),
        districts,
        match_for,
    )
}

pub fn filter_notifications<'a, F>(
    notifications: &'a [Notification],
    filter: &RegionFilter,
    districts: &DistrictDataset,
    mut match_for: F,
) -> Vec<&'a Notification>
where
    F: FnMut(&Notification) -> RegionMatchResult,
{
    let wanted: BTreeSet<_> = match filter {
        RegionFilter::Name(name) => districts.codes_for_name(name).into_iter().collect(),
        _ => BTreeSet::new(),
    };
    if matches!(filter, RegionFilter::Name(_)) && wanted.is_empty() {
        return Vec::new();
    }

    notifications
        .iter()
        .filter(|n| {
            let result = match_for(n);
            match filter {
                RegionFilter::Name(_) => !result.matched_regions.is_disjoint(&wanted),
                RegionFilter::Nationwide => result.area() == AreaClass::Nationwide,
                RegionFilter::UnknownArea => result.area() == AreaClass::UnknownArea,
                RegionFilter::OtherArea => result.area() == AreaClass::OtherArea,
            }
        })
        .collect()
}

// ──────────────────────────── Time window ────────────────────────────────

/// Inclusive time range; open ends are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Build from `FILTER_SINCE` / `FILTER_UNTIL` (RFC 3339 or epoch).
    /// Unparsable values leave that end open.
    pub fn from_env() -> Self {
        let parse = |key: &str| std::env::var(key).ok().and_then(|v| parse_instant(&v));
        Self {
            since: parse("FILTER_SINCE"),
            until: parse("FILTER_UNTIL"),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    /// Notifications whose timestamp cannot be read are only kept by an
    /// unbounded window.
    pub fn contains(&self, notification: &Notification) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(at) = notification.timestamp.to_datetime() else {
            return false;
        };
        self.since.is_none_or(|s| at >= s) && self.until.is_none_or(|u| at <= u)
    }
}

// ──────────────────────────── Aggregation ────────────────────────────────

/// Counts for the analytics view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    pub total: usize,
    /// `"<city><district>"` → notifications touching it.
    pub by_district: BTreeMap<String, usize>,
    /// City → notifications touching any of its districts (once each).
    pub by_city: BTreeMap<String, usize>,
    pub nationwide: usize,
    pub unknown_area: usize,
    pub other_area: usize,
    /// Matched codes missing from the dataset (nearest-point fallback can
    /// return grid codes the dataset does not list).
    pub unlisted_codes: usize,
}

pub fn aggregate_by_region<F>(
    notifications: &[Notification],
    districts: &DistrictDataset,
    mut match_for: F,
) -> RegionSummary
where
    F: FnMut(&Notification) -> RegionMatchResult,
{
    let mut summary = RegionSummary::default();
    for notification in notifications {
        summary.total += 1;
        let result = match_for(notification);
        match result.area() {
            AreaClass::Nationwide => summary.nationwide += 1,
            AreaClass::UnknownArea => summary.unknown_area += 1,
            AreaClass::OtherArea => summary.other_area += 1,
            AreaClass::Matched => {
                let mut cities = BTreeSet::new();
                for code in &result.matched_regions {
                    let Some(entry) = districts.get(*code) else {
                        summary.unlisted_codes += 1;
                        continue;
                    };
                    *summary.by_district.entry(entry.full_name()).or_default() += 1;
                    cities.insert(entry.city.as_str());
                }
                for city in cities {
                    *summary.by_city.entry(city.to_string()).or_default() += 1;
                }
            }
        }
    }
    summary
}
