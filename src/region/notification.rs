//! Notification records as returned by the history endpoint.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::region::district::DistrictCode;
use crate::region::geometry::Ring;

/// Epoch values above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

// ───────────────────────────── Timestamps ────────────────────────────────

/// Notification timestamp.  Unique per record and used as the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationTime {
    Epoch(i64),
    /// Epoch written as a JSON float, e.g. `1.7e12`.
    FloatEpoch(f64),
    Text(String),
}

impl NotificationTime {
    /// Stable string form used as the cache key.
    pub fn key(&self) -> String {
        match self {
            Self::Epoch(v) => v.to_string(),
            Self::FloatEpoch(v) => match integral(*v) {
                Some(i) => i.to_string(),
                None => v.to_string(),
            },
            Self::Text(s) => s.clone(),
        }
    }

    /// Interpret as a UTC instant.  Text is tried as RFC 3339 first, then as
    /// an epoch number.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Epoch(v) => epoch_to_datetime(*v),
            Self::FloatEpoch(v) => float_epoch_to_datetime(*v),
            Self::Text(s) => parse_instant(s),
        }
    }
}

/// Parse an RFC 3339 string or an epoch number (seconds or milliseconds).
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    s.parse::<i64>().ok().and_then(epoch_to_datetime)
}

fn integral(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64).then_some(v as i64)
}

fn float_epoch_to_datetime(v: f64) -> Option<DateTime<Utc>> {
    if !v.is_finite() {
        return None;
    }
    let millis = if v.abs() >= EPOCH_MILLIS_THRESHOLD as f64 { v } else { v * 1000.0 };
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn epoch_to_datetime(v: i64) -> Option<DateTime<Utc>> {
    if v.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(v).single()
    } else {
        Utc.timestamp_opt(v, 0).single()
    }
}

// ───────────────────────────── Geometry ──────────────────────────────────

/// Coordinates of a polygon: rings of positions, each position `[lon, lat, ..]`.
pub type RawRings = Vec<Vec<Vec<f64>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingGeometry {
    pub coordinates: RawRings,
}

/// The shapes a notification polygon arrives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationGeometry {
    /// Bare ring array.
    Rings(RawRings),
    /// GeoJSON-style Feature wrapping a polygon.
    Feature { geometry: RingGeometry },
    /// GeoJSON-style Polygon geometry without the Feature wrapper.
    Geometry(RingGeometry),
    /// Anything else.  Kept so the record still parses; contributes no match.
    Unrecognized(Value),
}

impl NotificationGeometry {
    /// Canonical ring list.  `None` for unrecognized shapes.  Positions with
    /// fewer than two coordinates are dropped.
    pub fn to_rings(&self) -> Option<Vec<Ring>> {
        let raw = match self {
            Self::Rings(raw) => raw,
            Self::Feature { geometry } | Self::Geometry(geometry) => &geometry.coordinates,
            Self::Unrecognized(_) => return None,
        };
        Some(
            raw.iter()
                .map(|ring| {
                    ring.iter()
                        .filter_map(|pos| match pos.as_slice() {
                            [lon, lat, ..] => Some([*lon, *lat]),
                            _ => None,
                        })
                        .collect()
                })
                .collect(),
        )
    }
}

// ──────────────────────────── Notification ───────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub timestamp: NotificationTime,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub critical: bool,
    /// Explicit region references.  Numbers or strings; anything that is not
    /// an integer is an invalid code.
    #[serde(default, deserialize_with = "null_as_default")]
    pub codes: Vec<Value>,
    #[serde(
        default,
        rename = "Polygons",
        deserialize_with = "null_as_default"
    )]
    pub polygons: Vec<NotificationGeometry>,
}

impl Notification {
    pub fn key(&self) -> String {
        self.timestamp.key()
    }
}

/// Interpret one `codes` entry as a district code.
pub fn parse_code(raw: &Value) -> Option<DistrictCode> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
