//! Access to the three external JSON documents: notification history,
//! district dataset and grid matrix.
//!
//! Dataset locations may be `http(s)://` URLs or local file paths, so a grid
//! written by the `build_grid` mode can be used without hosting it.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::region::district::{DistrictCode, DistrictDataset};
use crate::region::geometry::Ring;
use crate::region::grid::{DEFAULT_GRID_STEP, DistrictBoundary, GridIndex};
use crate::region::notification::Notification;

/// Where reference data comes from.  Each method is called at most once per
/// [`RegionService`](crate::service::RegionService).
pub trait ReferenceSource {
    fn load_districts(&self) -> impl Future<Output = Result<DistrictDataset>> + Send;
    fn load_grid(&self) -> impl Future<Output = Result<GridIndex>> + Send;
}

// ───────────────────────────── Config ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SourceCfg {
    pub history_url: Option<String>,
    /// `limit` query value: a number or `all`.
    pub history_limit: String,
    pub region_dataset_url: String,
    pub grid_matrix_url: Option<String>,
    pub grid_step: f64,
    pub timeout: Duration,
}

impl SourceCfg {
    /// Build from environment variables.
    ///
    /// | Env var                | Default    | Description                         |
    /// |------------------------|------------|-------------------------------------|
    /// | `NOTIFY_HISTORY_URL`   | (unset)    | Notification history endpoint       |
    /// | `NOTIFY_HISTORY_LIMIT` | `all`      | `limit` query parameter             |
    /// | `REGION_DATASET_URL`   | (required) | District dataset URL or path        |
    /// | `GRID_MATRIX_URL`      | (unset)    | Grid matrix URL or path             |
    /// | `GRID_STEP`            | `0.05`     | Grid step in degrees                |
    /// | `HTTP_TIMEOUT_MS`      | `15000`    | Per-request timeout                 |
    pub fn from_env() -> Result<Self> {
        let region_dataset_url = std::env::var("REGION_DATASET_URL")
            .map_err(|_| anyhow!("Missing env var REGION_DATASET_URL"))?;
        let history_limit = std::env::var("NOTIFY_HISTORY_LIMIT")
            .ok()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| v == "all" || v.parse::<u64>().is_ok_and(|n| n > 0))
            .unwrap_or_else(|| "all".into());
        let grid_step = std::env::var("GRID_STEP")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(DEFAULT_GRID_STEP);
        let timeout_ms: u64 = std::env::var("HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15_000);

        Ok(Self {
            history_url: std::env::var("NOTIFY_HISTORY_URL").ok(),
            history_limit,
            region_dataset_url,
            grid_matrix_url: std::env::var("GRID_MATRIX_URL").ok(),
            grid_step,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

// ───────────────────────────── ApiSource ─────────────────────────────────

#[derive(Deserialize)]
struct HistoryEnvelope {
    success: bool,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    records: Vec<Value>,
}

/// HTTP / filesystem implementation of every external interface.
pub struct ApiSource {
    client: Client,
    cfg: SourceCfg,
}

impl ApiSource {
    pub fn new(cfg: SourceCfg) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    /// `GET <history>?limit=<n|all>`.  A `success: false` envelope is an
    /// error; individual records that do not parse are skipped.
    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>> {
        let url = self
            .cfg
            .history_url
            .as_deref()
            .ok_or_else(|| anyhow!("Missing env var NOTIFY_HISTORY_URL"))?;

        let envelope: HistoryEnvelope = self
            .client
            .get(url)
            .query(&[("limit", self.cfg.history_limit.as_str())])
            .timeout(self.cfg.timeout)
            .send()
            .await
            .with_context(|| format!("notification history request to {url} failed"))?
            .error_for_status()
            .context("notification history returned an error status")?
            .json()
            .await
            .context("notification history response is not valid JSON")?;

        if !envelope.success {
            return Err(anyhow!("notification history reported success=false"));
        }

        let mut notifications = Vec::with_capacity(envelope.records.len());
        for (idx, raw) in envelope.records.into_iter().enumerate() {
            match serde_json::from_value::<Notification>(raw) {
                Ok(n) => notifications.push(n),
                Err(e) => warn!("Skipping malformed notification record #{idx}: {e}"),
            }
        }
        info!(
            "Fetched {} notifications (server count={:?})",
            notifications.len(),
            envelope.count
        );
        Ok(notifications)
    }

    /// Fetch a JSON document from a URL or read it from a path.
    async fn fetch_json(&self, location: &str) -> Result<Value> {
        if location.starts_with("http://") || location.starts_with("https://") {
            debug!("GET {location}");
            return self
                .client
                .get(location)
                .timeout(self.cfg.timeout)
                .send()
                .await
                .with_context(|| format!("request to {location} failed"))?
                .error_for_status()
                .with_context(|| format!("{location} returned an error status"))?
                .json()
                .await
                .with_context(|| format!("{location} is not valid JSON"));
        }
        read_json_file(location).await
    }
}

impl ReferenceSource for ApiSource {
    async fn load_districts(&self) -> Result<DistrictDataset> {
        let value = self.fetch_json(&self.cfg.region_dataset_url).await?;
        let dataset = DistrictDataset::from_value(value)?;
        info!("Loaded {} districts", dataset.len());
        Ok(dataset)
    }

    async fn load_grid(&self) -> Result<GridIndex> {
        let url = self
            .cfg
            .grid_matrix_url
            .as_deref()
            .ok_or_else(|| anyhow!("Missing env var GRID_MATRIX_URL"))?;
        let value = self.fetch_json(url).await?;
        let grid = GridIndex::from_value(self.cfg.grid_step, value)?;
        info!("Loaded grid index with {} points", grid.len());
        Ok(grid)
    }
}

pub async fn read_json_file(path: &str) -> Result<Value> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    serde_json::from_slice(&bytes).with_context(|| format!("{path} is not valid JSON"))
}

// ───────────────────────────── Boundaries ────────────────────────────────

/// Polygons of one boundary feature, keyed by the feature's code property.
#[derive(Debug, Clone)]
pub struct BoundaryFeature {
    pub code: DistrictCode,
    pub polygons: Vec<Vec<Ring>>,
}

/// Parse a GeoJSON FeatureCollection of town boundaries.
///
/// `Polygon` and `MultiPolygon` geometries are read; features without a
/// usable integer `code_property` or with another geometry type are skipped.
pub fn parse_boundaries(value: &Value, code_property: &str) -> Result<Vec<BoundaryFeature>> {
    let features = value["features"]
        .as_array()
        .ok_or_else(|| anyhow!("boundary GeoJSON has no features array"))?;

    let mut out = Vec::with_capacity(features.len());
    let mut skipped = 0usize;
    for feature in features {
        let code = match &feature["properties"][code_property] {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        let geometry = &feature["geometry"];
        let polygons = match geometry["type"].as_str() {
            Some("Polygon") => extract_polygon(&geometry["coordinates"]).map(|p| vec![p]),
            Some("MultiPolygon") => geometry["coordinates"]
                .as_array()
                .map(|polys| polys.iter().filter_map(extract_polygon).collect()),
            _ => None,
        };
        match (code, polygons) {
            (Some(code), Some(polygons)) if !polygons.is_empty() => {
                out.push(BoundaryFeature { code, polygons });
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Boundary GeoJSON: skipped {skipped} features without code or polygon");
    }
    Ok(out)
}

fn extract_polygon(coords: &Value) -> Option<Vec<Ring>> {
    let rings: Vec<Ring> = coords
        .as_array()?
        .iter()
        .filter_map(|ring| {
            let ring: Ring = ring
                .as_array()?
                .iter()
                .filter_map(|p| {
                    let a = p.as_array()?;
                    Some([a.first()?.as_f64()?, a.get(1)?.as_f64()?])
                })
                .collect();
            if ring.is_empty() { None } else { Some(ring) }
        })
        .collect();
    if rings.is_empty() { None } else { Some(rings) }
}

/// Pair boundary features with dataset districts, in dataset order (or by
/// ascending code when `by_code` is set).
///
/// Features sharing a code are merged; features for codes absent from the
/// dataset and districts without any feature are reported and left out.
pub fn boundaries_for_dataset(
    districts: &DistrictDataset,
    features: Vec<BoundaryFeature>,
    by_code: bool,
) -> Vec<DistrictBoundary> {
    let mut polygons: HashMap<DistrictCode, Vec<Vec<Ring>>> = HashMap::new();
    for feature in features {
        if !districts.contains_code(feature.code) {
            debug!("Boundary {} has no matching district; ignored", feature.code);
            continue;
        }
        polygons.entry(feature.code).or_default().extend(feature.polygons);
    }

    let mut out = Vec::with_capacity(polygons.len());
    for entry in districts.iter() {
        let code = entry.district.code;
        match polygons.remove(&code) {
            Some(p) => {
                let boundary = DistrictBoundary::new(code, p);
                if boundary.is_empty() {
                    warn!("Boundary for {} ({code}) has no vertices", entry.full_name());
                } else {
                    out.push(boundary);
                }
            }
            None => warn!("No boundary for {} ({code})", entry.full_name()),
        }
    }
    if by_code {
        out.sort_by_key(|b| b.code);
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn collection() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "code": "106" },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[121.6, 24.95], [121.8, 24.95], [121.8, 25.1], [121.6, 24.95]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": { "code": 100 },
                    "geometry": {
                        "type": "MultiPolygon",
                        "coordinates": [
                            [[[121.4, 24.95], [121.6, 24.95], [121.6, 25.1], [121.4, 24.95]]],
                            [[[121.3, 25.2], [121.35, 25.2], [121.35, 25.25], [121.3, 25.2]]]
                        ]
                    }
                },
                { "type": "Feature", "properties": { "code": 5 }, "geometry": { "type": "Point", "coordinates": [1, 2] } },
                { "type": "Feature", "properties": {}, "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1]]] } },
                {
                    "type": "Feature",
                    "properties": { "code": 4242 },
                    "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1]]] }
                }
            ]
        })
    }

    fn districts() -> DistrictDataset {
        DistrictDataset::from_value(json!({
            "台北市": {
                "中正區": { "code": 100, "lat": 25.04, "lon": 121.52 },
                "大安區": { "code": 106, "lat": 25.03, "lon": 121.7 },
                "萬華區": { "code": 108, "lat": 25.03, "lon": 121.49 }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_polygon_and_multipolygon_features() {
        let features = parse_boundaries(&collection(), "code").unwrap();
        let codes: Vec<_> = features.iter().map(|f| f.code).collect();
        assert_eq!(codes, [106, 100, 4242]);
        assert_eq!(features[1].polygons.len(), 2);
    }

    #[test]
    fn rejects_documents_without_features() {
        assert!(parse_boundaries(&json!({ "type": "Feature" }), "code").is_err());
    }

    #[test]
    fn boundaries_follow_dataset_order() {
        let features = parse_boundaries(&collection(), "code").unwrap();
        let ordered = boundaries_for_dataset(&districts(), features, false);
        let codes: Vec<_> = ordered.iter().map(|b| b.code).collect();
        assert_eq!(codes, [100, 106]);
    }

    #[test]
    fn boundaries_can_be_pinned_by_code() {
        let mut features = parse_boundaries(&collection(), "code").unwrap();
        features.reverse();
        let reordered = DistrictDataset::from_value(json!({
            "台北市": {
                "大安區": { "code": 106, "lat": 25.03, "lon": 121.7 },
                "中正區": { "code": 100, "lat": 25.04, "lon": 121.52 }
            }
        }))
        .unwrap();
        let ordered = boundaries_for_dataset(&reordered, features, true);
        let codes: Vec<_> = ordered.iter().map(|b| b.code).collect();
        assert_eq!(codes, [100, 106]);
    }
}
