use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::shared::{load_batch, write_jsonl};
use crate::region::{
    AreaClass, DistrictDataset, MatchOptions, Notification, RegionMatchResult, TimeWindow,
    aggregate_by_region,
};
use crate::service::RegionService;
use crate::source::{ApiSource, SourceCfg};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchRecord<'a> {
    timestamp: String,
    title: &'a str,
    critical: bool,
    area: &'static str,
    region_names: Vec<String>,
    result: RegionMatchResult,
}

fn region_names(result: &RegionMatchResult, districts: &DistrictDataset) -> Vec<String> {
    result
        .matched_regions
        .iter()
        .map(|code| {
            districts
                .get(*code)
                .map(|e| e.full_name())
                .unwrap_or_else(|| code.to_string())
        })
        .collect()
}

fn record<'a>(
    notification: &'a Notification,
    result: RegionMatchResult,
    districts: &DistrictDataset,
) -> MatchRecord<'a> {
    MatchRecord {
        timestamp: notification.key(),
        title: &notification.title,
        critical: notification.critical,
        area: result.area().label(),
        region_names: region_names(&result, districts),
        result,
    }
}

pub(super) async fn run() -> Result<()> {
    let cfg = SourceCfg::from_env()?;
    let options = MatchOptions::from_env();
    let window = TimeWindow::from_env();
    let output_path = std::env::var("OUTPUT_PATH").ok();
    info!("Match options: {options}");

    let service = RegionService::new(ApiSource::new(cfg), options);
    let (reference, batch) = load_batch(&service, &window).await?;
    let precompute = service.precompute(Arc::clone(&reference));

    let mut records = Vec::with_capacity(batch.len());
    for notification in batch.iter() {
        let result = service.match_for(&reference, notification);
        let row = record(notification, result, &reference.districts);
        match row.result.area() {
            AreaClass::Matched => info!(
                "[{}] {} -> {}",
                row.timestamp,
                row.title,
                row.region_names.join(", ")
            ),
            area => info!("[{}] {} -> {}", row.timestamp, row.title, area.label()),
        }
        records.push(row);
    }

    let summary = aggregate_by_region(&batch, &reference.districts, |n| {
        service.match_for(&reference, n)
    });
    info!(
        "Summary: {} notifications, {} nationwide, {} unknown area, {} other area, {} unlisted codes",
        summary.total,
        summary.nationwide,
        summary.unknown_area,
        summary.other_area,
        summary.unlisted_codes
    );
    for (city, count) in &summary.by_city {
        info!("  {city}: {count}");
    }
    for (district, count) in &summary.by_district {
        info!("    {district}: {count}");
    }

    if let Some(path) = output_path {
        write_jsonl(&path, &records)?;
        info!("Wrote {} match records to {path}", records.len());
    }

    let stored = precompute.await.context("precompute task failed")?;
    info!(
        "Done: {stored} results precomputed, {} cached, {} polygon tallies",
        service.cached_results(),
        reference.tallies().len()
    );
    Ok(())
}
