use anyhow::Result;
use tracing::info;

use super::shared::{load_batch, must_env};
use crate::region::{
    MatchOptions, Notification, RegionFilter, TimeWindow, filter_notifications,
    filter_notifications_by_region_name,
};
use crate::service::RegionService;
use crate::source::{ApiSource, SourceCfg};

pub(super) async fn run() -> Result<()> {
    let filter = RegionFilter::parse(&must_env("REGION_FILTER")?);
    let cfg = SourceCfg::from_env()?;
    let window = TimeWindow::from_env();

    let service = RegionService::new(ApiSource::new(cfg), MatchOptions::from_env());
    let (reference, batch) = load_batch(&service, &window).await?;
    let match_for = |n: &Notification| service.match_for(&reference, n);

    let selected = match &filter {
        RegionFilter::Name(name) => {
            if reference.districts.codes_for_name(name).is_empty() {
                info!(
                    "'{name}' names no district; known cities: {}",
                    reference.districts.cities().join(", ")
                );
            }
            filter_notifications_by_region_name(&batch, name, &reference.districts, match_for)
        }
        _ => filter_notifications(&batch, &filter, &reference.districts, match_for),
    };

    for notification in &selected {
        let marker = if notification.critical { "!" } else { " " };
        println!("{marker} [{}] {}", notification.key(), notification.title);
    }
    info!(
        "Filter '{filter}': {} of {} notifications",
        selected.len(),
        batch.len()
    );
    Ok(())
}
