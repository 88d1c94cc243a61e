use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::region::{Notification, TimeWindow};
use crate::service::{ReferenceData, RegionService};
use crate::source::ApiSource;

pub(super) fn must_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("Missing env var {key}"))
}

/// Parse a float env var; an unset or unreadable value yields `default`.
pub(super) fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Fetch the history and the reference data together, keep the records
/// inside `window`, and install them as the service's current batch.
pub(super) async fn load_batch(
    service: &RegionService<ApiSource>,
    window: &TimeWindow,
) -> Result<(Arc<ReferenceData>, Arc<[Notification]>)> {
    let (notifications, reference) = futures_util::future::try_join(
        service.source().fetch_notifications(),
        service.reference(),
    )
    .await?;

    let fetched = notifications.len();
    let kept: Vec<Notification> = notifications
        .into_iter()
        .filter(|n| window.contains(n))
        .collect();
    if kept.len() < fetched {
        info!(
            "Time window kept {} of {fetched} notifications",
            kept.len()
        );
    }
    Ok((reference, service.replace_notifications(kept)))
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create parent directory for {path}"))?;
        }
    }
    Ok(())
}

/// One JSON document per line.
pub(super) fn write_jsonl<T: Serialize>(path: &str, rows: &[T]) -> Result<()> {
    ensure_parent_dir(path)?;
    let file = File::create(path).with_context(|| format!("failed to create {path}"))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let line = serde_json::to_string(row)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// A single pretty-printed JSON document.
pub(super) fn write_json<T: Serialize>(path: &str, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let file = File::create(path).with_context(|| format!("failed to create {path}"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
