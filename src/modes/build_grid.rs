use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::shared::{env_f64, must_env, write_json};
use crate::region::classify::TieBreak;
use crate::region::{BuildBounds, MatchOptions, build_grid_index};
use crate::source::{
    ApiSource, ReferenceSource, SourceCfg, boundaries_for_dataset, parse_boundaries,
    read_json_file,
};

/// Bounds of the lattice to rasterize.
///
/// | Env var        | Default |
/// |----------------|---------|
/// | `GRID_MIN_LON` | `118.0` |
/// | `GRID_MAX_LON` | `122.5` |
/// | `GRID_MIN_LAT` | `21.5`  |
/// | `GRID_MAX_LAT` | `26.5`  |
fn bounds_from_env() -> Result<BuildBounds> {
    let bounds = BuildBounds {
        min_lon: env_f64("GRID_MIN_LON", 118.0),
        max_lon: env_f64("GRID_MAX_LON", 122.5),
        min_lat: env_f64("GRID_MIN_LAT", 21.5),
        max_lat: env_f64("GRID_MAX_LAT", 26.5),
    };
    if bounds.min_lon > bounds.max_lon || bounds.min_lat > bounds.max_lat {
        return Err(anyhow!("grid bounds are inverted: {bounds:?}"));
    }
    Ok(bounds)
}

pub(super) async fn run() -> Result<()> {
    let cfg = SourceCfg::from_env()?;
    let boundary_path = must_env("BOUNDARY_GEOJSON_PATH")?;
    let code_property =
        std::env::var("BOUNDARY_CODE_PROPERTY").unwrap_or_else(|_| "code".into());
    let output_path =
        std::env::var("OUTPUT_PATH").unwrap_or_else(|_| "./grid_matrix.json".into());
    let bounds = bounds_from_env()?;
    let options = MatchOptions::from_env();
    let step = cfg.grid_step;

    let source = ApiSource::new(cfg);
    let districts = source.load_districts().await?;
    let geojson = read_json_file(&boundary_path).await?;
    let features = parse_boundaries(&geojson, &code_property)?;
    info!(
        "Read {} boundary features from {boundary_path}",
        features.len()
    );

    let boundaries = boundaries_for_dataset(
        &districts,
        features,
        options.tie_break == TieBreak::LowestCode,
    );
    if boundaries.is_empty() {
        return Err(anyhow!(
            "no boundary in {boundary_path} matches a district code (property '{code_property}')"
        ));
    }

    let rule = options.ring_rule;
    let grid = tokio::task::spawn_blocking(move || {
        build_grid_index(&boundaries, &bounds, step, rule)
    })
    .await
    .context("grid build task failed")?;

    write_json(&output_path, &grid.to_value())?;
    info!("Grid matrix with {} points written to {output_path}", grid.len());
    Ok(())
}
