mod build_grid;
mod history;
mod region_filter;
mod shared;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    History,
    Filter,
    BuildGrid,
}

impl RunMode {
    fn from_env() -> Self {
        let raw = std::env::var("RUN_MODE").unwrap_or_else(|_| "history".into());
        match raw.trim().to_lowercase().as_str() {
            "filter" => Self::Filter,
            "build_grid" | "build" => Self::BuildGrid,
            _ => Self::History,
        }
    }
}

pub async fn run_from_env() -> Result<()> {
    match RunMode::from_env() {
        RunMode::History => history::run().await,
        RunMode::Filter => region_filter::run().await,
        RunMode::BuildGrid => build_grid::run().await,
    }
}
