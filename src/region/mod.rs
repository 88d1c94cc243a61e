//! Geo-region matching for push notifications.
//!
//! A notification names the area it concerns either through explicit
//! district codes or through polygons.  This module turns that payload into
//! the set of districts it affects, backed by a precomputed lattice grid
//! (see [`grid`]) and two in-memory caches (see [`cache`]).
pub mod analytics;
pub mod cache;
pub mod classify;
pub mod district;
pub mod geometry;
pub mod grid;
pub mod notification;

pub use analytics::{
    RegionFilter, TimeWindow, aggregate_by_region, filter_notifications,
    filter_notifications_by_region_name,
};
pub use cache::{MatchCache, PolygonTallyCache};
pub use classify::{AreaClass, MatchOptions, RegionMatchResult, classify, classify_with};
pub use district::DistrictDataset;
pub use grid::{BuildBounds, GridIndex, build_grid_index};
pub use notification::Notification;
