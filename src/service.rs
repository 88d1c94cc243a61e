//! Session context: reference data, the current notification batch, and the
//! match cache, constructed once and handed to every consumer.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use futures_util::future::try_join;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::region::{
    DistrictDataset, GridIndex, MatchCache, MatchOptions, Notification, PolygonTallyCache,
    RegionMatchResult, classify_with,
};
use crate::source::ReferenceSource;

// ───────────────────────────── ReferenceData ─────────────────────────────

/// District dataset and grid index, immutable once loaded, plus the polygon
/// tally cache that is only valid for this exact grid and option set.
pub struct ReferenceData {
    pub districts: DistrictDataset,
    pub grid: GridIndex,
    pub options: MatchOptions,
    tallies: PolygonTallyCache,
}

impl ReferenceData {
    pub fn new(districts: DistrictDataset, grid: GridIndex, options: MatchOptions) -> Self {
        Self {
            districts,
            grid,
            options,
            tallies: PolygonTallyCache::new(),
        }
    }

    /// Classify through the tally cache.
    pub fn classify(&self, notification: &Notification) -> RegionMatchResult {
        classify_with(
            notification,
            &self.districts,
            &self.grid,
            &self.options,
            Some(&self.tallies),
        )
    }

    pub fn tallies(&self) -> &PolygonTallyCache {
        &self.tallies
    }
}

// ───────────────────────────── RegionService ─────────────────────────────

pub struct RegionService<S> {
    source: S,
    options: MatchOptions,
    /// Single-flight: concurrent callers await the same load.  A failed load
    /// leaves the cell empty so the next call retries.
    reference: OnceCell<Arc<ReferenceData>>,
    notifications: Mutex<Arc<[Notification]>>,
    matches: Arc<MatchCache>,
}

impl<S: ReferenceSource> RegionService<S> {
    pub fn new(source: S, options: MatchOptions) -> Self {
        Self {
            source,
            options,
            reference: OnceCell::new(),
            notifications: Mutex::new(Arc::from(Vec::new())),
            matches: Arc::new(MatchCache::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Load the district dataset and grid index (both concurrently) on first
    /// use; later calls return the same instance.
    pub async fn reference(&self) -> Result<Arc<ReferenceData>> {
        let reference = self
            .reference
            .get_or_try_init(|| async {
                let (districts, grid) =
                    try_join(self.source.load_districts(), self.source.load_grid()).await?;
                info!(
                    "Reference data ready: {} districts, {} grid points",
                    districts.len(),
                    grid.len()
                );
                Ok::<_, anyhow::Error>(Arc::new(ReferenceData::new(
                    districts,
                    grid,
                    self.options,
                )))
            })
            .await?;
        Ok(Arc::clone(reference))
    }

    /// The current batch.
    pub fn notifications(&self) -> Arc<[Notification]> {
        Arc::clone(&self.notifications.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a freshly fetched batch and drop every derived result.
    pub fn replace_notifications(&self, batch: Vec<Notification>) -> Arc<[Notification]> {
        let batch: Arc<[Notification]> = Arc::from(batch);
        *self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&batch);
        self.clear_cache();
        batch
    }

    /// Drop every cached match and polygon tally.
    pub fn clear_cache(&self) {
        let generation = self.matches.clear();
        if let Some(reference) = self.reference.get() {
            reference.tallies().clear();
        }
        debug!("Match cache cleared (generation {generation})");
    }

    pub fn cached_results(&self) -> usize {
        self.matches.len()
    }

    /// Classify the current batch on the blocking pool.  Resolves to the
    /// number of results stored; stops early if the batch is replaced
    /// meanwhile.
    pub fn precompute(&self, reference: Arc<ReferenceData>) -> JoinHandle<usize> {
        let batch = self.notifications();
        let matches = Arc::clone(&self.matches);
        let generation = matches.generation();

        tokio::task::spawn_blocking(move || {
            let mut stored = 0usize;
            for notification in batch.iter() {
                let key = notification.key();
                if matches.get(&key).is_some() {
                    continue;
                }
                let result = reference.classify(notification);
                if !matches.insert(generation, key, result) {
                    debug!("Precompute: batch replaced, stopping after {stored} results");
                    return stored;
                }
                stored += 1;
            }
            info!("Precompute: {stored} of {} notifications classified", batch.len());
            stored
        })
    }

    /// Cached result, or computed inline (and cached) when the precompute
    /// pass has not reached this notification yet.
    pub fn match_for(
        &self,
        reference: &ReferenceData,
        notification: &Notification,
    ) -> RegionMatchResult {
        let key = notification.key();
        if let Some(hit) = self.matches.get(&key) {
            return hit;
        }
        let generation = self.matches.generation();
        let result = reference.classify(notification);
        self.matches.insert(generation, key, result.clone());
        result
    }
}
