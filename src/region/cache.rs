//! In-memory memoization for match results and polygon tallies.
//!
//! Neither cache is persisted.  Both are safe to share across threads; a
//! duplicate computation racing with another only overwrites an entry with
//! an identical value.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::region::classify::{MatchOptions, RegionMatchResult};
use crate::region::geometry::{Ring, fingerprint};
use crate::region::grid::{DistrictTally, GridIndex, assign_polygon};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ───────────────────────────── Match cache ───────────────────────────────

#[derive(Default)]
struct MatchCacheInner {
    generation: u64,
    results: HashMap<String, RegionMatchResult>,
}

/// Per-notification results keyed by timestamp.
///
/// Every [`clear`](Self::clear) starts a new generation.  Writers tag their
/// inserts with the generation they started in, so a pass over a replaced
/// batch cannot repopulate the cache.
#[derive(Default)]
pub struct MatchCache {
    inner: Mutex<MatchCacheInner>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    pub fn get(&self, key: &str) -> Option<RegionMatchResult> {
        lock(&self.inner).results.get(key).cloned()
    }

    /// Store `result` if `generation` is still current.  Returns whether it
    /// was stored.
    pub fn insert(&self, generation: u64, key: String, result: RegionMatchResult) -> bool {
        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            return false;
        }
        inner.results.insert(key, result);
        true
    }

    /// Drop every entry and return the new generation.
    pub fn clear(&self) -> u64 {
        let mut inner = lock(&self.inner);
        inner.results.clear();
        inner.generation += 1;
        inner.generation
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).results.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ──────────────────────────── Tally cache ────────────────────────────────

/// Polygon tallies keyed by [`fingerprint`].
///
/// Shapes that share a bounding box and vertex centroid share an entry.
#[derive(Default)]
pub struct PolygonTallyCache {
    tallies: Mutex<HashMap<String, DistrictTally>>,
}

impl PolygonTallyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached tally for `rings`, computing and storing it on a miss.  Shapes
    /// without vertices are never cached.
    pub fn get_or_assign(
        &self,
        rings: &[Ring],
        grid: &GridIndex,
        options: &MatchOptions,
    ) -> DistrictTally {
        let Some(key) = fingerprint(rings) else {
            return DistrictTally::default();
        };
        if let Some(hit) = lock(&self.tallies).get(&key) {
            return hit.clone();
        }
        // Computed outside the lock; a concurrent miss computes the same value.
        let tally = assign_polygon(rings, grid, options);
        lock(&self.tallies).insert(key, tally.clone());
        tally
    }

    pub fn clear(&self) {
        lock(&self.tallies).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.tallies).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
