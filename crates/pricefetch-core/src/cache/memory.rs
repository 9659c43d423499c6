use std::collections::HashMap;
use std::sync::RwLock;

use super::{CacheKey, CachedSeries, SeriesStore, StoreError};
use crate::{Interval, Series, Symbol, UtcDateTime};

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySeriesStore {
    entries: RwLock<HashMap<CacheKey, CachedSeries>>,
}

impl MemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("memory store lock is not poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SeriesStore for MemorySeriesStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedSeries>, StoreError> {
        Ok(self
            .entries
            .read()
            .expect("memory store lock is not poisoned")
            .get(key)
            .cloned())
    }

    fn put(&self, key: &CacheKey, series: &Series, fetched_at: UtcDateTime) -> Result<(), StoreError> {
        self.entries
            .write()
            .expect("memory store lock is not poisoned")
            .insert(
                key.clone(),
                CachedSeries {
                    key: key.clone(),
                    series: series.clone(),
                    fetched_at,
                },
            );
        Ok(())
    }

    fn find_covering(
        &self,
        symbol: &Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Option<CachedSeries>, StoreError> {
        let wanted = CacheKey::range(symbol.clone(), interval, start, end);
        let entries = self.entries.read().expect("memory store lock is not poisoned");

        Ok(entries
            .values()
            .filter(|entry| matches!(entry.key, CacheKey::Range { .. }) && entry.key.covers(&wanted))
            .max_by_key(|entry| entry.fetched_at)
            .cloned())
    }
}
