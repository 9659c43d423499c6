use pricefetch_warehouse::{SeriesRecord, Warehouse, WarehouseError};

use super::{CacheKey, CachedSeries, SeriesStore, StoreError};
use crate::{Bar, Interval, Series, Symbol, UtcDateTime};

/// Persists cached series in the DuckDB warehouse.
#[derive(Clone)]
pub struct WarehouseSeriesStore {
    warehouse: Warehouse,
}

impl WarehouseSeriesStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

impl SeriesStore for WarehouseSeriesStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedSeries>, StoreError> {
        let (range_start, range_end) = range_columns(key);
        self.warehouse
            .get_series(
                key.symbol().as_str(),
                key.interval().as_str(),
                key.kind(),
                range_start,
                range_end,
            )
            .map_err(backend)?
            .map(decode)
            .transpose()
    }

    fn put(&self, key: &CacheKey, series: &Series, fetched_at: UtcDateTime) -> Result<(), StoreError> {
        let (range_start, range_end) = range_columns(key);
        let bars_json = serde_json::to_string(series.bars())
            .map_err(|error| StoreError::Corrupt(error.to_string()))?;

        self.warehouse
            .put_series(&SeriesRecord {
                symbol: key.symbol().to_string(),
                interval: key.interval().to_string(),
                kind: key.kind().to_owned(),
                range_start,
                range_end,
                fetched_at: fetched_at.unix_timestamp(),
                bar_count: i64::try_from(series.len()).unwrap_or(i64::MAX),
                bars_json,
            })
            .map_err(backend)
    }

    fn find_covering(
        &self,
        symbol: &Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Option<CachedSeries>, StoreError> {
        self.warehouse
            .find_covering(
                symbol.as_str(),
                interval.as_str(),
                start.unix_timestamp(),
                end.unix_timestamp(),
            )
            .map_err(backend)?
            .map(decode)
            .transpose()
    }
}

fn range_columns(key: &CacheKey) -> (i64, i64) {
    match key {
        CacheKey::Range { start, end, .. } => (start.unix_timestamp(), end.unix_timestamp()),
        CacheKey::Latest { .. } => (0, 0),
    }
}

fn backend(error: WarehouseError) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn decode(record: SeriesRecord) -> Result<CachedSeries, StoreError> {
    let corrupt = |error: &dyn std::fmt::Display| StoreError::Corrupt(error.to_string());

    let symbol = Symbol::parse(&record.symbol).map_err(|e| corrupt(&e))?;
    let interval = record.interval.parse::<Interval>().map_err(|e| corrupt(&e))?;
    let key = match record.kind.as_str() {
        "range" => CacheKey::range(
            symbol.clone(),
            interval,
            UtcDateTime::from_unix_timestamp(record.range_start).map_err(|e| corrupt(&e))?,
            UtcDateTime::from_unix_timestamp(record.range_end).map_err(|e| corrupt(&e))?,
        ),
        "latest" => CacheKey::latest(symbol.clone(), interval),
        other => return Err(StoreError::Corrupt(format!("unknown key kind '{other}'"))),
    };

    let bars: Vec<Bar> = serde_json::from_str(&record.bars_json).map_err(|e| corrupt(&e))?;
    let series = Series::new(symbol, interval, bars).map_err(|e| corrupt(&e))?;

    Ok(CachedSeries {
        key,
        series,
        fetched_at: UtcDateTime::from_unix_timestamp(record.fetched_at).map_err(|e| corrupt(&e))?,
    })
}
