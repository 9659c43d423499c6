//! # Pricefetch Warehouse
//!
//! DuckDB-backed persistence for cached price series.
//!
//! Each cached series is one row of `series_cache`, keyed by symbol, interval, key kind and
//! the epoch-second range it answers. Bars travel as an opaque JSON payload; this crate
//! never interprets them.
//!
//! ```rust,no_run
//! use pricefetch_warehouse::{SeriesRecord, Warehouse};
//!
//! let warehouse = Warehouse::open_default()?;
//! warehouse.put_series(&SeriesRecord {
//!     symbol: String::from("AAPL"),
//!     interval: String::from("1d"),
//!     kind: String::from("range"),
//!     range_start: 1_704_067_200,
//!     range_end: 1_706_745_600,
//!     fetched_at: 1_706_800_000,
//!     bar_count: 0,
//!     bars_json: String::from("[]"),
//! })?;
//! # Ok::<(), pricefetch_warehouse::WarehouseError>(())
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `series_cache` | Cached series payloads with fetch time |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, Row, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for pricefetch data.
    pub pricefetch_home: PathBuf,
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let pricefetch_home = resolve_pricefetch_home();
        let db_path = pricefetch_home.join("cache").join("warehouse.duckdb");
        Self {
            pricefetch_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    pub fn at_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

/// One row of `series_cache`. Latest-bar entries use `0` for both range columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesRecord {
    pub symbol: String,
    pub interval: String,
    pub kind: String,
    pub range_start: i64,
    pub range_end: i64,
    pub fetched_at: i64,
    pub bar_count: i64,
    pub bars_json: String,
}

/// Row counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub entries: i64,
    pub bars: i64,
}

const SELECT_COLUMNS: &str = "symbol, bar_interval, kind, range_start, range_end, fetched_at, bar_count, bars_json";

#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Inserts or replaces the row for the record's key.
    pub fn put_series(&self, record: &SeriesRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            let params: [&dyn ToSql; 8] = [
                &record.symbol,
                &record.interval,
                &record.kind,
                &record.range_start,
                &record.range_end,
                &record.fetched_at,
                &record.bar_count,
                &record.bars_json,
            ];
            connection.execute(
                "INSERT OR REPLACE INTO series_cache \
                 (symbol, bar_interval, kind, range_start, range_end, fetched_at, bar_count, bars_json) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params.as_slice(),
            )?;
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    pub fn get_series(
        &self,
        symbol: &str,
        interval: &str,
        kind: &str,
        range_start: i64,
        range_end: i64,
    ) -> Result<Option<SeriesRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 5] = [&symbol, &interval, &kind, &range_start, &range_end];
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM series_cache \
             WHERE symbol = ? AND bar_interval = ? AND kind = ? AND range_start = ? AND range_end = ?"
        );
        first_record(&connection, &sql, params.as_slice())
    }

    /// Most recently fetched range row containing `[range_start, range_end)`.
    pub fn find_covering(
        &self,
        symbol: &str,
        interval: &str,
        range_start: i64,
        range_end: i64,
    ) -> Result<Option<SeriesRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 4] = [&symbol, &interval, &range_start, &range_end];
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM series_cache \
             WHERE symbol = ? AND bar_interval = ? AND kind = 'range' \
             AND range_start <= ? AND range_end >= ? \
             ORDER BY fetched_at DESC LIMIT 1"
        );
        first_record(&connection, &sql, params.as_slice())
    }

    pub fn summary(&self) -> Result<CacheSummary, WarehouseError> {
        let connection = self.manager.acquire()?;
        let summary = connection.query_row(
            "SELECT COUNT(*), COALESCE(SUM(bar_count), 0) FROM series_cache",
            [],
            |row| {
                Ok(CacheSummary {
                    entries: row.get(0)?,
                    bars: row.get(1)?,
                })
            },
        )?;
        Ok(summary)
    }
}

fn first_record(
    connection: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Option<SeriesRecord>, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    let mut rows = statement.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(read_record(row)?)),
        None => Ok(None),
    }
}

fn read_record(row: &Row<'_>) -> Result<SeriesRecord, ::duckdb::Error> {
    Ok(SeriesRecord {
        symbol: row.get(0)?,
        interval: row.get(1)?,
        kind: row.get(2)?,
        range_start: row.get(3)?,
        range_end: row.get(4)?,
        fetched_at: row.get(5)?,
        bar_count: row.get(6)?,
        bars_json: row.get(7)?,
    })
}

/// Commits on success and rolls back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn resolve_pricefetch_home() -> PathBuf {
    if let Some(path) = env::var_os("PRICEFETCH_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".pricefetch");
    }

    PathBuf::from(".pricefetch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(temp: &tempfile::TempDir) -> Warehouse {
        let pricefetch_home = temp.path().join("pricefetch-home");
        let db_path = pricefetch_home.join("cache").join("warehouse.duckdb");
        Warehouse::open(WarehouseConfig {
            pricefetch_home,
            db_path,
            max_pool_size: 2,
        })
        .expect("warehouse open")
    }

    fn record(start: i64, end: i64, fetched_at: i64) -> SeriesRecord {
        SeriesRecord {
            symbol: String::from("AAPL"),
            interval: String::from("1d"),
            kind: String::from("range"),
            range_start: start,
            range_end: end,
            fetched_at,
            bar_count: 2,
            bars_json: String::from("[]"),
        }
    }

    #[test]
    fn migrations_are_recorded_once() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);
        warehouse.initialize().expect("re-initialize");

        let connection = warehouse.manager.acquire().expect("connection");
        let versions = migrations::applied_versions(&connection).expect("versions");
        assert_eq!(versions, vec!["0001_series_cache", "0002_series_cache_indexes"]);
    }

    #[test]
    fn put_replaces_row_for_same_key() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);

        warehouse.put_series(&record(100, 200, 1_000)).expect("put");
        warehouse.put_series(&record(100, 200, 2_000)).expect("put");

        let stored = warehouse
            .get_series("AAPL", "1d", "range", 100, 200)
            .expect("query")
            .expect("row exists");
        assert_eq!(stored.fetched_at, 2_000);
        assert_eq!(warehouse.summary().expect("summary").entries, 1);
    }

    #[test]
    fn covering_query_uses_parameters_and_newest_fetch() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open(&temp);

        warehouse.put_series(&record(0, 1_000, 10)).expect("put");
        warehouse.put_series(&record(100, 900, 20)).expect("put");

        let found = warehouse
            .find_covering("AAPL", "1d", 200, 800)
            .expect("query")
            .expect("covered");
        assert_eq!(found.range_start, 100);

        let hostile = warehouse
            .find_covering("AAPL' OR '1'='1", "1d", 200, 800)
            .expect("query");
        assert!(hostile.is_none());

        let wider = warehouse.find_covering("AAPL", "1d", 0, 2_000).expect("query");
        assert!(wider.is_none());
    }
}
