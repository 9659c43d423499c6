//! # Screening Filters
//!
//! Filters narrow a [`MetricsTable`] (one row per symbol) to the rows that pass a rule.
//!
//! | Filter | Rule |
//! |--------|------|
//! | [`RangeFilter`] | Inclusive bounds on price, volume, dollar volume or market cap |
//! | [`ExchangeFilter`] | Listing exchange, alias aware |
//! | [`LiquidityFilter`] | Minimum price, volume and dollar volume, optional spread cap |
//! | [`StringMatchFilter`] | Exact, contains, prefix or suffix match on exchange or sector |
//! | [`SectorFilter`] | GICS sector, alias aware |
//! | [`CompositeFilter`] | AND/OR over child filters |
//!
//! Every filter keeps the [`FilterResult`] of its most recent `apply`. That snapshot is the
//! only mutable state; matching itself is a pure function of the row and thresholds.

mod composite;
mod exchange;
mod liquidity;
mod range;
mod text;

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use composite::{CompositeFilter, FilterPipeline, Logic, PipelineResult};
pub use exchange::{canonical_exchange, ExchangeFilter};
pub use liquidity::LiquidityFilter;
pub use range::{MarketCapCategory, RangeFilter};
pub use text::{canonical_sector, MatchMode, SectorFilter, StringMatchFilter, TextColumn};

use crate::domain::spread_percent;
use crate::{Series, Symbol};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("{column} filter minimum {min} exceeds maximum {max}")]
    InvertedBounds { column: Column, min: f64, max: f64 },
    #[error("composite filter requires at least one child")]
    EmptyComposite,
    #[error("invalid threshold for '{field}': {value}")]
    InvalidThreshold { field: &'static str, value: String },
}

/// Numeric columns a [`RangeFilter`] can bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Price,
    Volume,
    DollarVolume,
    MarketCap,
}

impl Column {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Volume => "volume",
            Self::DollarVolume => "dollar_volume",
            Self::MarketCap => "market_cap",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screening inputs for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub symbol: Symbol,
    pub price: f64,
    pub volume: u64,
    pub dollar_volume: f64,
    pub market_cap: Option<f64>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl MetricsRow {
    pub fn new(symbol: Symbol, price: f64, volume: u64) -> Self {
        Self {
            symbol,
            price,
            volume,
            dollar_volume: price * volume as f64,
            market_cap: None,
            exchange: None,
            sector: None,
            bid: None,
            ask: None,
        }
    }

    /// Last close and volume of the series, or `None` for an empty series.
    pub fn from_series(series: &Series) -> Option<Self> {
        let bar = series.last_bar()?;
        Some(Self::new(series.symbol().clone(), bar.close, bar.volume))
    }

    pub fn with_market_cap(mut self, market_cap: f64) -> Self {
        self.market_cap = Some(market_cap);
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn with_quote(mut self, bid: f64, ask: f64) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    pub fn value(&self, column: Column) -> Option<f64> {
        match column {
            Column::Price => Some(self.price),
            Column::Volume => Some(self.volume as f64),
            Column::DollarVolume => Some(self.dollar_volume),
            Column::MarketCap => self.market_cap,
        }
    }

    pub fn spread_percent(&self) -> Option<f64> {
        spread_percent(self.bid?, self.ask?)
    }
}

/// Rows with unique symbols. The first row for a symbol wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable {
    rows: Vec<MetricsRow>,
}

impl MetricsTable {
    pub fn new(rows: impl IntoIterator<Item = MetricsRow>) -> Self {
        let mut seen = HashSet::new();
        Self {
            rows: rows
                .into_iter()
                .filter(|row| seen.insert(row.symbol.clone()))
                .collect(),
        }
    }

    /// Snapshot rows from series, skipping empty ones.
    pub fn from_series<'a>(series: impl IntoIterator<Item = &'a Series>) -> Self {
        Self::new(series.into_iter().filter_map(MetricsRow::from_series))
    }

    pub fn rows(&self) -> &[MetricsRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn symbols(&self) -> Vec<&Symbol> {
        self.rows.iter().map(|row| &row.symbol).collect()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.rows.iter().any(|row| &row.symbol == symbol)
    }

    pub fn row(&self, symbol: &Symbol) -> Option<&MetricsRow> {
        self.rows.iter().find(|row| &row.symbol == symbol)
    }

    /// Order-preserving subset.
    pub fn filtered(&self, mut keep: impl FnMut(&MetricsRow) -> bool) -> Self {
        Self {
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }
}

impl FromIterator<MetricsRow> for MetricsTable {
    fn from_iter<I: IntoIterator<Item = MetricsRow>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Row counts for one filter run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    pub name: String,
    pub input_row_count: usize,
    pub output_row_count: usize,
    pub filtered_count: usize,
    pub filter_rate_percent: f64,
}

impl FilterResult {
    pub fn compute(name: impl Into<String>, input_row_count: usize, output_row_count: usize) -> Self {
        let filtered_count = input_row_count.saturating_sub(output_row_count);
        let filter_rate_percent = if input_row_count == 0 {
            0.0
        } else {
            let rate = filtered_count as f64 / input_row_count as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };

        Self {
            name: name.into(),
            input_row_count,
            output_row_count,
            filtered_count,
            filter_rate_percent,
        }
    }
}

/// Holds the stats of a filter's most recent run.
#[derive(Debug, Default)]
pub struct LastRun(Mutex<Option<FilterResult>>);

impl LastRun {
    pub fn record(&self, result: FilterResult) {
        *self.0.lock().expect("filter stats lock is not poisoned") = Some(result);
    }

    pub fn get(&self) -> Option<FilterResult> {
        self.0.lock().expect("filter stats lock is not poisoned").clone()
    }
}

impl Clone for LastRun {
    fn clone(&self) -> Self {
        Self(Mutex::new(self.get()))
    }
}

pub trait SymbolFilter: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, row: &MetricsRow) -> bool;

    fn last_run(&self) -> &LastRun;

    fn apply(&self, table: &MetricsTable) -> MetricsTable {
        let output = table.filtered(|row| self.matches(row));
        let result = FilterResult::compute(self.name(), table.len(), output.len());
        debug!(
            filter = self.name(),
            input = result.input_row_count,
            output = result.output_row_count,
            "filter applied"
        );
        self.last_run().record(result);
        output
    }

    fn stats(&self) -> Option<FilterResult> {
        self.last_run().get()
    }
}

pub(crate) fn check_threshold(field: &'static str, value: f64) -> Result<f64, FilterError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(FilterError::InvalidThreshold {
            field,
            value: value.to_string(),
        })
    }
}
