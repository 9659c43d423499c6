use serde::{Deserialize, Serialize};

use super::{check_threshold, Column, FilterError, LastRun, MetricsRow, SymbolFilter};

const MILLION: f64 = 1_000_000.0;

/// Market-cap buckets, bounds in millions of dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCapCategory {
    Micro,
    Small,
    Mid,
    Large,
}

impl MarketCapCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Micro => "micro",
            Self::Small => "small",
            Self::Mid => "mid",
            Self::Large => "large",
        }
    }

    /// Inclusive dollar bounds. The upper bound of one bucket is the lower bound of the next.
    pub fn bounds(self) -> (Option<f64>, Option<f64>) {
        match self {
            Self::Micro => (None, Some(300.0 * MILLION)),
            Self::Small => (Some(300.0 * MILLION), Some(2_000.0 * MILLION)),
            Self::Mid => (Some(2_000.0 * MILLION), Some(10_000.0 * MILLION)),
            Self::Large => (Some(10_000.0 * MILLION), None),
        }
    }

    pub fn of(market_cap: f64) -> Self {
        if market_cap < 300.0 * MILLION {
            Self::Micro
        } else if market_cap < 2_000.0 * MILLION {
            Self::Small
        } else if market_cap < 10_000.0 * MILLION {
            Self::Mid
        } else {
            Self::Large
        }
    }
}

/// Inclusive `[min, max]` bound over one numeric column.
#[derive(Debug, Clone)]
pub struct RangeFilter {
    name: String,
    column: Column,
    min: Option<f64>,
    max: Option<f64>,
    category: Option<MarketCapCategory>,
    allow_missing: bool,
    last_run: LastRun,
}

impl RangeFilter {
    pub fn new(column: Column, min: Option<f64>, max: Option<f64>) -> Result<Self, FilterError> {
        let min = min.map(|value| check_threshold("min", value)).transpose()?;
        let max = max.map(|value| check_threshold("max", value)).transpose()?;
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(FilterError::InvertedBounds { column, min, max });
            }
        }

        Ok(Self {
            name: column.as_str().to_owned(),
            column,
            min,
            max,
            category: None,
            allow_missing: false,
            last_run: LastRun::default(),
        })
    }

    pub fn price(min: Option<f64>, max: Option<f64>) -> Result<Self, FilterError> {
        Self::new(Column::Price, min, max)
    }

    pub fn volume(min: Option<f64>, max: Option<f64>) -> Result<Self, FilterError> {
        Self::new(Column::Volume, min, max)
    }

    pub fn dollar_volume(min: Option<f64>, max: Option<f64>) -> Result<Self, FilterError> {
        Self::new(Column::DollarVolume, min, max)
    }

    pub fn market_cap(min: Option<f64>, max: Option<f64>) -> Result<Self, FilterError> {
        Self::new(Column::MarketCap, min, max)
    }

    pub fn market_cap_category(category: MarketCapCategory) -> Self {
        let (min, max) = category.bounds();
        Self {
            name: format!("market_cap_{}", category.as_str()),
            column: Column::MarketCap,
            min,
            max,
            category: Some(category),
            allow_missing: false,
            last_run: LastRun::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Let rows without a value for the column pass.
    pub fn allow_missing(mut self, allow: bool) -> Self {
        self.allow_missing = allow;
        self
    }

    pub fn column(&self) -> Column {
        self.column
    }

    pub fn bounds(&self) -> (Option<f64>, Option<f64>) {
        (self.min, self.max)
    }
}

impl SymbolFilter for RangeFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, row: &MetricsRow) -> bool {
        let Some(value) = row.value(self.column) else {
            return self.allow_missing;
        };
        if !value.is_finite() {
            return false;
        }
        // Category buckets are half-open so a cap sits in exactly one bucket.
        if let Some(category) = self.category {
            return MarketCapCategory::of(value) == category;
        }

        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    fn last_run(&self) -> &LastRun {
        &self.last_run
    }
}
