use super::{check_threshold, FilterError, LastRun, MetricsRow, SymbolFilter};

/// Minimum tradability thresholds. Rows without a quote pass the spread check.
#[derive(Debug, Clone)]
pub struct LiquidityFilter {
    min_price: f64,
    min_volume: f64,
    min_dollar_volume: f64,
    max_spread_percent: Option<f64>,
    last_run: LastRun,
}

impl Default for LiquidityFilter {
    fn default() -> Self {
        Self {
            min_price: 1.0,
            min_volume: 100_000.0,
            min_dollar_volume: 1_000_000.0,
            max_spread_percent: None,
            last_run: LastRun::default(),
        }
    }
}

impl LiquidityFilter {
    pub fn new(min_price: f64, min_volume: f64, min_dollar_volume: f64) -> Result<Self, FilterError> {
        Ok(Self {
            min_price: check_threshold("min_price", min_price)?,
            min_volume: check_threshold("min_volume", min_volume)?,
            min_dollar_volume: check_threshold("min_dollar_volume", min_dollar_volume)?,
            ..Self::default()
        })
    }

    pub fn with_max_spread_percent(mut self, max_spread_percent: f64) -> Result<Self, FilterError> {
        self.max_spread_percent = Some(check_threshold("max_spread_percent", max_spread_percent)?);
        Ok(self)
    }
}

impl SymbolFilter for LiquidityFilter {
    fn name(&self) -> &str {
        "liquidity"
    }

    fn matches(&self, row: &MetricsRow) -> bool {
        if row.price < self.min_price
            || (row.volume as f64) < self.min_volume
            || row.dollar_volume < self.min_dollar_volume
        {
            return false;
        }

        match (self.max_spread_percent, row.spread_percent()) {
            (Some(max), Some(spread)) => spread <= max,
            _ => true,
        }
    }

    fn last_run(&self) -> &LastRun {
        &self.last_run
    }
}
