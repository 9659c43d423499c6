use serde::{Deserialize, Serialize};

use crate::{Interval, Symbol, UtcDateTime, ValidationError};

/// OHLCV bar. `ts` marks the close of the bar period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub vwap: Option<f64>,
}

impl Bar {
    pub fn new(
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
        vwap: Option<f64>,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;
        validate_optional_non_negative("vwap", vwap)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
            vwap,
        })
    }

    pub fn dollar_volume(&self) -> f64 {
        self.close * self.volume as f64
    }
}

/// Ordered bars for one `(symbol, interval)` pair.
///
/// Timestamps are strictly increasing. Gaps are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct Series {
    symbol: Symbol,
    interval: Interval,
    bars: Vec<Bar>,
}

#[derive(Deserialize)]
struct RawSeries {
    symbol: Symbol,
    interval: Interval,
    bars: Vec<Bar>,
}

impl TryFrom<RawSeries> for Series {
    type Error = ValidationError;

    fn try_from(value: RawSeries) -> Result<Self, Self::Error> {
        Self::new(value.symbol, value.interval, value.bars)
    }
}

impl Series {
    pub fn new(symbol: Symbol, interval: Interval, bars: Vec<Bar>) -> Result<Self, ValidationError> {
        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].ts <= pair[0].ts {
                return Err(ValidationError::UnorderedSeries { index: index + 1 });
            }
        }

        Ok(Self {
            symbol,
            interval,
            bars,
        })
    }

    /// Sorts provider payloads and keeps the last bar seen for each timestamp.
    pub fn normalized(symbol: Symbol, interval: Interval, mut bars: Vec<Bar>) -> Self {
        bars.reverse();
        bars.sort_by_key(|bar| bar.ts);
        bars.dedup_by_key(|bar| bar.ts);

        Self {
            symbol,
            interval,
            bars,
        }
    }

    pub fn empty(symbol: Symbol, interval: Interval) -> Self {
        Self {
            symbol,
            interval,
            bars: Vec::new(),
        }
    }

    pub fn single(symbol: Symbol, interval: Interval, bar: Bar) -> Self {
        Self {
            symbol,
            interval,
            bars: vec![bar],
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub const fn interval(&self) -> Interval {
        self.interval
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_bar(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Bars whose timestamp falls in `[start, end)`.
    pub fn slice(&self, start: UtcDateTime, end: UtcDateTime) -> Self {
        let from = self.bars.partition_point(|bar| bar.ts < start);
        let to = self.bars.partition_point(|bar| bar.ts < end).max(from);

        Self {
            symbol: self.symbol.clone(),
            interval: self.interval,
            bars: self.bars[from..to].to_vec(),
        }
    }
}

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub bid: f64,
    pub ask: f64,
    pub as_of: UtcDateTime,
}

impl Quote {
    pub fn new(symbol: Symbol, bid: f64, ask: f64, as_of: UtcDateTime) -> Result<Self, ValidationError> {
        validate_non_negative("bid", bid)?;
        validate_non_negative("ask", ask)?;

        Ok(Self {
            symbol,
            bid,
            ask,
            as_of,
        })
    }

    /// Spread as a percentage of the bid, when the bid is positive.
    pub fn spread_percent(&self) -> Option<f64> {
        spread_percent(self.bid, self.ask)
    }
}

pub(crate) fn spread_percent(bid: f64, ask: f64) -> Option<f64> {
    if bid > 0.0 && ask > 0.0 {
        Some((ask - bid) / bid * 100.0)
    } else {
        None
    }
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_non_negative(field, value)?;
    }
    Ok(())
}
