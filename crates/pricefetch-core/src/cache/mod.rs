//! Series caching in front of the orchestrator.
//!
//! | Key | Freshness |
//! |-----|-----------|
//! | `Range` ending at or before the UTC midnight of its fetch day | never expires |
//! | `Range` reaching into the fetch day or later | `open_range_ttl` after fetch |
//! | `Latest` | `latest_ttl` after fetch or the close of the bar period, whichever is first |

mod gateway;
mod memory;
mod warehouse;

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Interval, Series, Symbol, UtcDateTime};

pub(crate) use gateway::panic_message;
pub use gateway::{CacheGateway, CacheOrigin, GatewayStats, Resolved};
pub use memory::MemorySeriesStore;
pub use warehouse::WarehouseSeriesStore;

/// Identity of a cached series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheKey {
    Range {
        symbol: Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    },
    Latest {
        symbol: Symbol,
        interval: Interval,
    },
}

impl CacheKey {
    pub fn range(symbol: Symbol, interval: Interval, start: UtcDateTime, end: UtcDateTime) -> Self {
        Self::Range {
            symbol,
            interval,
            start,
            end,
        }
    }

    pub fn latest(symbol: Symbol, interval: Interval) -> Self {
        Self::Latest { symbol, interval }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Range { symbol, .. } | Self::Latest { symbol, .. } => symbol,
        }
    }

    pub fn interval(&self) -> Interval {
        match self {
            Self::Range { interval, .. } | Self::Latest { interval, .. } => *interval,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Range { .. } => "range",
            Self::Latest { .. } => "latest",
        }
    }

    /// Whether a series cached under `self` holds every bar requested by `other`.
    pub fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Range {
                    symbol,
                    interval,
                    start,
                    end,
                },
                Self::Range {
                    symbol: wanted_symbol,
                    interval: wanted_interval,
                    start: wanted_start,
                    end: wanted_end,
                },
            ) => {
                symbol == wanted_symbol
                    && interval == wanted_interval
                    && start <= wanted_start
                    && end >= wanted_end
            }
            _ => self == other,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Range {
                symbol,
                interval,
                start,
                end,
            } => write!(f, "range:{symbol}:{interval}:{start}..{end}"),
            Self::Latest { symbol, interval } => write!(f, "latest:{symbol}:{interval}"),
        }
    }
}

/// A stored series and when it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSeries {
    pub key: CacheKey,
    pub series: Series,
    pub fetched_at: UtcDateTime,
}

/// Freshness windows for cached series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub open_range_ttl: Duration,
    pub latest_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            open_range_ttl: Duration::from_secs(15 * 60),
            latest_ttl: Duration::from_secs(60),
        }
    }
}

impl TtlPolicy {
    /// `None` when the entry never expires.
    pub fn expires_at(&self, key: &CacheKey, fetched_at: UtcDateTime) -> Option<UtcDateTime> {
        match key {
            CacheKey::Range { end, .. } if *end <= fetched_at.start_of_day() => None,
            CacheKey::Range { .. } => Some(fetched_at.saturating_add(self.open_range_ttl)),
            CacheKey::Latest { interval, .. } => {
                let by_ttl = fetched_at.saturating_add(self.latest_ttl);
                Some(by_ttl.min(interval.period_end(fetched_at)))
            }
        }
    }

    pub fn is_fresh(&self, entry: &CachedSeries, now: UtcDateTime) -> bool {
        self.expires_at(&entry.key, entry.fetched_at)
            .map_or(true, |expires_at| now < expires_at)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cached payload is corrupt: {0}")]
    Corrupt(String),
}

/// Synchronous storage collaborator behind the gateway.
pub trait SeriesStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedSeries>, StoreError>;

    fn put(&self, key: &CacheKey, series: &Series, fetched_at: UtcDateTime) -> Result<(), StoreError>;

    /// Most recently fetched `Range` entry whose range contains `[start, end)`.
    fn find_covering(
        &self,
        symbol: &Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Option<CachedSeries>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> UtcDateTime {
        UtcDateTime::parse(value).expect("valid")
    }

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").expect("valid")
    }

    #[test]
    fn closed_range_never_expires() {
        let key = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-01T00:00:00Z"),
            ts("2024-01-05T00:00:00Z"),
        );
        let policy = TtlPolicy::default();
        assert_eq!(policy.expires_at(&key, ts("2024-01-05T09:00:00Z")), None);
    }

    #[test]
    fn range_into_fetch_day_uses_open_range_ttl() {
        let key = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-01T00:00:00Z"),
            ts("2024-01-06T00:00:00Z"),
        );
        let policy = TtlPolicy::default();
        assert_eq!(
            policy.expires_at(&key, ts("2024-01-05T09:00:00Z")),
            Some(ts("2024-01-05T09:15:00Z"))
        );
    }

    #[test]
    fn latest_expires_at_period_close_when_sooner() {
        let key = CacheKey::latest(aapl(), Interval::FiveMinutes);
        let policy = TtlPolicy::default();

        assert_eq!(
            policy.expires_at(&key, ts("2024-01-05T09:04:30Z")),
            Some(ts("2024-01-05T09:05:00Z"))
        );
        assert_eq!(
            policy.expires_at(&key, ts("2024-01-05T09:01:00Z")),
            Some(ts("2024-01-05T09:02:00Z"))
        );
    }

    #[test]
    fn wider_range_covers_narrower_only() {
        let wide = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-01T00:00:00Z"),
            ts("2024-02-01T00:00:00Z"),
        );
        let narrow = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-10T00:00:00Z"),
            ts("2024-01-20T00:00:00Z"),
        );

        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
        assert!(!wide.covers(&CacheKey::latest(aapl(), Interval::OneDay)));
    }
}
