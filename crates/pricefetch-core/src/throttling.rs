//! Client-side request quotas in front of a provider.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock as _, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{
    CapabilitySet, HistoricalRequest, LatestBarRequest, PriceProvider, ProviderFuture,
    QuoteRequest,
};
use crate::{Bar, ProviderId, ProviderOutcome, Quote, Series};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// `limit` calls per rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderQuota {
    pub window: Duration,
    pub limit: u32,
}

impl ProviderQuota {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            window: Duration::from_secs(60),
            limit,
        }
    }

    /// Alpaca's free data plan allows 200 calls per minute.
    pub const fn alpaca_default() -> Self {
        Self::per_minute(200)
    }
}

/// Wraps a provider with a governor quota.
///
/// When the local budget is spent the call answers `RateLimited` with the wait until the
/// next cell is replenished, and the inner provider is never reached.
pub struct ThrottledProvider {
    inner: Arc<dyn PriceProvider>,
    limiter: DirectRateLimiter,
    clock: DefaultClock,
}

impl ThrottledProvider {
    pub fn new(inner: Arc<dyn PriceProvider>, quota: ProviderQuota) -> Self {
        Self {
            inner,
            limiter: RateLimiter::direct(quota_from_window(quota.window, quota.limit)),
            clock: DefaultClock::default(),
        }
    }

    fn admit(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    fn throttled<'a, T: Send + 'a>(&'a self, wait: Duration) -> ProviderFuture<'a, T> {
        debug!(provider = %self.inner.id(), wait_ms = wait.as_millis() as u64, "local quota exhausted");
        Box::pin(async move {
            ProviderOutcome::RateLimited {
                retry_after: Some(wait),
            }
        })
    }
}

impl PriceProvider for ThrottledProvider {
    fn id(&self) -> &ProviderId {
        self.inner.id()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.inner.capabilities()
    }

    fn fetch_historical<'a>(&'a self, request: HistoricalRequest) -> ProviderFuture<'a, Series> {
        match self.admit() {
            Ok(()) => self.inner.fetch_historical(request),
            Err(wait) => self.throttled(wait),
        }
    }

    fn fetch_latest_bar<'a>(&'a self, request: LatestBarRequest) -> ProviderFuture<'a, Bar> {
        match self.admit() {
            Ok(()) => self.inner.fetch_latest_bar(request),
            Err(wait) => self.throttled(wait),
        }
    }

    fn fetch_quote<'a>(&'a self, request: QuoteRequest) -> ProviderFuture<'a, Quote> {
        match self.admit() {
            Ok(()) => self.inner.fetch_quote(request),
            Err(wait) => self.throttled(wait),
        }
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedProvider;
    use crate::{Interval, OutcomeKind, Symbol};

    #[tokio::test]
    async fn exhausted_budget_short_circuits_inner_provider() {
        let inner = Arc::new(ScriptedProvider::new(
            ProviderId::parse("alpaca").expect("valid"),
        ));
        let throttled = ThrottledProvider::new(
            inner.clone(),
            ProviderQuota {
                window: Duration::from_secs(60),
                limit: 2,
            },
        );
        let request =
            LatestBarRequest::new(Symbol::parse("AAPL").expect("valid"), Interval::OneMinute);

        assert!(throttled.fetch_latest_bar(request.clone()).await.is_success());
        assert!(throttled.fetch_latest_bar(request.clone()).await.is_success());

        let third = throttled.fetch_latest_bar(request).await;
        assert_eq!(third.kind(), OutcomeKind::RateLimited);
        let ProviderOutcome::RateLimited {
            retry_after: Some(wait),
        } = third
        else {
            panic!("expected a retry hint");
        };
        assert!(wait <= Duration::from_secs(30));
        assert_eq!(inner.call_count(), 2);
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let quota = quota_from_window(Duration::from_secs(10), 0);
        assert_eq!(quota.burst_size().get(), 1);
    }
}
