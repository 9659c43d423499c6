use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CacheKey, SeriesStore, TtlPolicy};
use crate::clock::Clock;
use crate::Series;

type SharedFetch<E> = Shared<BoxFuture<'static, Result<Series, FetchFault<E>>>>;

#[derive(Debug, Clone)]
enum FetchFault<E> {
    Failed(E),
    Panicked(Arc<str>),
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// Where a resolved series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    Hit,
    CoveringHit,
    Fetched,
    Coalesced,
}

impl CacheOrigin {
    pub const fn is_cache_hit(self) -> bool {
        matches!(self, Self::Hit | Self::CoveringHit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub series: Series,
    pub origin: CacheOrigin,
}

/// Lifetime counters of one gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub hits: u64,
    pub covering_hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

/// Serves fresh cached series and runs at most one fetch per key at a time.
///
/// Concurrent callers for a key whose fetch is still running share its result, including
/// its error. Failed and empty fetches are never written to the store.
pub struct CacheGateway<E>
where
    E: Clone + Send + Sync + 'static,
{
    store: Arc<dyn SeriesStore>,
    policy: TtlPolicy,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<CacheKey, SharedFetch<E>>>,
    hits: AtomicU64,
    covering_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl<E> CacheGateway<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn SeriesStore>, policy: TtlPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            covering_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            hits: self.hits.load(Ordering::Relaxed),
            covering_hits: self.covering_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Series, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Series, E>> + Send + 'static,
    {
        self.lookup_or_fetch(key, fetch)
            .await
            .map(|resolved| resolved.series)
    }

    pub async fn lookup_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Resolved, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Series, E>> + Send + 'static,
    {
        if let Some(resolved) = self.cached(&key) {
            return Ok(resolved);
        }

        let (shared, origin) = match self.running(&key) {
            Some(existing) => (existing, CacheOrigin::Coalesced),
            None => {
                // A fetch for this key may have landed since the first lookup.
                if let Some(resolved) = self.cached(&key) {
                    return Ok(resolved);
                }

                let mut in_flight = self
                    .in_flight
                    .lock()
                    .expect("in-flight map lock is not poisoned");
                let raced = in_flight
                    .get(&key)
                    .filter(|existing| existing.peek().is_none())
                    .cloned();
                match raced {
                    Some(existing) => (existing, CacheOrigin::Coalesced),
                    None => {
                        let shared = self.shared_fetch(key.clone(), fetch());
                        in_flight.insert(key.clone(), shared.clone());
                        (shared, CacheOrigin::Fetched)
                    }
                }
            }
        };

        match origin {
            CacheOrigin::Coalesced => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "joined in-flight fetch");
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache miss");
            }
        }

        let result = shared.clone().await;

        {
            let mut in_flight = self
                .in_flight
                .lock()
                .expect("in-flight map lock is not poisoned");
            if in_flight
                .get(&key)
                .is_some_and(|current| Shared::ptr_eq(current, &shared))
            {
                in_flight.remove(&key);
            }
        }

        match result {
            Ok(series) => Ok(Resolved { series, origin }),
            Err(FetchFault::Failed(error)) => Err(error),
            // Every waiter sees the panic; the key is already free for the next caller.
            Err(FetchFault::Panicked(message)) => panic::resume_unwind(Box::new(message.to_string())),
        }
    }

    fn running(&self, key: &CacheKey) -> Option<SharedFetch<E>> {
        self.in_flight
            .lock()
            .expect("in-flight map lock is not poisoned")
            .get(key)
            .filter(|existing| existing.peek().is_none())
            .cloned()
    }

    fn shared_fetch<Fut>(&self, key: CacheKey, fetch: Fut) -> SharedFetch<E>
    where
        Fut: Future<Output = Result<Series, E>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);

        async move {
            let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result.map_err(FetchFault::Failed),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(key = %key, panic = %message, "fetch panicked");
                    return Err(FetchFault::Panicked(message.into()));
                }
            };
            if let Ok(series) = &result {
                if !series.is_empty() {
                    if let Err(error) = store.put(&key, series, clock.now()) {
                        warn!(key = %key, error = %error, "failed to write fetched series to cache");
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    fn cached(&self, key: &CacheKey) -> Option<Resolved> {
        let now = self.clock.now();

        match self.store.get(key) {
            Ok(Some(entry)) if self.policy.is_fresh(&entry, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit");
                return Some(Resolved {
                    series: entry.series,
                    origin: CacheOrigin::Hit,
                });
            }
            Ok(_) => {}
            Err(error) => warn!(key = %key, error = %error, "cache read failed, treating as miss"),
        }

        let CacheKey::Range {
            symbol,
            interval,
            start,
            end,
        } = key
        else {
            return None;
        };

        match self.store.find_covering(symbol, *interval, *start, *end) {
            Ok(Some(entry)) if self.policy.is_fresh(&entry, now) => {
                self.covering_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, covering = %entry.key, "covering cache hit");
                Some(Resolved {
                    series: entry.series.slice(*start, *end),
                    origin: CacheOrigin::CoveringHit,
                })
            }
            Ok(_) => None,
            Err(error) => {
                warn!(key = %key, error = %error, "covering lookup failed, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    use super::*;
    use crate::cache::{CachedSeries, MemorySeriesStore, StoreError};
    use crate::clock::ManualClock;
    use crate::{Bar, Interval, Symbol, UtcDateTime};

    fn ts(value: &str) -> UtcDateTime {
        UtcDateTime::parse(value).expect("valid")
    }

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").expect("valid")
    }

    fn daily_series(days: &[&str]) -> Series {
        let bars = days
            .iter()
            .map(|day| Bar::new(ts(day), 10.0, 11.0, 9.0, 10.5, 1_000, None).expect("bar"))
            .collect();
        Series::new(aapl(), Interval::OneDay, bars).expect("ordered")
    }

    fn gateway(now: &str) -> (CacheGateway<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(ts(now)));
        let gateway = CacheGateway::new(
            Arc::new(MemorySeriesStore::new()),
            TtlPolicy::default(),
            clock.clone(),
        );
        (gateway, clock)
    }

    #[tokio::test]
    async fn open_range_refetches_after_ttl() {
        let (gateway, clock) = gateway("2024-01-05T12:00:00Z");
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-02T00:00:00Z"),
            ts("2024-01-06T00:00:00Z"),
        );

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            gateway
                .get_or_fetch(key.clone(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(daily_series(&["2024-01-03T00:00:00Z"]))
                })
                .await
                .expect("fetch");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(15 * 60));
        let calls_after = Arc::clone(&calls);
        gateway
            .get_or_fetch(key, move || async move {
                calls_after.fetch_add(1, Ordering::SeqCst);
                Ok(daily_series(&["2024-01-03T00:00:00Z"]))
            })
            .await
            .expect("fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.stats().hits, 1);
        assert_eq!(gateway.stats().misses, 2);
    }

    #[tokio::test]
    async fn failures_and_empty_series_are_not_cached() {
        let (gateway, _clock) = gateway("2024-01-05T12:00:00Z");
        let key = CacheKey::latest(aapl(), Interval::OneDay);

        let error = gateway
            .get_or_fetch(key.clone(), || async { Err(String::from("exhausted")) })
            .await
            .expect_err("failure propagates");
        assert_eq!(error, "exhausted");

        let empty = gateway
            .lookup_or_fetch(key.clone(), || async {
                Ok(Series::empty(aapl(), Interval::OneDay))
            })
            .await
            .expect("empty is returned");
        assert_eq!(empty.origin, CacheOrigin::Fetched);

        let again = gateway
            .lookup_or_fetch(key, || async { Ok(daily_series(&["2024-01-05T00:00:00Z"])) })
            .await
            .expect("fetched");
        assert_eq!(again.origin, CacheOrigin::Fetched);
        assert_eq!(gateway.stats().misses, 3);
    }

    #[tokio::test]
    async fn narrower_request_is_sliced_from_covering_entry() {
        let (gateway, _clock) = gateway("2024-02-10T12:00:00Z");
        let wide = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-01T00:00:00Z"),
            ts("2024-01-10T00:00:00Z"),
        );
        gateway
            .get_or_fetch(wide, || async {
                Ok(daily_series(&[
                    "2024-01-03T00:00:00Z",
                    "2024-01-04T00:00:00Z",
                    "2024-01-05T00:00:00Z",
                ]))
            })
            .await
            .expect("fetch");

        let narrow = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-04T00:00:00Z"),
            ts("2024-01-05T00:00:00Z"),
        );
        let resolved = gateway
            .lookup_or_fetch(narrow, || async { Err(String::from("must not fetch")) })
            .await
            .expect("served from cache");

        assert_eq!(resolved.origin, CacheOrigin::CoveringHit);
        assert_eq!(resolved.series.len(), 1);
    }

    #[tokio::test]
    async fn panicking_fetch_leaves_key_free_for_the_next_caller() {
        let (gateway, _clock) = gateway("2024-01-05T12:00:00Z");
        let key = CacheKey::latest(aapl(), Interval::OneDay);

        let first = AssertUnwindSafe(gateway.lookup_or_fetch(key.clone(), || async {
            if std::hint::black_box(true) {
                panic!("adapter bug");
            }
            Ok(Series::empty(aapl(), Interval::OneDay))
        }))
        .catch_unwind()
        .await;
        let payload = first.expect_err("panic reaches the caller");
        assert_eq!(panic_message(payload.as_ref()), "adapter bug");

        let second = gateway
            .lookup_or_fetch(key, || async { Ok(daily_series(&["2024-01-05T00:00:00Z"])) })
            .await
            .expect("fetched again");
        assert_eq!(second.origin, CacheOrigin::Fetched);
        assert!(gateway.in_flight.lock().expect("lock").is_empty());
    }

    /// Counts store reads made while the gateway's in-flight map is locked.
    struct LockWatchingStore {
        inner: MemorySeriesStore,
        gateway: OnceLock<Weak<CacheGateway<String>>>,
        reads: AtomicUsize,
        locked_reads: AtomicUsize,
    }

    impl LockWatchingStore {
        fn new() -> Self {
            Self {
                inner: MemorySeriesStore::new(),
                gateway: OnceLock::new(),
                reads: AtomicUsize::new(0),
                locked_reads: AtomicUsize::new(0),
            }
        }

        fn observe(&self) {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if let Some(gateway) = self.gateway.get().and_then(Weak::upgrade) {
                if gateway.in_flight.try_lock().is_err() {
                    self.locked_reads.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    impl SeriesStore for LockWatchingStore {
        fn get(&self, key: &CacheKey) -> Result<Option<CachedSeries>, StoreError> {
            self.observe();
            self.inner.get(key)
        }

        fn put(&self, key: &CacheKey, series: &Series, at: UtcDateTime) -> Result<(), StoreError> {
            self.inner.put(key, series, at)
        }

        fn find_covering(
            &self,
            symbol: &Symbol,
            interval: Interval,
            start: UtcDateTime,
            end: UtcDateTime,
        ) -> Result<Option<CachedSeries>, StoreError> {
            self.observe();
            self.inner.find_covering(symbol, interval, start, end)
        }
    }

    #[tokio::test]
    async fn store_reads_happen_outside_the_in_flight_lock() {
        let store = Arc::new(LockWatchingStore::new());
        let gateway = Arc::new(CacheGateway::new(
            store.clone(),
            TtlPolicy::default(),
            Arc::new(ManualClock::new(ts("2024-01-05T12:00:00Z"))),
        ));
        assert!(store.gateway.set(Arc::downgrade(&gateway)).is_ok());
        let key = CacheKey::range(
            aapl(),
            Interval::OneDay,
            ts("2024-01-02T00:00:00Z"),
            ts("2024-01-04T00:00:00Z"),
        );

        gateway
            .get_or_fetch(key, || async { Ok(daily_series(&["2024-01-03T00:00:00Z"])) })
            .await
            .expect("fetched");

        assert_eq!(store.reads.load(Ordering::SeqCst), 4);
        assert_eq!(store.locked_reads.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug, Default)]
    struct BrokenStore;

    impl SeriesStore for BrokenStore {
        fn get(&self, _key: &CacheKey) -> Result<Option<CachedSeries>, StoreError> {
            Err(StoreError::Backend(String::from("disk gone")))
        }

        fn put(&self, _key: &CacheKey, _series: &Series, _at: UtcDateTime) -> Result<(), StoreError> {
            Err(StoreError::Backend(String::from("disk gone")))
        }

        fn find_covering(
            &self,
            _symbol: &Symbol,
            _interval: Interval,
            _start: UtcDateTime,
            _end: UtcDateTime,
        ) -> Result<Option<CachedSeries>, StoreError> {
            Err(StoreError::Backend(String::from("disk gone")))
        }
    }

    #[tokio::test]
    async fn store_errors_degrade_to_fetching() {
        let gateway: CacheGateway<String> = CacheGateway::new(
            Arc::new(BrokenStore),
            TtlPolicy::default(),
            Arc::new(ManualClock::new(ts("2024-01-05T12:00:00Z"))),
        );
        let key = CacheKey::latest(aapl(), Interval::OneDay);

        let series = gateway
            .get_or_fetch(key, || async { Ok(daily_series(&["2024-01-05T00:00:00Z"])) })
            .await
            .expect("fetch still succeeds");
        assert_eq!(series.len(), 1);
    }
}
