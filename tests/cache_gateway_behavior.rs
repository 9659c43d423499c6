use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pricefetch_core::{
    CacheGateway, CacheKey, CacheOrigin, Interval, ManualClock, MemorySeriesStore, Series,
    TtlPolicy,
};

use pricefetch_tests::{clock_at, daily_series, sym, ts};

fn gateway(clock: &Arc<ManualClock>) -> CacheGateway<String> {
    CacheGateway::new(
        Arc::new(MemorySeriesStore::new()),
        TtlPolicy::default(),
        clock.clone(),
    )
}

fn counted_fetch(
    calls: &Arc<AtomicUsize>,
    series: Series,
) -> impl FnOnce() -> std::future::Ready<Result<Series, String>> {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(series))
    }
}

fn january_key() -> CacheKey {
    CacheKey::range(
        sym("AAPL"),
        Interval::OneDay,
        ts("2024-01-01T00:00:00Z"),
        ts("2024-01-06T00:00:00Z"),
    )
}

// =============================================================================
// Hits and coalescing
// =============================================================================

#[tokio::test]
async fn when_same_key_is_requested_twice_provider_is_called_once() {
    // Given: An empty cache and a counting fetch
    let clock = clock_at("2024-02-01T12:00:00Z");
    let gateway = gateway(&clock);
    let calls = Arc::new(AtomicUsize::new(0));
    let series = daily_series("AAPL", "2024-01-01T00:00:00Z", &[10.0, 11.0, 12.0]);

    // When: The same range is requested twice in a row
    let first = gateway
        .lookup_or_fetch(january_key(), counted_fetch(&calls, series.clone()))
        .await
        .expect("fetch succeeds");
    let second = gateway
        .lookup_or_fetch(january_key(), counted_fetch(&calls, series.clone()))
        .await
        .expect("cache serves");

    // Then: Only the first call reached the provider
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.origin, CacheOrigin::Fetched);
    assert_eq!(second.origin, CacheOrigin::Hit);
    assert_eq!(second.series, series);
}

#[tokio::test(start_paused = true)]
async fn when_same_key_is_requested_concurrently_fetch_runs_once() {
    // Given: A slow fetch
    let clock = clock_at("2024-02-01T12:00:00Z");
    let gateway = gateway(&clock);
    let calls = Arc::new(AtomicUsize::new(0));
    let series = daily_series("AAPL", "2024-01-01T00:00:00Z", &[10.0, 11.0]);

    let slow = |calls: Arc<AtomicUsize>, series: Series| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, String>(series)
        }
    };

    // When: Two callers ask for the same key at once
    let (first, second) = tokio::join!(
        gateway.lookup_or_fetch(january_key(), slow(Arc::clone(&calls), series.clone())),
        gateway.lookup_or_fetch(january_key(), slow(Arc::clone(&calls), series.clone())),
    );

    // Then: One fetch ran and both callers got its result
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = first.expect("leader succeeds");
    let second = second.expect("follower shares");
    assert_eq!(first.origin, CacheOrigin::Fetched);
    assert_eq!(second.origin, CacheOrigin::Coalesced);
    assert_eq!(first.series, second.series);
    assert_eq!(gateway.stats().coalesced, 1);
}

#[tokio::test]
async fn when_fetch_fails_nothing_is_cached() {
    let clock = clock_at("2024-02-01T12:00:00Z");
    let gateway = gateway(&clock);
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = {
        let calls = Arc::clone(&calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<Series, _>(String::from("providers exhausted")))
        }
    };
    let error = gateway
        .lookup_or_fetch(january_key(), failing)
        .await
        .expect_err("failure propagates");
    assert_eq!(error, "providers exhausted");

    let series = daily_series("AAPL", "2024-01-01T00:00:00Z", &[10.0]);
    let retried = gateway
        .lookup_or_fetch(january_key(), counted_fetch(&calls, series))
        .await
        .expect("retry fetches");

    assert_eq!(retried.origin, CacheOrigin::Fetched);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Freshness
// =============================================================================

#[tokio::test]
async fn when_open_range_ttl_passes_entry_is_refetched() {
    // Given: A range ending tomorrow, cached at noon
    let clock = clock_at("2024-02-01T12:00:00Z");
    let gateway = gateway(&clock);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::range(
        sym("AAPL"),
        Interval::OneDay,
        ts("2024-01-29T00:00:00Z"),
        ts("2024-02-02T00:00:00Z"),
    );
    let series = daily_series("AAPL", "2024-01-29T00:00:00Z", &[10.0, 11.0, 12.0]);
    gateway
        .lookup_or_fetch(key.clone(), counted_fetch(&calls, series.clone()))
        .await
        .expect("first fetch");

    // When: 14 minutes pass, then 2 more
    clock.advance(Duration::from_secs(14 * 60));
    let fresh = gateway
        .lookup_or_fetch(key.clone(), counted_fetch(&calls, series.clone()))
        .await
        .expect("still cached");
    clock.advance(Duration::from_secs(2 * 60));
    let stale = gateway
        .lookup_or_fetch(key, counted_fetch(&calls, series))
        .await
        .expect("refetched");

    // Then: The 15 minute window decides
    assert_eq!(fresh.origin, CacheOrigin::Hit);
    assert_eq!(stale.origin, CacheOrigin::Fetched);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_range_closed_before_fetch_day_entry_never_expires() {
    let clock = clock_at("2024-02-01T12:00:00Z");
    let gateway = gateway(&clock);
    let calls = Arc::new(AtomicUsize::new(0));
    let series = daily_series("AAPL", "2024-01-01T00:00:00Z", &[10.0, 11.0]);
    gateway
        .lookup_or_fetch(january_key(), counted_fetch(&calls, series.clone()))
        .await
        .expect("first fetch");

    clock.advance(Duration::from_secs(365 * 24 * 60 * 60));
    let later = gateway
        .lookup_or_fetch(january_key(), counted_fetch(&calls, series))
        .await
        .expect("cached");

    assert_eq!(later.origin, CacheOrigin::Hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn when_latest_period_ends_entry_expires_before_its_ttl() {
    // Given: A latest 1m bar cached 30s before the minute boundary
    let clock = clock_at("2024-02-01T12:00:30Z");
    let gateway = gateway(&clock);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::latest(sym("AAPL"), Interval::OneMinute);
    let series = daily_series("AAPL", "2024-02-01T00:00:00Z", &[10.0]);
    gateway
        .lookup_or_fetch(key.clone(), counted_fetch(&calls, series.clone()))
        .await
        .expect("first fetch");

    // When: The minute rolls over, well inside the 60s TTL
    clock.advance(Duration::from_secs(31));
    let resolved = gateway
        .lookup_or_fetch(key, counted_fetch(&calls, series))
        .await
        .expect("refetched");

    // Then: The period end wins
    assert_eq!(resolved.origin, CacheOrigin::Fetched);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_cached_range_contains_request_it_is_sliced() {
    let clock = clock_at("2024-02-01T12:00:00Z");
    let gateway = gateway(&clock);
    let calls = Arc::new(AtomicUsize::new(0));
    let series = daily_series("AAPL", "2024-01-01T00:00:00Z", &[10.0, 11.0, 12.0, 13.0, 14.0]);
    gateway
        .lookup_or_fetch(january_key(), counted_fetch(&calls, series.clone()))
        .await
        .expect("first fetch");

    let narrower = CacheKey::range(
        sym("AAPL"),
        Interval::OneDay,
        ts("2024-01-02T00:00:00Z"),
        ts("2024-01-04T00:00:00Z"),
    );
    let resolved = gateway
        .lookup_or_fetch(narrower, counted_fetch(&calls, series))
        .await
        .expect("covered");

    assert_eq!(resolved.origin, CacheOrigin::CoveringHit);
    let closes: Vec<f64> = resolved.series.bars().iter().map(|bar| bar.close).collect();
    assert_eq!(closes, vec![11.0, 12.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
