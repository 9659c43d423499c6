use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pricefetch_core::{
    CacheGateway, CacheKey, CacheOrigin, Interval, ManualClock, Series, SeriesStore, TtlPolicy,
    Warehouse, WarehouseConfig, WarehouseSeriesStore,
};

use pricefetch_tests::{clock_at, daily_series, sym, ts};

fn open_store(dir: &tempfile::TempDir) -> WarehouseSeriesStore {
    let warehouse = Warehouse::open(WarehouseConfig::at_path(dir.path().join("cache.duckdb")))
        .expect("warehouse opens");
    WarehouseSeriesStore::new(warehouse)
}

fn gateway(store: WarehouseSeriesStore, clock: &Arc<ManualClock>) -> CacheGateway<String> {
    CacheGateway::new(Arc::new(store), TtlPolicy::default(), clock.clone())
}

fn january_key() -> CacheKey {
    CacheKey::range(
        sym("AAPL"),
        Interval::OneDay,
        ts("2024-01-01T00:00:00Z"),
        ts("2024-01-06T00:00:00Z"),
    )
}

fn fetch_counting(
    calls: &Arc<AtomicUsize>,
    series: Series,
) -> impl FnOnce() -> std::future::Ready<Result<Series, String>> {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(series))
    }
}

#[tokio::test]
async fn when_warehouse_is_reopened_cached_series_is_served_without_fetching() {
    // Given: A series fetched through one gateway and persisted
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = clock_at("2024-02-01T12:00:00Z");
    let calls = Arc::new(AtomicUsize::new(0));
    let series = daily_series("AAPL", "2024-01-01T00:00:00Z", &[10.0, 11.0, 12.0]);
    {
        let first = gateway(open_store(&dir), &clock);
        first
            .lookup_or_fetch(january_key(), fetch_counting(&calls, series.clone()))
            .await
            .expect("fetched");
    }

    // When: A fresh gateway over a reopened warehouse asks for the same range
    let second = gateway(open_store(&dir), &clock);
    let resolved = second
        .lookup_or_fetch(january_key(), fetch_counting(&calls, series.clone()))
        .await
        .expect("served");

    // Then: The stored bars come back unchanged
    assert_eq!(resolved.origin, CacheOrigin::Hit);
    assert_eq!(resolved.series, series);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn when_persisted_range_contains_request_it_is_sliced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = clock_at("2024-02-01T12:00:00Z");
    let calls = Arc::new(AtomicUsize::new(0));
    let series = daily_series("AAPL", "2024-01-01T00:00:00Z", &[10.0, 11.0, 12.0, 13.0, 14.0]);
    let gateway = gateway(open_store(&dir), &clock);
    gateway
        .lookup_or_fetch(january_key(), fetch_counting(&calls, series.clone()))
        .await
        .expect("fetched");

    let narrower = CacheKey::range(
        sym("AAPL"),
        Interval::OneDay,
        ts("2024-01-03T00:00:00Z"),
        ts("2024-01-06T00:00:00Z"),
    );
    let resolved = gateway
        .lookup_or_fetch(narrower, fetch_counting(&calls, series))
        .await
        .expect("covered");

    assert_eq!(resolved.origin, CacheOrigin::CoveringHit);
    let closes: Vec<f64> = resolved.series.bars().iter().map(|bar| bar.close).collect();
    assert_eq!(closes, vec![12.0, 13.0, 14.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn when_latest_entry_is_stored_it_round_trips_with_its_fetch_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let key = CacheKey::latest(sym("MSFT"), Interval::OneMinute);
    let series = daily_series("MSFT", "2024-02-01T00:00:00Z", &[400.0]);
    let fetched_at = ts("2024-02-01T15:59:30Z");

    store.put(&key, &series, fetched_at).expect("stored");
    let entry = store.get(&key).expect("readable").expect("present");

    assert_eq!(entry.key, key);
    assert_eq!(entry.series, series);
    assert_eq!(entry.fetched_at, fetched_at);
    assert!(store
        .find_covering(
            &sym("MSFT"),
            Interval::OneMinute,
            ts("2024-02-01T00:00:00Z"),
            ts("2024-02-02T00:00:00Z"),
        )
        .expect("readable")
        .is_none());
}
