use pricefetch_core::{
    CompositeFilter, ExchangeFilter, FilterPipeline, LiquidityFilter, Logic, MarketCapCategory,
    MatchMode, MetricsRow, MetricsTable, RangeFilter, SectorFilter, StringMatchFilter,
    SymbolFilter, TextColumn,
};

use pricefetch_tests::{daily_series, sym};

fn row(symbol: &str, price: f64, volume: u64) -> MetricsRow {
    MetricsRow::new(sym(symbol), price, volume)
}

fn sample_table() -> MetricsTable {
    MetricsTable::new([
        row("AAPL", 150.0, 50_000_000).with_exchange("NASDAQ"),
        row("PENNY", 0.5, 1_000).with_exchange("AMEX"),
        row("BIGVOL", 25.0, 10_000_000).with_exchange("NYSE"),
        row("LOWVOL", 100.0, 500).with_exchange("XNYS"),
    ])
}

// =============================================================================
// Single filters
// =============================================================================

#[test]
fn when_price_band_applies_only_rows_inside_it_remain() {
    // Given: Four rows and a 1..=50 price band
    let filter = RangeFilter::price(Some(1.0), Some(50.0)).expect("valid band");

    // When: The filter runs
    let output = filter.apply(&sample_table());

    // Then: Only BIGVOL survives and the stats describe the cut
    assert_eq!(output.symbols(), vec![&sym("BIGVOL")]);
    let stats = filter.stats().expect("ran once");
    assert_eq!(stats.name, "price");
    assert_eq!(stats.input_row_count, 4);
    assert_eq!(stats.output_row_count, 1);
    assert_eq!(stats.filtered_count, 3);
    assert!((stats.filter_rate_percent - 75.0).abs() < f64::EPSILON);
}

#[test]
fn when_bounds_are_inverted_filter_is_rejected() {
    assert!(RangeFilter::price(Some(50.0), Some(1.0)).is_err());
    assert!(RangeFilter::volume(Some(-1.0), None).is_err());
    assert!(LiquidityFilter::new(1.0, f64::NAN, 0.0).is_err());
}

#[test]
fn when_exchange_aliases_are_used_they_match_the_canonical_code() {
    let filter = ExchangeFilter::new(["nyse"]).expect("one exchange");

    let output = filter.apply(&sample_table());

    assert_eq!(output.symbols(), vec![&sym("BIGVOL"), &sym("LOWVOL")]);
}

#[test]
fn when_market_cap_is_missing_category_filter_drops_the_row_unless_allowed() {
    let table = MetricsTable::new([
        row("MEGA", 180.0, 1_000_000).with_market_cap(2.8e12),
        row("TINY", 2.0, 1_000_000).with_market_cap(50e6),
        row("UNKNOWN", 10.0, 1_000_000),
    ]);

    let large = RangeFilter::market_cap_category(MarketCapCategory::Large);
    let lenient = RangeFilter::market_cap(None, Some(1e9))
        .expect("valid bound")
        .allow_missing(true);

    assert_eq!(large.apply(&table).symbols(), vec![&sym("MEGA")]);
    assert_eq!(lenient.apply(&table).symbols(), vec![&sym("TINY"), &sym("UNKNOWN")]);
}

#[test]
fn when_liquidity_checks_spread_wide_quotes_are_dropped() {
    let table = MetricsTable::new([
        row("TIGHT", 100.0, 1_000_000).with_quote(99.99, 100.01),
        row("WIDE", 100.0, 1_000_000).with_quote(95.0, 105.0),
        row("NOQUOTE", 100.0, 1_000_000),
    ]);
    let filter = LiquidityFilter::default()
        .with_max_spread_percent(1.0)
        .expect("valid spread");

    let output = filter.apply(&table);

    assert_eq!(output.symbols(), vec![&sym("TIGHT"), &sym("NOQUOTE")]);
}

#[test]
fn when_sector_alias_is_used_it_matches_the_gics_name() {
    // Given: Rows tagged with GICS sectors, one untagged
    let table = MetricsTable::new([
        row("AAPL", 150.0, 50_000_000).with_sector("Information Technology"),
        row("XOM", 110.0, 20_000_000).with_sector("Energy"),
        row("MSFT", 400.0, 25_000_000).with_sector("information technology"),
        row("NOSECTOR", 20.0, 1_000_000),
    ]);
    let pipeline = FilterPipeline::new(
        Logic::And,
        vec![
            Box::new(SectorFilter::new(["technology"]).expect("valid")) as Box<dyn SymbolFilter>,
            Box::new(RangeFilter::price(None, Some(200.0)).expect("valid")),
        ],
    )
    .expect("non-empty pipeline");

    // When: The pipeline runs
    let result = pipeline.run(&table);

    // Then: The alias expanded, matched case-insensitively, and the price cap applied
    assert_eq!(result.table.symbols(), vec![&sym("AAPL")]);
    assert_eq!(result.per_filter["filter_0_sector"].output_row_count, 2);
}

#[test]
fn when_string_match_uses_prefix_mode_any_target_may_match() {
    let table = MetricsTable::new([
        row("AAPL", 150.0, 1_000).with_sector("Information Technology"),
        row("JNJ", 160.0, 1_000).with_sector("Health Care"),
        row("DUK", 100.0, 1_000).with_sector("Utilities"),
    ]);
    let filter = StringMatchFilter::new(TextColumn::Sector, ["info", "HEALTH"])
        .expect("valid")
        .with_mode(MatchMode::StartsWith)
        .with_name("growth_sectors");

    let output = filter.apply(&table);

    assert_eq!(output.symbols(), vec![&sym("AAPL"), &sym("JNJ")]);
    assert_eq!(filter.stats().expect("ran once").name, "growth_sectors");
}

// =============================================================================
// Composition
// =============================================================================

#[test]
fn when_pipeline_combines_with_and_every_filter_must_pass() {
    // Given: Price and volume floors
    let pipeline = FilterPipeline::new(
        Logic::And,
        vec![
            Box::new(RangeFilter::price(Some(1.0), None).expect("valid")) as Box<dyn SymbolFilter>,
            Box::new(RangeFilter::volume(Some(1_000_000.0), None).expect("valid")),
        ],
    )
    .expect("non-empty pipeline");

    // When: The pipeline runs
    let result = pipeline.run(&sample_table());

    // Then: Rows clearing both remain, each filter reports against the full input
    assert_eq!(result.table.symbols(), vec![&sym("AAPL"), &sym("BIGVOL")]);
    assert_eq!(result.combined.filtered_count, 2);
    assert!((result.combined.filter_rate_percent - 50.0).abs() < f64::EPSILON);
    let keys: Vec<&str> = result.per_filter.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["filter_0_price", "filter_1_volume"]);
    assert_eq!(result.per_filter["filter_0_price"].output_row_count, 3);
    assert_eq!(result.per_filter["filter_1_volume"].output_row_count, 2);
}

#[test]
fn when_pipeline_combines_with_or_any_filter_suffices() {
    let pipeline = FilterPipeline::new(
        Logic::Or,
        vec![
            Box::new(RangeFilter::price(None, Some(1.0)).expect("valid")) as Box<dyn SymbolFilter>,
            Box::new(ExchangeFilter::new(["NASDAQ"]).expect("valid")),
        ],
    )
    .expect("non-empty pipeline");

    let result = pipeline.run(&sample_table());

    assert_eq!(result.table.symbols(), vec![&sym("AAPL"), &sym("PENNY")]);
}

#[test]
fn when_composites_nest_the_inner_result_feeds_the_outer_logic() {
    // Given: (cheap OR huge volume) AND listed on NYSE
    let inner = CompositeFilter::new(
        Logic::Or,
        vec![
            Box::new(RangeFilter::price(None, Some(30.0)).expect("valid")) as Box<dyn SymbolFilter>,
            Box::new(RangeFilter::volume(Some(40_000_000.0), None).expect("valid")),
        ],
    )
    .expect("non-empty")
    .with_name("cheap_or_active");
    let outer = CompositeFilter::new(
        Logic::And,
        vec![
            Box::new(inner) as Box<dyn SymbolFilter>,
            Box::new(ExchangeFilter::new(["NYSE"]).expect("valid")),
        ],
    )
    .expect("non-empty");

    // When: The outer filter runs
    let output = outer.apply(&sample_table());

    // Then: Only BIGVOL satisfies both sides
    assert_eq!(output.symbols(), vec![&sym("BIGVOL")]);
    let child_stats = outer.child_stats();
    assert_eq!(child_stats[0].as_ref().map(|stats| stats.output_row_count), Some(3));
}

#[test]
fn when_empty_composite_is_built_it_is_rejected() {
    assert!(CompositeFilter::new(Logic::And, Vec::new()).is_err());
    assert!(FilterPipeline::new(Logic::Or, Vec::new()).is_err());
}

#[test]
fn when_series_are_screened_the_last_bar_feeds_the_row() {
    let table = MetricsTable::from_series([
        &daily_series("AAPL", "2024-01-01T00:00:00Z", &[100.0, 120.0]),
        &daily_series("MSFT", "2024-01-01T00:00:00Z", &[300.0]),
    ]);
    let filter = RangeFilter::price(Some(110.0), Some(200.0)).expect("valid");

    let output = filter.apply(&table);

    let aapl = output.row(&sym("AAPL")).expect("kept");
    assert!((aapl.price - 120.0).abs() < f64::EPSILON);
    assert_eq!(aapl.volume, 1_000);
    assert_eq!(output.len(), 1);
}

#[test]
fn when_input_is_empty_rate_is_zero() {
    let pipeline = FilterPipeline::new(
        Logic::And,
        vec![Box::new(LiquidityFilter::default()) as Box<dyn SymbolFilter>],
    )
    .expect("non-empty");

    let result = pipeline.run(&MetricsTable::default());

    assert!(result.table.is_empty());
    assert_eq!(result.combined.filter_rate_percent, 0.0);
}
