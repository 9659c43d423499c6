use std::collections::HashMap;

use pricefetch_core::{
    BatchRequest, ExchangeFilter, FilterPipeline, Interval, LiquidityFilter, Logic, MetricsRow,
    MetricsTable, RangeFilter, Symbol, SymbolFilter,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::{Cli, LogicArg, ScreenArgs};
use crate::error::CliError;

use super::universe::http_universe;
use super::{batch_failure, build_engine, parse_symbols, CommandOutput};

fn filters(args: &ScreenArgs) -> Result<Vec<Box<dyn SymbolFilter>>, CliError> {
    let mut filters: Vec<Box<dyn SymbolFilter>> = Vec::new();
    if args.min_price.is_some() || args.max_price.is_some() {
        filters.push(Box::new(RangeFilter::price(args.min_price, args.max_price)?));
    }
    if args.min_volume.is_some() {
        filters.push(Box::new(RangeFilter::volume(args.min_volume, None)?));
    }
    if args.min_dollar_volume.is_some() {
        filters.push(Box::new(RangeFilter::dollar_volume(args.min_dollar_volume, None)?));
    }
    if !args.exchange.is_empty() {
        filters.push(Box::new(ExchangeFilter::new(&args.exchange)?));
    }
    if args.liquidity {
        filters.push(Box::new(LiquidityFilter::default()));
    }

    if filters.is_empty() {
        return Err(CliError::Command(String::from(
            "no filters given; use --min-price, --max-price, --min-volume, --min-dollar-volume, --exchange or --liquidity",
        )));
    }
    Ok(filters)
}

pub async fn run(cli: &Cli, args: &ScreenArgs, cancel: &CancellationToken) -> Result<CommandOutput, CliError> {
    let logic = match args.logic {
        LogicArg::And => Logic::And,
        LogicArg::Or => Logic::Or,
    };
    let pipeline = FilterPipeline::new(logic, filters(args)?)?;

    let mut symbols = parse_symbols(&args.symbols)?;
    let mut exchanges: HashMap<Symbol, String> = HashMap::new();
    if !args.from_exchange.is_empty() {
        let tickers = http_universe();
        let universe = tickers
            .get_combined_universe(args.from_exchange.as_slice())
            .await;
        for failure in &universe.failures {
            warn!(exchange = %failure.exchange, error = %failure.error, "exchange skipped");
        }
        for code in &args.from_exchange {
            let Some(snapshot) = tickers.snapshot(code) else {
                continue;
            };
            for symbol in snapshot.symbols {
                exchanges.entry(symbol).or_insert_with(|| snapshot.exchange.clone());
            }
        }
        symbols.extend(universe.symbols);
    }
    if let Some(limit) = args.limit {
        symbols.truncate(limit);
    }
    if symbols.is_empty() {
        return Err(CliError::Command(String::from("no symbols to screen")));
    }

    let engine = build_engine(cli, None)?;
    let report = engine
        .download_batch(&symbols, &BatchRequest::latest(Interval::OneDay), None, cancel)
        .await;

    let table: MetricsTable = report
        .entries
        .iter()
        .filter_map(|entry| entry.outcome.as_ref().ok())
        .filter_map(|resolved| MetricsRow::from_series(&resolved.series))
        .map(|row| match exchanges.get(&row.symbol).cloned() {
            Some(exchange) => row.with_exchange(exchange),
            None => row,
        })
        .collect();

    let result = pipeline.run(&table);
    let passed: Vec<&str> = result.table.symbols().into_iter().map(Symbol::as_str).collect();
    let unavailable: Vec<&str> = report
        .entries
        .iter()
        .filter(|entry| entry.outcome.is_err())
        .map(|entry| entry.symbol.as_str())
        .collect();

    let data = json!({
        "passed": passed,
        "combined": result.combined,
        "per_filter": result.per_filter,
        "rows": result.table,
        "unavailable": unavailable,
    });
    Ok(CommandOutput::ok(data).with_failure(batch_failure(&report)))
}
