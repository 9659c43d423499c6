use pricefetch_core::{Bar, BatchRequest, CacheOrigin, Interval};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, LatestArgs};
use crate::error::CliError;

use super::{batch_failure, build_engine, entry_status, parse_symbols, CommandOutput, EntryStatus};

#[derive(Debug, Serialize)]
struct LatestResult<'a> {
    symbol: &'a str,
    #[serde(flatten)]
    status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<CacheOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bar: Option<&'a Bar>,
}

pub async fn run(cli: &Cli, args: &LatestArgs, cancel: &CancellationToken) -> Result<CommandOutput, CliError> {
    let symbols = parse_symbols(&args.symbols)?;
    let interval: Interval = args.interval.parse()?;
    let engine = build_engine(cli, None)?;

    let report = engine
        .download_batch(&symbols, &BatchRequest::latest(interval), None, cancel)
        .await;

    let results: Vec<LatestResult<'_>> = report
        .entries
        .iter()
        .map(|entry| {
            let resolved = entry.outcome.as_ref().ok();
            LatestResult {
                symbol: entry.symbol.as_str(),
                status: entry_status(entry),
                origin: resolved.map(|resolved| resolved.origin),
                bar: resolved.and_then(|resolved| resolved.series.last_bar()),
            }
        })
        .collect();

    let data = serde_json::to_value(results)?;
    Ok(CommandOutput::ok(data).with_failure(batch_failure(&report)))
}
