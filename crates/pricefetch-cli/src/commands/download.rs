use std::sync::Arc;

use pricefetch_core::{
    BatchRequest, BatchSummary, Bar, CacheOrigin, Interval, ProgressEvent, ProgressSink,
    UtcDateTime,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{Cli, DownloadArgs};
use crate::error::CliError;

use super::{batch_failure, build_engine, entry_status, parse_symbols, CommandOutput, EntryStatus};

#[derive(Debug, Serialize)]
struct DownloadResult<'a> {
    symbol: &'a str,
    #[serde(flatten)]
    status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<CacheOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bar_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bars: Option<&'a [Bar]>,
}

#[derive(Debug, Serialize)]
struct DownloadResponse<'a> {
    summary: BatchSummary,
    results: Vec<DownloadResult<'a>>,
}

pub async fn run(cli: &Cli, args: &DownloadArgs, cancel: &CancellationToken) -> Result<CommandOutput, CliError> {
    let symbols = parse_symbols(&args.symbols)?;
    let interval: Interval = args.interval.parse()?;
    let request = BatchRequest::historical(
        interval,
        UtcDateTime::parse(&args.start)?,
        UtcDateTime::parse(&args.end)?,
    )?;

    let engine = build_engine(cli, args.concurrency)?;
    let progress: Arc<dyn ProgressSink> = Arc::new(|event: &ProgressEvent| {
        info!(
            completed = event.completed,
            total = event.total,
            symbol = %event.symbol,
            "download progress"
        );
    });
    let report = engine
        .download_batch(&symbols, &request, Some(progress), cancel)
        .await;

    let results = report
        .entries
        .iter()
        .map(|entry| {
            let resolved = entry.outcome.as_ref().ok();
            DownloadResult {
                symbol: entry.symbol.as_str(),
                status: entry_status(entry),
                origin: resolved.map(|resolved| resolved.origin),
                bar_count: resolved.map(|resolved| resolved.series.len()),
                bars: resolved
                    .filter(|_| !args.summary_only)
                    .map(|resolved| resolved.series.bars()),
            }
        })
        .collect();

    let data = serde_json::to_value(DownloadResponse {
        summary: report.summary(),
        results,
    })?;
    Ok(CommandOutput::ok(data).with_failure(batch_failure(&report)))
}
