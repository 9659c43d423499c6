//! Bounded-concurrency fan-out of symbol fetches through the cache gateway.
//!
//! Every symbol gets its own tokio task, gated by a semaphore of `max_concurrency`
//! permits. Cancellation stops tasks that are still waiting for a permit; fetches that
//! already hold one run to completion.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{panic_message, CacheGateway, CacheKey, CacheOrigin, Resolved};
use crate::orchestrator::{AcquireError, Orchestrator};
use crate::provider::{HistoricalRequest, LatestBarRequest};
use crate::{Interval, Series, Symbol, UtcDateTime, ValidationError};

/// What to fetch for every symbol of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRequest {
    Historical {
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    },
    Latest {
        interval: Interval,
    },
}

impl BatchRequest {
    pub fn historical(
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidRange {
                start: start.format_rfc3339(),
                end: end.format_rfc3339(),
            });
        }
        Ok(Self::Historical {
            interval,
            start,
            end,
        })
    }

    pub const fn latest(interval: Interval) -> Self {
        Self::Latest { interval }
    }

    pub fn key_for(&self, symbol: Symbol) -> CacheKey {
        match *self {
            Self::Historical {
                interval,
                start,
                end,
            } => CacheKey::range(symbol, interval, start, end),
            Self::Latest { interval } => CacheKey::latest(symbol, interval),
        }
    }
}

/// Emitted once per symbol when it reaches a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub symbol: Symbol,
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event);
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn on_progress(&self, event: &ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(event.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("cancelled before dispatch")]
    Cancelled,
    #[error("fetch task panicked: {0}")]
    Panicked(String),
}

/// Terminal outcome for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub symbol: Symbol,
    pub outcome: Result<Resolved, FetchFailure>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub cache_hits: usize,
    pub elapsed_ms: u64,
}

/// One entry per distinct input symbol, in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn get(&self, symbol: &Symbol) -> Option<&BatchEntry> {
        self.entries.iter().find(|entry| &entry.symbol == symbol)
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|entry| entry.outcome.is_ok()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, Err(FetchFailure::Cancelled)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded() - self.cancelled()
    }

    pub fn cache_hits(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| {
                entry
                    .outcome
                    .as_ref()
                    .is_ok_and(|resolved| resolved.origin.is_cache_hit())
            })
            .count()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.entries.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            cancelled: self.cancelled(),
            cache_hits: self.cache_hits(),
            elapsed_ms: self.elapsed.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    /// Every series when all symbols succeeded; otherwise the whole report back.
    pub fn into_complete(self) -> Result<Vec<(Symbol, Series)>, PartialBatchFailure> {
        if self.succeeded() != self.entries.len() {
            return Err(PartialBatchFailure { report: self });
        }

        Ok(self
            .entries
            .into_iter()
            .filter_map(|entry| entry.outcome.ok().map(|resolved| (entry.symbol, resolved.series)))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "batch incomplete: {} failed, {} cancelled of {}",
    .report.failed(),
    .report.cancelled(),
    .report.entries.len()
)]
pub struct PartialBatchFailure {
    pub report: BatchReport,
}

impl PartialBatchFailure {
    pub fn failed_symbols(&self) -> Vec<&Symbol> {
        self.report
            .entries
            .iter()
            .filter(|entry| entry.outcome.is_err())
            .map(|entry| &entry.symbol)
            .collect()
    }
}

/// Drives symbol fetches through the gateway and orchestrator.
#[derive(Clone)]
pub struct BatchDownloader {
    orchestrator: Arc<Orchestrator>,
    gateway: Arc<CacheGateway<AcquireError>>,
}

impl BatchDownloader {
    pub fn new(orchestrator: Arc<Orchestrator>, gateway: Arc<CacheGateway<AcquireError>>) -> Self {
        Self {
            orchestrator,
            gateway,
        }
    }

    pub fn gateway(&self) -> &Arc<CacheGateway<AcquireError>> {
        &self.gateway
    }

    pub async fn fetch_one(&self, symbol: Symbol, request: &BatchRequest) -> Result<Resolved, AcquireError> {
        let key = request.key_for(symbol.clone());
        let orchestrator = Arc::clone(&self.orchestrator);

        match *request {
            BatchRequest::Historical {
                interval,
                start,
                end,
            } => {
                let request = HistoricalRequest::new(symbol, interval, start, end)?;
                self.gateway
                    .lookup_or_fetch(key, move || async move {
                        orchestrator.fetch_historical(&request).await
                    })
                    .await
            }
            BatchRequest::Latest { interval } => {
                let request = LatestBarRequest::new(symbol, interval);
                self.gateway
                    .lookup_or_fetch(key, move || async move {
                        let bar = orchestrator.fetch_latest_bar(&request).await?;
                        Ok(Series::single(request.symbol, request.interval, bar))
                    })
                    .await
            }
        }
    }

    pub async fn download_batch(
        &self,
        symbols: &[Symbol],
        request: &BatchRequest,
        max_concurrency: usize,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let started = Instant::now();
        let symbols = dedupe(symbols);
        let total = symbols.len();
        let max_concurrency = max_concurrency.max(1);
        info!(total, max_concurrency, "batch download started");

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut tasks = JoinSet::new();

        for (index, symbol) in symbols.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let downloader = self.clone();
            let request = *request;

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return (index, Err(FetchFailure::Cancelled));
                };
                if cancel.is_cancelled() {
                    return (index, Err(FetchFailure::Cancelled));
                }

                let outcome = match AssertUnwindSafe(downloader.fetch_one(symbol, &request))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result.map_err(FetchFailure::from),
                    Err(panic) => Err(FetchFailure::Panicked(panic_message(panic.as_ref()))),
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Result<Resolved, FetchFailure>>> = vec![None; total];
        let mut completed = 0;

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(result) => result,
                Err(error) => {
                    warn!(error = %error, "batch task ended without an outcome");
                    continue;
                }
            };

            if let Err(FetchFailure::Acquire(error)) = &outcome {
                warn!(symbol = %symbols[index], error = %error, "symbol fetch failed");
            }
            slots[index] = Some(outcome);
            completed += 1;
            emit(progress.as_deref(), completed, total, &symbols[index]);
        }

        let entries = symbols
            .into_iter()
            .zip(slots)
            .map(|(symbol, slot)| {
                let outcome = slot.unwrap_or_else(|| {
                    completed += 1;
                    emit(progress.as_deref(), completed, total, &symbol);
                    Err(FetchFailure::Panicked(String::from("task aborted")))
                });
                BatchEntry { symbol, outcome }
            })
            .collect();

        let report = BatchReport {
            entries,
            elapsed: started.elapsed(),
        };
        self.log_summary(&report);
        report
    }

    fn log_summary(&self, report: &BatchReport) {
        let summary = report.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            cache_hits = summary.cache_hits,
            elapsed_ms = summary.elapsed_ms,
            "batch download finished"
        );

        for descriptor in self.orchestrator.provider_report() {
            info!(
                provider = %descriptor.name,
                used = descriptor.usage.calls_succeeded,
                empty = descriptor.usage.calls_empty,
                failed = descriptor.usage.calls_failed(),
                available = descriptor.available,
                "provider usage"
            );
        }
    }
}

fn emit(progress: Option<&dyn ProgressSink>, completed: usize, total: usize, symbol: &Symbol) {
    if let Some(sink) = progress {
        sink.on_progress(&ProgressEvent {
            completed,
            total,
            symbol: symbol.clone(),
        });
    }
}

fn dedupe(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut seen = HashSet::with_capacity(symbols.len());
    symbols
        .iter()
        .filter(|symbol| seen.insert((*symbol).clone()))
        .cloned()
        .collect()
}
