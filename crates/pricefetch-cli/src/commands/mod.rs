mod download;
mod latest;
mod providers;
mod quote;
mod screen;
mod universe;

use std::sync::Arc;

use pricefetch_core::{
    BatchEntry, BatchReport, Engine, EngineConfig, FetchFailure, MemorySeriesStore, SeriesStore,
    Symbol, Warehouse, WarehouseConfig, WarehouseSeriesStore,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Rendered output plus the failure that decides the exit code.
pub struct CommandOutput {
    pub data: Value,
    pub failure: Option<CliError>,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failure: None,
        }
    }

    pub fn with_failure(mut self, failure: Option<CliError>) -> Self {
        self.failure = failure;
        self
    }
}

pub async fn run(cli: &Cli, cancel: &CancellationToken) -> Result<CommandOutput, CliError> {
    match &cli.command {
        Command::Download(args) => download::run(cli, args, cancel).await,
        Command::Latest(args) => latest::run(cli, args, cancel).await,
        Command::Quote(args) => quote::run(cli, args).await,
        Command::Universe(args) => universe::run(args).await,
        Command::Screen(args) => screen::run(cli, args, cancel).await,
        Command::Providers => providers::run(cli),
    }
}

/// Builds the engine from `--config`, environment overrides and the cache flags.
pub(crate) fn build_engine(cli: &Cli, concurrency: Option<usize>) -> Result<Engine, CliError> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(concurrency) = concurrency {
        config.max_concurrency = concurrency;
    }

    let store: Arc<dyn SeriesStore> = if cli.no_persist {
        Arc::new(MemorySeriesStore::new())
    } else {
        let warehouse = match &cli.db {
            Some(path) => Warehouse::open(WarehouseConfig::at_path(path))?,
            None => Warehouse::open_default()?,
        };
        info!(path = %warehouse.db_path().display(), "using persistent cache");
        Arc::new(WarehouseSeriesStore::new(warehouse))
    };

    Ok(Engine::builder()
        .with_config(config)
        .with_store(store)
        .with_real_clients()
        .build()?)
}

pub(crate) fn parse_symbols(raw: &[String]) -> Result<Vec<Symbol>, CliError> {
    Ok(raw
        .iter()
        .map(|symbol| Symbol::clean(symbol))
        .collect::<Result<Vec<_>, _>>()?)
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum EntryStatus {
    Ok,
    Failed { error: String },
    Cancelled,
}

pub(crate) fn entry_status(entry: &BatchEntry) -> EntryStatus {
    match &entry.outcome {
        Ok(_) => EntryStatus::Ok,
        Err(FetchFailure::Cancelled) => EntryStatus::Cancelled,
        Err(error) => EntryStatus::Failed {
            error: error.to_string(),
        },
    }
}

/// `None` when every symbol succeeded.
pub(crate) fn batch_failure(report: &BatchReport) -> Option<CliError> {
    let summary = report.summary();
    if summary.succeeded == summary.total {
        return None;
    }
    if summary.succeeded == 0 {
        let symbols: Vec<&str> = report.entries.iter().map(|entry| entry.symbol.as_str()).collect();
        return Some(CliError::NothingAcquired(symbols.join(", ")));
    }
    Some(CliError::Partial {
        failed: summary.failed,
        cancelled: summary.cancelled,
        total: summary.total,
    })
}
