use std::sync::Arc;

use pricefetch_core::{CombinedUniverse, HttpListingSource, ReqwestHttpClient, TickerUniverse};
use serde_json::json;

use crate::cli::UniverseArgs;
use crate::error::CliError;

use super::CommandOutput;

pub(crate) fn http_universe() -> TickerUniverse {
    TickerUniverse::new(Arc::new(HttpListingSource::new(Arc::new(ReqwestHttpClient::new()))))
}

pub(crate) fn universe_failure(universe: &CombinedUniverse) -> Option<CliError> {
    if !universe.is_partial() {
        return None;
    }
    let exchanges: Vec<&str> = universe
        .failures
        .iter()
        .map(|failure| failure.exchange.as_str())
        .collect();
    if universe.symbols.is_empty() {
        Some(CliError::NothingAcquired(exchanges.join(", ")))
    } else {
        Some(CliError::Partial {
            failed: universe.failures.len(),
            cancelled: 0,
            total: universe.failures.len() + universe.per_exchange.len(),
        })
    }
}

pub async fn run(args: &UniverseArgs) -> Result<CommandOutput, CliError> {
    let universe = http_universe().get_combined_universe(args.exchanges.as_slice()).await;
    let failure = universe_failure(&universe);

    let data = if args.counts_only {
        json!({
            "total": universe.symbols.len(),
            "per_exchange": universe.per_exchange,
            "failures": universe.failures,
        })
    } else {
        serde_json::to_value(&universe)?
    };
    Ok(CommandOutput::ok(data).with_failure(failure))
}
