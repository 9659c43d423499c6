use pricefetch_core::Quote;
use serde::Serialize;
use tracing::warn;

use crate::cli::{Cli, QuoteArgs};
use crate::error::CliError;

use super::{build_engine, parse_symbols, CommandOutput};

#[derive(Debug, Serialize)]
struct QuoteFailure {
    symbol: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct QuoteResponseData {
    quotes: Vec<Quote>,
    errors: Vec<QuoteFailure>,
}

pub async fn run(cli: &Cli, args: &QuoteArgs) -> Result<CommandOutput, CliError> {
    let symbols = parse_symbols(&args.symbols)?;
    let engine = build_engine(cli, None)?;

    let mut data = QuoteResponseData {
        quotes: Vec::new(),
        errors: Vec::new(),
    };
    for symbol in symbols {
        match engine.quote(symbol.clone()).await {
            Ok(quote) => data.quotes.push(quote),
            Err(error) => {
                warn!(symbol = %symbol, error = %error, "quote failed");
                data.errors.push(QuoteFailure {
                    symbol: symbol.to_string(),
                    error: error.to_string(),
                });
            }
        }
    }

    let failure = match (data.quotes.len(), data.errors.len()) {
        (_, 0) => None,
        (0, _) => Some(CliError::NothingAcquired(
            data.errors
                .iter()
                .map(|failure| failure.symbol.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )),
        (succeeded, failed) => Some(CliError::Partial {
            failed,
            cancelled: 0,
            total: succeeded + failed,
        }),
    };

    Ok(CommandOutput::ok(serde_json::to_value(data)?).with_failure(failure))
}
