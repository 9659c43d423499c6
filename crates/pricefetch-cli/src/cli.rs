//! CLI argument definitions for pricefetch.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `download` | Fetch historical bars for many symbols |
//! | `latest` | Fetch the latest bar per symbol |
//! | `quote` | Fetch top-of-book quotes |
//! | `universe` | List exchange tickers |
//! | `screen` | Filter symbols on their latest daily bar |
//! | `providers` | Show provider configuration and status |
//!
//! # Examples
//!
//! ```bash
//! pricefetch download AAPL MSFT --interval 1d --start 2024-01-01T00:00:00Z --end 2024-02-01T00:00:00Z
//! pricefetch latest SPY --interval 5m
//! pricefetch universe NASDAQ NYSE --counts-only
//! pricefetch screen --from-exchange AMEX --min-price 1 --max-price 50
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "pricefetch",
    author,
    version,
    about = "Multi-provider equity price bar downloader",
    long_about = "pricefetch downloads OHLCV bars from several providers with automatic \
failover, rate-limit backoff and a local DuckDB cache.\n\
\n\
Alpaca credentials are read from PRICEFETCH_ALPACA_API_KEY / PRICEFETCH_ALPACA_SECRET_KEY \
(or ALPACA_API_KEY / ALPACA_SECRET_KEY). Without them only keyless providers are used."
)]
pub struct Cli {
    /// JSON engine configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// DuckDB cache file. Defaults to $PRICEFETCH_HOME/cache/warehouse.duckdb.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Keep the cache in memory for this run only.
    #[arg(long, global = true, default_value_t = false, conflicts_with = "db")]
    pub no_persist: bool,

    /// Log line format written to stderr. Filter with RUST_LOG.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch historical bars for symbols over [start, end).
    Download(DownloadArgs),
    /// Fetch the latest completed bar for symbols.
    Latest(LatestArgs),
    /// Fetch quotes for symbols.
    Quote(QuoteArgs),
    /// List tickers for one or more exchanges.
    Universe(UniverseArgs),
    /// Screen symbols on price and volume.
    Screen(ScreenArgs),
    /// Show configured providers and their usage state.
    Providers,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Symbols to download (case-insensitive, duplicates ignored).
    #[arg(required = true)]
    pub symbols: Vec<String>,

    #[arg(long, default_value = "1d")]
    pub interval: String,

    /// Range start, RFC3339 UTC.
    #[arg(long)]
    pub start: String,

    /// Range end (exclusive), RFC3339 UTC.
    #[arg(long)]
    pub end: String,

    /// Overrides max_concurrency from config.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Print only the batch summary, not the bars.
    #[arg(long, default_value_t = false)]
    pub summary_only: bool,
}

#[derive(Debug, Args)]
pub struct LatestArgs {
    #[arg(required = true)]
    pub symbols: Vec<String>,

    #[arg(long, default_value = "1m")]
    pub interval: String,
}

#[derive(Debug, Args)]
pub struct QuoteArgs {
    #[arg(required = true)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct UniverseArgs {
    /// Exchange codes (NASDAQ, NYSE, AMEX or an alias).
    #[arg(default_values_t = [String::from("NASDAQ"), String::from("NYSE")])]
    pub exchanges: Vec<String>,

    /// Print per-exchange counts instead of symbols.
    #[arg(long, default_value_t = false)]
    pub counts_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogicArg {
    And,
    Or,
}

#[derive(Debug, Args)]
pub struct ScreenArgs {
    /// Symbols to screen.
    pub symbols: Vec<String>,

    /// Add an exchange's universe to the symbols; rows are tagged with the exchange.
    #[arg(long)]
    pub from_exchange: Vec<String>,

    /// Screen at most this many symbols.
    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub min_price: Option<f64>,

    #[arg(long)]
    pub max_price: Option<f64>,

    #[arg(long)]
    pub min_volume: Option<f64>,

    #[arg(long)]
    pub min_dollar_volume: Option<f64>,

    /// Keep only rows listed on these exchanges.
    #[arg(long)]
    pub exchange: Vec<String>,

    /// Apply the default liquidity thresholds.
    #[arg(long, default_value_t = false)]
    pub liquidity: bool,

    #[arg(long, value_enum, default_value_t = LogicArg::And)]
    pub logic: LogicArg,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_download_with_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pricefetch",
            "download",
            "aapl",
            "MSFT",
            "--start",
            "2024-01-01T00:00:00Z",
            "--end",
            "2024-02-01T00:00:00Z",
            "--no-persist",
            "--log-format",
            "json",
        ])
        .expect("parses");

        assert!(cli.no_persist);
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Download(args) => {
                assert_eq!(args.symbols, vec!["aapl", "MSFT"]);
                assert_eq!(args.interval, "1d");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn universe_defaults_to_nasdaq_and_nyse() {
        let cli = Cli::try_parse_from(["pricefetch", "universe"]).expect("parses");
        match cli.command {
            Command::Universe(args) => assert_eq!(args.exchanges, vec!["NASDAQ", "NYSE"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn db_and_no_persist_conflict() {
        assert!(Cli::try_parse_from(["pricefetch", "--db", "x.duckdb", "--no-persist", "providers"]).is_err());
    }
}
