use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::http_client::{HttpClient, HttpRequest};

pub type ListingFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>, ListingError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    #[error("no listing source for exchange '{0}'")]
    UnsupportedExchange(String),
    #[error("listing request for {exchange} failed: {message}")]
    Transport { exchange: String, message: String },
    #[error("listing request for {exchange} returned status {status}")]
    Status { exchange: String, status: u16 },
    #[error("listing payload for {exchange} is malformed: {message}")]
    Malformed { exchange: String, message: String },
}

/// Raw, unsanitized ticker lists per exchange code.
pub trait ListingSource: Send + Sync {
    /// `exchange` is already upper-cased.
    fn fetch_raw_listing<'a>(&'a self, exchange: &'a str) -> ListingFuture<'a>;
}

const NASDAQ_SCREENER_URL: &str =
    "https://api.nasdaq.com/api/screener/stocks?tableonly=true&limit=25000&download=true";
const NYSE_LISTING_URL: &str = "https://dumbstockapi.com/stock?exchanges=NYSE";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) pricefetch/0.1";

const CURATED_AMEX: &[&str] = &[
    "SPY", "QQQ", "IWM", "EFA", "VTI", "GLD", "SLV", "TLT", "HYG", "LQD", "XLF", "XLE", "XLK",
    "XLV", "XLI", "XLP", "XLY", "XLU", "XLRE", "XLB", "DIA", "MDY", "VEA", "VWO",
];

#[derive(Debug, Deserialize)]
struct NasdaqEnvelope {
    data: NasdaqData,
}

#[derive(Debug, Deserialize)]
struct NasdaqData {
    table: NasdaqTable,
}

#[derive(Debug, Deserialize)]
struct NasdaqTable {
    rows: Vec<NasdaqRow>,
}

#[derive(Debug, Deserialize)]
struct NasdaqRow {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct NyseRow {
    ticker: String,
}

/// NASDAQ screener and NYSE listing endpoints, plus a curated AMEX ETF list.
#[derive(Clone)]
pub struct HttpListingSource {
    http_client: Arc<dyn HttpClient>,
    nasdaq_url: String,
    nyse_url: String,
    timeout_ms: u64,
}

impl HttpListingSource {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            nasdaq_url: NASDAQ_SCREENER_URL.to_owned(),
            nyse_url: NYSE_LISTING_URL.to_owned(),
            timeout_ms: 30_000,
        }
    }

    pub fn with_nasdaq_url(mut self, url: impl Into<String>) -> Self {
        self.nasdaq_url = url.into();
        self
    }

    pub fn with_nyse_url(mut self, url: impl Into<String>) -> Self {
        self.nyse_url = url.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    async fn fetch_body(&self, exchange: &str, url: &str) -> Result<String, ListingError> {
        let request = HttpRequest::get(url)
            .with_header("accept", "application/json")
            .with_header("user-agent", USER_AGENT)
            .with_timeout_ms(self.timeout_ms);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| ListingError::Transport {
                exchange: exchange.to_owned(),
                message: error.message().to_owned(),
            })?;

        if !response.is_success() {
            return Err(ListingError::Status {
                exchange: exchange.to_owned(),
                status: response.status,
            });
        }
        Ok(response.body)
    }

    async fn fetch_nasdaq(&self) -> Result<Vec<String>, ListingError> {
        let body = self.fetch_body("NASDAQ", &self.nasdaq_url).await?;
        let envelope: NasdaqEnvelope = serde_json::from_str(&body).map_err(|error| malformed("NASDAQ", &error))?;
        Ok(envelope.data.table.rows.into_iter().map(|row| row.symbol).collect())
    }

    async fn fetch_nyse(&self) -> Result<Vec<String>, ListingError> {
        let body = self.fetch_body("NYSE", &self.nyse_url).await?;
        let rows: Vec<NyseRow> = serde_json::from_str(&body).map_err(|error| malformed("NYSE", &error))?;
        Ok(rows.into_iter().map(|row| row.ticker).collect())
    }
}

impl ListingSource for HttpListingSource {
    fn fetch_raw_listing<'a>(&'a self, exchange: &'a str) -> ListingFuture<'a> {
        Box::pin(async move {
            match exchange {
                "NASDAQ" => self.fetch_nasdaq().await,
                "NYSE" => self.fetch_nyse().await,
                "AMEX" => Ok(CURATED_AMEX.iter().map(|symbol| (*symbol).to_owned()).collect()),
                other => Err(ListingError::UnsupportedExchange(other.to_owned())),
            }
        })
    }
}

fn malformed(exchange: &str, error: &serde_json::Error) -> ListingError {
    ListingError::Malformed {
        exchange: exchange.to_owned(),
        message: error.to_string(),
    }
}

/// In-memory listings keyed by upper-cased exchange code.
#[derive(Debug, Default)]
pub struct StaticListingSource {
    listings: HashMap<String, Result<Vec<String>, ListingError>>,
    fetches: AtomicUsize,
}

impl StaticListingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing<I, S>(mut self, exchange: &str, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.listings.insert(
            exchange.to_ascii_uppercase(),
            Ok(symbols.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn with_failure(mut self, exchange: &str, error: ListingError) -> Self {
        self.listings.insert(exchange.to_ascii_uppercase(), Err(error));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl ListingSource for StaticListingSource {
    fn fetch_raw_listing<'a>(&'a self, exchange: &'a str) -> ListingFuture<'a> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let listing = self
            .listings
            .get(exchange)
            .cloned()
            .unwrap_or_else(|| Err(ListingError::UnsupportedExchange(exchange.to_owned())));
        Box::pin(async move { listing })
    }
}
