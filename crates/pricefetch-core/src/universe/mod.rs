//! # Ticker Universe
//!
//! Exchange ticker lists fetched through a [`ListingSource`], sanitized into [`Symbol`]s and
//! cached per exchange until invalidated.
//!
//! Sanitization keeps entries that, once trimmed and upper-cased, are at most six
//! characters of ASCII letters and digits with at most one `.` share-class separator, do
//! not end in a test suffix (`TEST`, `TEMP`, `OLD`) and parse as a [`Symbol`].

mod listing;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub use listing::{HttpListingSource, ListingError, ListingFuture, ListingSource, StaticListingSource};

use crate::clock::{Clock, SystemClock};
use crate::filters::canonical_exchange;
use crate::{Symbol, UtcDateTime};

const MAX_LISTED_SYMBOL_LEN: usize = 6;
const TEST_SUFFIXES: [&str; 3] = ["TEST", "TEMP", "OLD"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniverseError {
    #[error("exchange code cannot be empty")]
    EmptyExchange,
    #[error(transparent)]
    Listing(#[from] ListingError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniverseSnapshot {
    pub exchange: String,
    pub symbols: Vec<Symbol>,
    pub refreshed_at: UtcDateTime,
    /// Raw entries rejected by sanitization.
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeFailure {
    pub exchange: String,
    pub error: String,
}

/// Union of several exchanges' lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CombinedUniverse {
    pub symbols: Vec<Symbol>,
    /// Per-exchange list sizes before cross-exchange dedup, in argument order.
    pub per_exchange: Vec<(String, usize)>,
    pub failures: Vec<ExchangeFailure>,
}

impl CombinedUniverse {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct TickerUniverse {
    source: Arc<dyn ListingSource>,
    clock: Arc<dyn Clock>,
    snapshots: Mutex<HashMap<String, UniverseSnapshot>>,
}

impl TickerUniverse {
    pub fn new(source: Arc<dyn ListingSource>) -> Self {
        Self {
            source,
            clock: Arc::new(SystemClock),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cached list for the exchange, fetched on first use.
    pub async fn get_exchange_tickers(&self, exchange: &str) -> Result<Vec<Symbol>, UniverseError> {
        let code = exchange_code(exchange)?;
        if let Some(snapshot) = self.snapshot(&code) {
            return Ok(snapshot.symbols);
        }
        Ok(self.refresh(&code).await?.symbols)
    }

    /// Refetches the exchange and replaces its cached snapshot.
    pub async fn refresh(&self, exchange: &str) -> Result<UniverseSnapshot, UniverseError> {
        let code = exchange_code(exchange)?;
        let raw = self.source.fetch_raw_listing(&code).await?;
        let symbols = sanitize_listing(&raw);
        let snapshot = UniverseSnapshot {
            dropped: raw.len() - symbols.len(),
            exchange: code.clone(),
            symbols,
            refreshed_at: self.clock.now(),
        };

        info!(
            exchange = %code,
            symbols = snapshot.symbols.len(),
            dropped = snapshot.dropped,
            "universe refreshed"
        );
        self.snapshots
            .lock()
            .expect("universe snapshot lock is not poisoned")
            .insert(code, snapshot.clone());
        Ok(snapshot)
    }

    pub fn snapshot(&self, exchange: &str) -> Option<UniverseSnapshot> {
        let code = exchange_code(exchange).ok()?;
        self.snapshots
            .lock()
            .expect("universe snapshot lock is not poisoned")
            .get(&code)
            .cloned()
    }

    /// Returns whether a snapshot was dropped.
    pub fn invalidate(&self, exchange: &str) -> bool {
        let Ok(code) = exchange_code(exchange) else {
            return false;
        };
        self.snapshots
            .lock()
            .expect("universe snapshot lock is not poisoned")
            .remove(&code)
            .is_some()
    }

    pub fn invalidate_all(&self) {
        self.snapshots
            .lock()
            .expect("universe snapshot lock is not poisoned")
            .clear();
    }

    /// Resolves every exchange concurrently and merges them in argument order.
    pub async fn get_combined_universe<S: AsRef<str>>(&self, exchanges: &[S]) -> CombinedUniverse {
        let mut codes: Vec<String> = Vec::new();
        let mut combined = CombinedUniverse::default();
        for exchange in exchanges {
            match exchange_code(exchange.as_ref()) {
                Ok(code) if !codes.contains(&code) => codes.push(code),
                Ok(_) => {}
                Err(error) => combined.failures.push(ExchangeFailure {
                    exchange: exchange.as_ref().to_owned(),
                    error: error.to_string(),
                }),
            }
        }

        let results = join_all(codes.iter().map(|code| self.get_exchange_tickers(code))).await;

        let mut seen = HashSet::new();
        for (code, result) in codes.into_iter().zip(results) {
            match result {
                Ok(symbols) => {
                    combined.per_exchange.push((code, symbols.len()));
                    combined
                        .symbols
                        .extend(symbols.into_iter().filter(|symbol| seen.insert(symbol.clone())));
                }
                Err(error) => {
                    warn!(exchange = %code, error = %error, "universe fetch failed");
                    combined.failures.push(ExchangeFailure {
                        exchange: code,
                        error: error.to_string(),
                    });
                }
            }
        }

        combined
    }
}

/// Applies listing sanitization and dedups, preserving first-seen order.
pub fn sanitize_listing<S: AsRef<str>>(raw: &[S]) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|entry| sanitize_entry(entry.as_ref()))
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

fn sanitize_entry(entry: &str) -> Option<Symbol> {
    let candidate = entry.trim().to_ascii_uppercase();
    if candidate.is_empty() || candidate.len() > MAX_LISTED_SYMBOL_LEN {
        return None;
    }
    if candidate.matches('.').count() > 1 || candidate.ends_with('.') {
        return None;
    }
    if !candidate.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '.') {
        return None;
    }
    // Suffix match also drops real tickers such as GOLD.
    if TEST_SUFFIXES.iter().any(|suffix| candidate.ends_with(suffix)) {
        return None;
    }
    Symbol::parse(&candidate).ok()
}

fn exchange_code(exchange: &str) -> Result<String, UniverseError> {
    let code = canonical_exchange(exchange);
    if code.is_empty() {
        Err(UniverseError::EmptyExchange)
    } else {
        Ok(code)
    }
}
