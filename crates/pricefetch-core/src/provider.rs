//! Provider contract: capability sets, requests, and typed call outcomes.
//!
//! Every upstream data source is wrapped in a [`PriceProvider`]. A provider never panics or
//! returns an untyped error across this boundary; each call resolves to a
//! [`ProviderOutcome`] that the orchestrator matches on.
//!
//! | Outcome | Meaning | Orchestrator reaction |
//! |---------|---------|-----------------------|
//! | `Success` | Payload returned | Return immediately |
//! | `RateLimited` | Upstream refused for now | Mark window, try next provider |
//! | `AuthError` | Credentials rejected | Disable provider for the run, try next |
//! | `Empty` | Reached, but no data | Try next provider |
//! | `TransientError` | Network/5xx/timeout | Count toward trip threshold, try next |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Bar, Interval, Quote, Series, Symbol, UtcDateTime, ValidationError};

/// Configured provider name, such as `alpaca` or `yahoo`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        let valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');

        if !valid {
            return Err(ValidationError::InvalidProviderName {
                value: input.to_owned(),
            });
        }

        Ok(Self(normalized))
    }

    pub(crate) fn builtin(name: &'static str) -> Self {
        Self(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.0
    }
}

/// Kind of data a provider can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    HistoricalBars,
    LatestBar,
    Quote,
}

impl Capability {
    pub const ALL: [Self; 3] = [Self::HistoricalBars, Self::LatestBar, Self::Quote];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HistoricalBars => "historical_bars",
            Self::LatestBar => "latest_bar",
            Self::Quote => "quote",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "historical_bars" | "historical" => Ok(Self::HistoricalBars),
            "latest_bar" | "latest" => Ok(Self::LatestBar),
            "quote" => Ok(Self::Quote),
            other => Err(ValidationError::InvalidCapability {
                value: other.to_owned(),
            }),
        }
    }
}

/// Capabilities declared by one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub historical_bars: bool,
    pub latest_bar: bool,
    pub quote: bool,
}

impl CapabilitySet {
    pub const fn new(historical_bars: bool, latest_bar: bool, quote: bool) -> Self {
        Self {
            historical_bars,
            latest_bar,
            quote,
        }
    }

    pub const fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn from_list(capabilities: &[Capability]) -> Self {
        let mut set = Self::default();
        for capability in capabilities {
            match capability {
                Capability::HistoricalBars => set.historical_bars = true,
                Capability::LatestBar => set.latest_bar = true,
                Capability::Quote => set.quote = true,
            }
        }
        set
    }

    pub const fn supports(self, capability: Capability) -> bool {
        match capability {
            Capability::HistoricalBars => self.historical_bars,
            Capability::LatestBar => self.latest_bar,
            Capability::Quote => self.quote,
        }
    }

    pub fn to_list(self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|capability| self.supports(*capability))
            .collect()
    }
}

/// Bars for `[start, end)` at one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalRequest {
    pub symbol: Symbol,
    pub interval: Interval,
    pub start: UtcDateTime,
    pub end: UtcDateTime,
}

impl HistoricalRequest {
    pub fn new(
        symbol: Symbol,
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

        Ok(Self {
            symbol,
            interval,
            start,
            end,
        })
    }
}

/// Most recent completed bar at one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestBarRequest {
    pub symbol: Symbol,
    pub interval: Interval,
}

impl LatestBarRequest {
    pub fn new(symbol: Symbol, interval: Interval) -> Self {
        Self { symbol, interval }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub symbol: Symbol,
}

impl QuoteRequest {
    pub fn new(symbol: Symbol) -> Self {
        Self { symbol }
    }
}

/// Typed result of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome<T> {
    Success(T),
    RateLimited { retry_after: Option<Duration> },
    AuthError(String),
    Empty,
    TransientError(String),
}

impl<T> ProviderOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::RateLimited { .. } => OutcomeKind::RateLimited,
            Self::AuthError(_) => OutcomeKind::AuthError,
            Self::Empty => OutcomeKind::Empty,
            Self::TransientError(_) => OutcomeKind::TransientError,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProviderOutcome<U> {
        match self {
            Self::Success(value) => ProviderOutcome::Success(f(value)),
            Self::RateLimited { retry_after } => ProviderOutcome::RateLimited { retry_after },
            Self::AuthError(message) => ProviderOutcome::AuthError(message),
            Self::Empty => ProviderOutcome::Empty,
            Self::TransientError(message) => ProviderOutcome::TransientError(message),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Human-readable detail for non-success outcomes.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::RateLimited {
                retry_after: Some(wait),
            } => Some(format!("rate limited, retry after {}s", wait.as_secs())),
            Self::RateLimited { retry_after: None } => Some(String::from("rate limited")),
            Self::AuthError(message) | Self::TransientError(message) => Some(message.clone()),
            Self::Empty => Some(String::from("no data returned")),
        }
    }
}

/// Payload-free discriminant of [`ProviderOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    RateLimited,
    AuthError,
    Empty,
    TransientError,
}

impl OutcomeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::AuthError => "auth_error",
            Self::Empty => "empty",
            Self::TransientError => "transient_error",
        }
    }
}

impl Display for OutcomeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = ProviderOutcome<T>> + Send + 'a>>;

/// Adapter contract implemented by every upstream data source.
///
/// Methods for undeclared capabilities fall back to a transient error; the orchestrator
/// never routes to them unless configuration overrides the declaration.
pub trait PriceProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn capabilities(&self) -> CapabilitySet;

    fn fetch_historical<'a>(&'a self, request: HistoricalRequest) -> ProviderFuture<'a, Series> {
        let _ = request;
        unsupported(self.id(), Capability::HistoricalBars)
    }

    fn fetch_latest_bar<'a>(&'a self, request: LatestBarRequest) -> ProviderFuture<'a, Bar> {
        let _ = request;
        unsupported(self.id(), Capability::LatestBar)
    }

    fn fetch_quote<'a>(&'a self, request: QuoteRequest) -> ProviderFuture<'a, Quote> {
        let _ = request;
        unsupported(self.id(), Capability::Quote)
    }
}

fn unsupported<'a, T: 'a>(id: &ProviderId, capability: Capability) -> ProviderFuture<'a, T> {
    let message = format!("provider '{id}' does not implement {capability}");
    Box::pin(async move { ProviderOutcome::TransientError(message) })
}
