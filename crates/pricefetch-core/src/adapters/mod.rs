//! Concrete [`PriceProvider`](crate::PriceProvider) implementations.
//!
//! | Adapter | Historical | Latest bar | Quote | Credentials |
//! |---------|------------|------------|-------|-------------|
//! | [`AlpacaProvider`] | yes | 1m only | yes | `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY` |
//! | [`YahooProvider`] | yes | yes | no | none |
//! | [`ScriptedProvider`] | scripted | scripted | scripted | none |
//!
//! HTTP adapters share one status mapping:
//!
//! | Status | Outcome |
//! |--------|---------|
//! | 2xx with rows | `Success` |
//! | 2xx without rows, 404 | `Empty` |
//! | 401, 403 | `AuthError` |
//! | 429 | `RateLimited` (with `Retry-After` seconds) |
//! | anything else, timeouts, bad payloads | `TransientError` |

mod alpaca;
mod scripted;
mod yahoo;

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::{Interval, ProviderId, ProviderOutcome, UtcDateTime};

pub use alpaca::AlpacaProvider;
pub use scripted::{ScriptStep, ScriptedProvider};
pub use yahoo::YahooProvider;

/// Non-success call result that can be re-typed to any payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallFailure {
    RateLimited(Option<Duration>),
    Auth(String),
    Empty,
    Transient(String),
}

impl CallFailure {
    pub(crate) fn into_outcome<T>(self) -> ProviderOutcome<T> {
        match self {
            Self::RateLimited(retry_after) => ProviderOutcome::RateLimited { retry_after },
            Self::Auth(message) => ProviderOutcome::AuthError(message),
            Self::Empty => ProviderOutcome::Empty,
            Self::Transient(message) => ProviderOutcome::TransientError(message),
        }
    }
}

pub(crate) fn classify_failure(provider: &ProviderId, response: &HttpResponse) -> CallFailure {
    let status = response.status;
    if status == 429 || mentions_rate_limit(&response.body) {
        return CallFailure::RateLimited(response.retry_after());
    }

    match status {
        401 | 403 => CallFailure::Auth(format!("{provider} rejected credentials (status {status})")),
        404 => CallFailure::Empty,
        _ => CallFailure::Transient(format!("{provider} returned status {status}")),
    }
}

pub(crate) fn transport_failure(provider: &ProviderId, error: &HttpError) -> CallFailure {
    if error.timed_out() {
        CallFailure::Transient(format!("{provider} timed out: {}", error.message()))
    } else {
        CallFailure::Transient(format!("{provider} transport error: {}", error.message()))
    }
}

/// Executes `request` and decodes a JSON body, mapping every failure onto the outcome contract.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &dyn HttpClient,
    provider: &ProviderId,
    request: HttpRequest,
) -> Result<T, CallFailure> {
    let response = client
        .execute(request)
        .await
        .map_err(|error| transport_failure(provider, &error))?;

    if !response.is_success() {
        return Err(classify_failure(provider, &response));
    }

    serde_json::from_str(&response.body).map_err(|error| {
        CallFailure::Transient(format!("{provider} returned a malformed payload: {error}"))
    })
}

/// Converts a provider's bar-open stamp into the bar-close stamp used by [`crate::Bar`].
///
/// Daily bars are anchored to UTC midnight regardless of the session open hour.
pub(crate) fn close_stamp(open: UtcDateTime, interval: Interval) -> UtcDateTime {
    match interval {
        Interval::OneDay => open.start_of_day().saturating_add(interval.duration()),
        _ => open.saturating_add(interval.duration()),
    }
}

fn mentions_rate_limit(body: &str) -> bool {
    body.to_ascii_lowercase().contains("too many requests")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::http_client::{HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse};

    /// Plays back canned responses and remembers the requests it saw.
    #[derive(Default)]
    pub struct FixtureHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl FixtureHttpClient {
        pub fn with(responses: Vec<Result<HttpResponse, HttpError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("fixture lock")
                .iter()
                .map(|request| request.url.clone())
                .collect()
        }
    }

    impl HttpClient for FixtureHttpClient {
        fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
            self.requests.lock().expect("fixture lock").push(request);
            let next = self
                .responses
                .lock()
                .expect("fixture lock")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::new("no fixture response left")));
            Box::pin(async move { next })
        }
    }
}
