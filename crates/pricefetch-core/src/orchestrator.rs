//! Failover across providers in priority order.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::provider::{
    Capability, HistoricalRequest, LatestBarRequest, OutcomeKind, PriceProvider, ProviderFuture,
    QuoteRequest,
};
use crate::usage::{
    ProviderDescriptor, ProviderRegistration, SkippedProvider, UsageConfig, UsageError,
    UsageTracker,
};
use crate::{Bar, ProviderId, ProviderOutcome, Quote, Series, Symbol, ValidationError};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One provider call made while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: ProviderId,
    pub outcome: OutcomeKind,
    pub message: Option<String>,
    pub elapsed_ms: u64,
}

/// Every candidate was tried (or skipped) without a success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe_exhaustion(.capability, .symbol, .attempts, .skipped))]
pub struct ExhaustedProvidersError {
    pub capability: Capability,
    pub symbol: Symbol,
    pub attempts: Vec<AttemptRecord>,
    pub skipped: Vec<SkippedProvider>,
}

impl ExhaustedProvidersError {
    /// At least one provider was reached and each one answered `Empty`.
    pub fn all_empty(&self) -> bool {
        !self.attempts.is_empty()
            && self
                .attempts
                .iter()
                .all(|attempt| attempt.outcome == OutcomeKind::Empty)
    }
}

fn describe_exhaustion(
    capability: &Capability,
    symbol: &Symbol,
    attempts: &[AttemptRecord],
    skipped: &[SkippedProvider],
) -> String {
    let mut parts = attempts
        .iter()
        .map(|attempt| format!("{}: {}", attempt.provider, attempt.outcome))
        .collect::<Vec<_>>();
    parts.extend(
        skipped
            .iter()
            .map(|skip| format!("{}: skipped, {}", skip.provider, skip.reason)),
    );

    if parts.is_empty() {
        format!("no provider serves {capability} for {symbol}")
    } else {
        format!(
            "all providers exhausted for {capability} of {symbol} [{}]",
            parts.join("; ")
        )
    }
}

/// Failure of one acquisition request. `Clone` so coalesced callers can share it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error(transparent)]
    Exhausted(#[from] ExhaustedProvidersError),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),
}

/// Payload plus the route that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub payload: T,
    pub provider: ProviderId,
    pub attempts: Vec<AttemptRecord>,
}

/// Routes each request through the usage tracker's candidate list.
pub struct Orchestrator {
    providers: HashMap<ProviderId, Arc<dyn PriceProvider>>,
    tracker: Arc<UsageTracker>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        providers: Vec<Arc<dyn PriceProvider>>,
        tracker: Arc<UsageTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.id().clone(), provider))
            .collect();

        Self {
            providers,
            tracker,
            clock,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Registers providers at ascending priorities in the order given, using their declared
    /// capabilities.
    pub fn with_priorities(
        providers: Vec<Arc<dyn PriceProvider>>,
        config: UsageConfig,
    ) -> Result<Self, UsageError> {
        let registrations = providers
            .iter()
            .zip(1_u32..)
            .map(|(provider, priority)| {
                ProviderRegistration::new(provider.id().clone(), provider.capabilities(), priority)
            })
            .collect();
        let tracker = UsageTracker::new(registrations, config)?;

        Ok(Self::new(providers, Arc::new(tracker), Arc::new(SystemClock)))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn provider_report(&self) -> Vec<ProviderDescriptor> {
        self.tracker.snapshots()
    }

    /// Bars for the request range. When every reached provider answered `Empty` the result
    /// is an empty series rather than an error.
    pub async fn fetch_historical(&self, request: &HistoricalRequest) -> Result<Series, AcquireError> {
        match self.route_historical(request).await {
            Ok(routed) => Ok(routed.payload),
            Err(exhausted) if exhausted.all_empty() => {
                Ok(Series::empty(request.symbol.clone(), request.interval))
            }
            Err(exhausted) => Err(exhausted.into()),
        }
    }

    pub async fn route_historical(
        &self,
        request: &HistoricalRequest,
    ) -> Result<Routed<Series>, ExhaustedProvidersError> {
        let req = request.clone();
        self.route(Capability::HistoricalBars, &request.symbol, move |provider| {
            provider.fetch_historical(req.clone())
        })
        .await
    }

    pub async fn fetch_latest_bar(&self, request: &LatestBarRequest) -> Result<Bar, AcquireError> {
        Ok(self.route_latest_bar(request).await?.payload)
    }

    pub async fn route_latest_bar(
        &self,
        request: &LatestBarRequest,
    ) -> Result<Routed<Bar>, ExhaustedProvidersError> {
        let req = request.clone();
        self.route(Capability::LatestBar, &request.symbol, move |provider| {
            provider.fetch_latest_bar(req.clone())
        })
        .await
    }

    pub async fn fetch_quote(&self, request: &QuoteRequest) -> Result<Quote, AcquireError> {
        Ok(self.route_quote(request).await?.payload)
    }

    pub async fn route_quote(
        &self,
        request: &QuoteRequest,
    ) -> Result<Routed<Quote>, ExhaustedProvidersError> {
        let req = request.clone();
        self.route(Capability::Quote, &request.symbol, move |provider| {
            provider.fetch_quote(req.clone())
        })
        .await
    }

    async fn route<T, F>(
        &self,
        capability: Capability,
        symbol: &Symbol,
        mut invoke: F,
    ) -> Result<Routed<T>, ExhaustedProvidersError>
    where
        F: for<'a> FnMut(&'a dyn PriceProvider) -> ProviderFuture<'a, T>,
    {
        let plan = self.tracker.candidates(capability, self.clock.now());
        let mut attempts = Vec::with_capacity(plan.candidates.len());

        for provider_id in plan.candidates {
            let Some(provider) = self.providers.get(&provider_id) else {
                debug!(provider = %provider_id, "registered provider has no adapter");
                continue;
            };

            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.call_timeout, invoke(provider.as_ref())).await {
                Ok(outcome) => outcome,
                Err(_) => ProviderOutcome::TransientError(format!(
                    "{provider_id} did not answer within {}ms",
                    self.call_timeout.as_millis()
                )),
            };

            self.tracker.record(&provider_id, &outcome, self.clock.now());
            debug!(
                provider = %provider_id,
                symbol = %symbol,
                capability = %capability,
                outcome = %outcome.kind(),
                "provider attempt"
            );

            let record = AttemptRecord {
                provider: provider_id.clone(),
                outcome: outcome.kind(),
                message: outcome.detail(),
                elapsed_ms: elapsed_ms(started),
            };

            match outcome {
                ProviderOutcome::Success(payload) => {
                    if !attempts.is_empty() {
                        info!(
                            provider = %provider_id,
                            symbol = %symbol,
                            failed_attempts = attempts.len(),
                            "failover succeeded"
                        );
                    }
                    attempts.push(record);
                    return Ok(Routed {
                        payload,
                        provider: provider_id,
                        attempts,
                    });
                }
                ProviderOutcome::RateLimited { .. }
                | ProviderOutcome::AuthError(_)
                | ProviderOutcome::Empty
                | ProviderOutcome::TransientError(_) => attempts.push(record),
            }
        }

        Err(ExhaustedProvidersError {
            capability,
            symbol: symbol.clone(),
            attempts,
            skipped: plan.skipped,
        })
    }
}

impl Display for AttemptRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({}ms)", self.provider, self.outcome, self.elapsed_ms)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
