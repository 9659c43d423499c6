//! Assembles providers, usage tracking, routing and caching into one [`Engine`].

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{AlpacaProvider, YahooProvider};
use crate::batch::{BatchDownloader, BatchReport, BatchRequest, ProgressSink};
use crate::cache::{CacheGateway, GatewayStats, MemorySeriesStore, Resolved, SeriesStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, EngineConfig, ProviderConfig};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::orchestrator::{AcquireError, Orchestrator};
use crate::provider::{CapabilitySet, PriceProvider, QuoteRequest};
use crate::throttling::ThrottledProvider;
use crate::usage::{ProviderDescriptor, ProviderRegistration, UsageError, UsageTracker};
use crate::{Interval, ProviderId, Quote, Symbol, UtcDateTime, ValidationError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unknown provider '{0}' (built-in providers: alpaca, yahoo)")]
    UnknownProvider(String),
}

/// Builder for [`Engine`].
///
/// Configured providers are resolved by name: a provider supplied through
/// [`EngineBuilder::with_provider`] wins, otherwise the built-in adapter of that name is
/// created. Supplied providers the config does not mention are appended after the
/// configured ones.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn SeriesStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    providers: Vec<Arc<dyn PriceProvider>>,
    alpaca_api_key: Option<String>,
    alpaca_secret_key: Option<String>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            store: None,
            http_client: None,
            providers: Vec::new(),
            alpaca_api_key: None,
            alpaca_secret_key: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cache backend. Defaults to an in-memory store.
    pub fn with_store(mut self, store: Arc<dyn SeriesStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn PriceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Reads Alpaca credentials from the environment.
    pub fn with_real_clients(mut self) -> Self {
        self.alpaca_api_key = env::var("PRICEFETCH_ALPACA_API_KEY")
            .or_else(|_| env::var("ALPACA_API_KEY"))
            .ok();
        self.alpaca_secret_key = env::var("PRICEFETCH_ALPACA_SECRET_KEY")
            .or_else(|_| env::var("ALPACA_SECRET_KEY"))
            .ok();
        self
    }

    pub fn with_alpaca_keys(mut self, api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.alpaca_api_key = Some(api_key.into());
        self.alpaca_secret_key = Some(secret_key.into());
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;

        let http_client = self
            .http_client
            .clone()
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let mut supplied: HashMap<ProviderId, Arc<dyn PriceProvider>> = self
            .providers
            .iter()
            .map(|provider| (provider.id().clone(), Arc::clone(provider)))
            .collect();

        let mut providers: Vec<Arc<dyn PriceProvider>> = Vec::new();
        let mut registrations = Vec::new();

        for entry in &self.config.providers {
            let id = ProviderId::parse(&entry.name)?;
            let supplied_provider = supplied.remove(&id);
            if !entry.enabled {
                info!(provider = %id, "provider disabled by config");
                continue;
            }

            let provider = match supplied_provider {
                Some(provider) => provider,
                None => match self.builtin(&id, Arc::clone(&http_client))? {
                    Some(provider) => provider,
                    None => continue,
                },
            };

            let (provider, capabilities) = apply_entry(provider, entry);
            registrations.push(ProviderRegistration::new(id, capabilities, entry.priority));
            providers.push(provider);
        }

        let mut next_priority = self
            .config
            .providers
            .iter()
            .map(|entry| entry.priority)
            .max()
            .unwrap_or(0);
        for provider in &self.providers {
            if supplied.remove(provider.id()).is_none() {
                continue;
            }
            next_priority = next_priority.saturating_add(1);
            registrations.push(ProviderRegistration::new(
                provider.id().clone(),
                provider.capabilities(),
                next_priority,
            ));
            providers.push(Arc::clone(provider));
        }

        let tracker = Arc::new(UsageTracker::new(registrations, self.config.usage_config())?);
        let names: Vec<String> = tracker.providers().iter().map(ToString::to_string).collect();
        if names.is_empty() {
            warn!("engine has no usable providers; every request will be exhausted");
        }
        info!(providers = ?names, "engine ready");

        let orchestrator = Arc::new(
            Orchestrator::new(providers, tracker, Arc::clone(&self.clock))
                .with_call_timeout(self.config.call_timeout()),
        );
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySeriesStore::new()));
        let gateway = Arc::new(CacheGateway::new(store, self.config.ttl_policy(), self.clock));
        let downloader = BatchDownloader::new(Arc::clone(&orchestrator), Arc::clone(&gateway));

        Ok(Engine {
            config: self.config,
            orchestrator,
            gateway,
            downloader,
        })
    }

    fn builtin(
        &self,
        id: &ProviderId,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Option<Arc<dyn PriceProvider>>, EngineError> {
        match id.as_str() {
            "alpaca" => match (&self.alpaca_api_key, &self.alpaca_secret_key) {
                (Some(api_key), Some(secret_key)) => Ok(Some(Arc::new(AlpacaProvider::new(
                    http_client,
                    api_key.clone(),
                    secret_key.clone(),
                )))),
                _ => {
                    warn!(provider = "alpaca", "credentials not set; provider skipped");
                    Ok(None)
                }
            },
            "yahoo" => Ok(Some(Arc::new(
                YahooProvider::new(http_client).with_clock(Arc::clone(&self.clock)),
            ))),
            other => Err(EngineError::UnknownProvider(other.to_owned())),
        }
    }
}

fn apply_entry(
    provider: Arc<dyn PriceProvider>,
    entry: &ProviderConfig,
) -> (Arc<dyn PriceProvider>, CapabilitySet) {
    let capabilities = entry
        .capabilities
        .as_deref()
        .map_or_else(|| provider.capabilities(), CapabilitySet::from_list);
    let provider = match entry.quota {
        Some(quota) => Arc::new(ThrottledProvider::new(provider, quota.to_quota())) as Arc<dyn PriceProvider>,
        None => provider,
    };
    (provider, capabilities)
}

/// Entry point for price acquisition.
pub struct Engine {
    config: EngineConfig,
    orchestrator: Arc<Orchestrator>,
    gateway: Arc<CacheGateway<AcquireError>>,
    downloader: BatchDownloader,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Cached historical bars for `[start, end)`.
    pub async fn historical(
        &self,
        symbol: Symbol,
        interval: Interval,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Resolved, AcquireError> {
        let request = BatchRequest::Historical {
            interval,
            start,
            end,
        };
        self.downloader.fetch_one(symbol, &request).await
    }

    /// Cached latest bar, returned as a one-bar series.
    pub async fn latest_bar(&self, symbol: Symbol, interval: Interval) -> Result<Resolved, AcquireError> {
        self.downloader
            .fetch_one(symbol, &BatchRequest::latest(interval))
            .await
    }

    /// Quotes are never cached.
    pub async fn quote(&self, symbol: Symbol) -> Result<Quote, AcquireError> {
        self.orchestrator.fetch_quote(&QuoteRequest::new(symbol)).await
    }

    pub async fn download_batch(
        &self,
        symbols: &[Symbol],
        request: &BatchRequest,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        self.downloader
            .download_batch(symbols, request, self.config.max_concurrency, progress, cancel)
            .await
    }

    pub fn provider_report(&self) -> Vec<ProviderDescriptor> {
        self.orchestrator.provider_report()
    }

    /// Clears a consecutive-failure trip. Rejected credentials stay disabled.
    pub fn reinstate(&self, provider: &ProviderId) -> bool {
        self.orchestrator.tracker().reinstate(provider)
    }

    pub fn cache_stats(&self) -> GatewayStats {
        self.gateway.stats()
    }
}
