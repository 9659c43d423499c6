//! # Pricefetch Core
//!
//! Resilient acquisition of equity price bars from several upstream providers.
//!
//! ## Overview
//!
//! - **Provider contract** with a tagged outcome per call (success, rate limited, auth
//!   error, empty, transient error)
//! - **Usage tracking** that trips providers after auth failures or repeated transient
//!   errors and backs off rate-limited ones
//! - **Failover routing** in priority order across providers that declare a capability
//! - **Caching** with immutable closed ranges, TTL'd open ranges and latest bars, covering
//!   range reuse and single-flight coalescing per key
//! - **Batch downloads** over a bounded worker pool with progress and cancellation
//! - **Screening filters** and **exchange ticker universes**
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Alpaca, Yahoo and scripted providers |
//! | [`batch`] | Bounded-concurrency batch downloader |
//! | [`cache`] | Cache keys, TTL policy, stores and the coalescing gateway |
//! | [`config`] | Engine configuration and environment overrides |
//! | [`domain`] | Bars, series, quotes, symbols, intervals, timestamps |
//! | [`engine`] | Engine assembly |
//! | [`filters`] | Screening filters and pipeline |
//! | [`orchestrator`] | Priority failover across providers |
//! | [`provider`] | Provider trait, capabilities, requests and outcomes |
//! | [`throttling`] | Client-side provider quotas |
//! | [`universe`] | Exchange ticker lists |
//! | [`usage`] | Per-provider usage state and availability |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pricefetch_core::{Engine, Interval, Symbol, UtcDateTime};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder().with_real_clients().build()?;
//! let resolved = engine
//!     .historical(
//!         Symbol::parse("AAPL")?,
//!         Interval::OneDay,
//!         UtcDateTime::parse("2024-01-01T00:00:00Z")?,
//!         UtcDateTime::parse("2024-02-01T00:00:00Z")?,
//!     )
//!     .await?;
//! println!("{} bars ({:?})", resolved.series.len(), resolved.origin);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Batch Downloader │── semaphore-gated tokio tasks
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │  Cache Gateway   │────▶│   SeriesStore    │
//! └────────┬─────────┘     └──────────────────┘
//!          ▼ miss
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Orchestrator   │────▶│  Usage Tracker   │
//! └────────┬─────────┘     └──────────────────┘
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │  PriceProvider   │────▶│   HttpClient     │
//! └──────────────────┘     └──────────────────┘
//! ```
//!
//! ## Security
//!
//! - Provider credentials are read from environment variables only and never logged
//! - Cache queries are parameterized

pub mod adapters;
pub mod backoff;
pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod filters;
pub mod http_client;
pub mod orchestrator;
pub mod provider;
pub mod throttling;
pub mod universe;
pub mod usage;

pub use adapters::{AlpacaProvider, ScriptStep, ScriptedProvider, YahooProvider};

pub use backoff::Backoff;

pub use batch::{
    BatchDownloader, BatchEntry, BatchReport, BatchRequest, BatchSummary, FetchFailure,
    PartialBatchFailure, ProgressEvent, ProgressSink,
};

pub use cache::{
    CacheGateway, CacheKey, CacheOrigin, CachedSeries, GatewayStats, MemorySeriesStore, Resolved,
    SeriesStore, StoreError, TtlPolicy, WarehouseSeriesStore,
};

pub use clock::{Clock, ManualClock, SystemClock};

pub use config::{BackoffConfig, CacheConfig, ConfigError, EngineConfig, ProviderConfig, QuotaConfig};

pub use domain::{Bar, Interval, Quote, Series, Symbol, UtcDateTime};

pub use engine::{Engine, EngineBuilder, EngineError};

pub use error::{CoreError, ValidationError};

pub use filters::{
    canonical_sector, Column, CompositeFilter, ExchangeFilter, FilterError, FilterPipeline,
    FilterResult, LiquidityFilter, Logic, MarketCapCategory, MatchMode, MetricsRow, MetricsTable,
    PipelineResult, RangeFilter, SectorFilter, StringMatchFilter, SymbolFilter, TextColumn,
};

pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient,
};

pub use orchestrator::{AcquireError, AttemptRecord, ExhaustedProvidersError, Orchestrator, Routed};

pub use provider::{
    Capability, CapabilitySet, HistoricalRequest, LatestBarRequest, OutcomeKind, PriceProvider,
    ProviderFuture, ProviderId, ProviderOutcome, QuoteRequest,
};

pub use throttling::{ProviderQuota, ThrottledProvider};

pub use universe::{
    sanitize_listing, CombinedUniverse, ExchangeFailure, HttpListingSource, ListingError,
    ListingSource, StaticListingSource, TickerUniverse, UniverseError, UniverseSnapshot,
};

pub use usage::{
    CandidatePlan, ProviderDescriptor, ProviderRegistration, SkipReason, SkippedProvider,
    Unavailability, UsageConfig, UsageError, UsageStats, UsageTracker,
};

// Warehouse (re-exported from pricefetch-warehouse)
pub use pricefetch_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
