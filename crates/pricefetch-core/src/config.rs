//! Engine configuration.
//!
//! Values come from, in order: built-in defaults, an optional JSON file, then
//! `PRICEFETCH_*` environment variables. [`EngineConfig::load`] runs all three steps and
//! validates the result. Provider credentials are never part of this file.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::Backoff;
use crate::cache::TtlPolicy;
use crate::provider::Capability;
use crate::throttling::ProviderQuota;
use crate::usage::UsageConfig;
use crate::ProviderId;

pub const ENV_MAX_CONCURRENCY: &str = "PRICEFETCH_MAX_CONCURRENCY";
pub const ENV_FAILURE_THRESHOLD: &str = "PRICEFETCH_FAILURE_THRESHOLD";
pub const ENV_CALL_TIMEOUT_MS: &str = "PRICEFETCH_CALL_TIMEOUT_MS";
pub const ENV_LATEST_TTL_SECS: &str = "PRICEFETCH_LATEST_TTL_SECS";
pub const ENV_OPEN_RANGE_TTL_SECS: &str = "PRICEFETCH_OPEN_RANGE_TTL_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {name}='{value}' is not a valid number")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Client-side call budget for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub window_secs: u64,
    pub limit: u32,
}

impl QuotaConfig {
    pub fn to_quota(self) -> ProviderQuota {
        ProviderQuota {
            window: Duration::from_secs(self.window_secs),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Lower ranks are tried first. Ties keep declaration order.
    #[serde(default)]
    pub priority: u32,
    /// Overrides the adapter's declared capabilities when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaConfig>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            capabilities: None,
            enabled: true,
            quota: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed {
        delay_secs: u64,
    },
    Exponential {
        base_secs: u64,
        factor: f64,
        max_secs: u64,
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            base_secs: 30,
            factor: 2.0,
            max_secs: 600,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    pub fn to_backoff(self) -> Backoff {
        match self {
            Self::Fixed { delay_secs } => Backoff::Fixed {
                delay: Duration::from_secs(delay_secs),
            },
            Self::Exponential {
                base_secs,
                factor,
                max_secs,
                jitter,
            } => Backoff::Exponential {
                base: Duration::from_secs(base_secs),
                factor,
                max: Duration::from_secs(max_secs),
                jitter,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub latest_ttl_secs: u64,
    pub open_range_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            latest_ttl_secs: 60,
            open_range_ttl_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub providers: Vec<ProviderConfig>,
    pub failure_threshold: u32,
    pub call_timeout_ms: u64,
    pub max_concurrency: usize,
    pub rate_limit_backoff: BackoffConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig::new("alpaca", 1).with_quota(QuotaConfig {
                    window_secs: 60,
                    limit: 200,
                }),
                ProviderConfig::new("yahoo", 2),
            ],
            failure_threshold: 3,
            call_timeout_ms: 10_000,
            max_concurrency: 8,
            rate_limit_backoff: BackoffConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Defaults or the given file, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| env::var(name).ok())
    }

    /// Applies `PRICEFETCH_*` overrides resolved through `lookup`.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = parse_override(&lookup, ENV_MAX_CONCURRENCY)? {
            self.max_concurrency = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_FAILURE_THRESHOLD)? {
            self.failure_threshold = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_CALL_TIMEOUT_MS)? {
            self.call_timeout_ms = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_LATEST_TTL_SECS)? {
            self.cache.latest_ttl_secs = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_OPEN_RANGE_TTL_SECS)? {
            self.cache.open_range_ttl_secs = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency must be at least 1"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold must be at least 1"));
        }
        if self.call_timeout_ms == 0 {
            return Err(invalid("call_timeout_ms must be at least 1"));
        }

        match self.rate_limit_backoff {
            BackoffConfig::Exponential { factor, .. } if !factor.is_finite() || factor < 1.0 => {
                return Err(invalid("rate_limit_backoff factor must be a finite number >= 1"));
            }
            _ => {}
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(invalid("provider name cannot be empty"));
            }
            let id = ProviderId::parse(&provider.name).map_err(|error| invalid(&error.to_string()))?;
            if !names.insert(id.clone()) {
                return Err(ConfigError::Invalid(format!("provider '{id}' is listed more than once")));
            }
            if let Some(quota) = provider.quota {
                if quota.limit == 0 || quota.window_secs == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "provider '{id}' quota needs a non-zero limit and window"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn usage_config(&self) -> UsageConfig {
        UsageConfig {
            failure_threshold: self.failure_threshold,
            rate_limit_backoff: self.rate_limit_backoff.to_backoff(),
        }
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            open_range_ttl: Duration::from_secs(self.cache.open_range_ttl_secs),
            latest_ttl: Duration::from_secs(self.cache.latest_ttl_secs),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|provider| provider.name == name)
    }
}

fn parse_override<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { name, value: raw })
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_owned())
}
