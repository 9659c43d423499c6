use std::sync::Arc;

use serde::Deserialize;

use crate::adapters::{close_stamp, get_json, CallFailure};
use crate::clock::{Clock, SystemClock};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{CapabilitySet, HistoricalRequest, LatestBarRequest, PriceProvider, ProviderFuture};
use crate::{Bar, Interval, ProviderId, ProviderOutcome, Series, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance chart API adapter. Keyless; no quote capability.
#[derive(Clone)]
pub struct YahooProvider {
    id: ProviderId,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    base_url: String,
    timeout_ms: u64,
}

impl YahooProvider {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            id: ProviderId::builtin("yahoo"),
            http_client,
            clock: Arc::new(SystemClock),
            base_url: String::from(DEFAULT_BASE_URL),
            timeout_ms: 10_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    async fn chart(&self, symbol: &Symbol, interval: Interval, window: &str) -> Result<Series, CallFailure> {
        let url = format!(
            "{}/v8/finance/chart/{}?interval={}&includePrePost=false&events=history&{window}",
            self.base_url,
            urlencoding::encode(symbol.as_str()),
            chart_interval(interval),
        );
        let request = HttpRequest::get(url)
            .with_header("accept", "application/json")
            .with_timeout_ms(self.timeout_ms);

        let envelope: ChartEnvelope = get_json(self.http_client.as_ref(), &self.id, request).await?;
        envelope.into_series(symbol, interval)
    }

    async fn historical(&self, request: &HistoricalRequest) -> Result<Series, CallFailure> {
        let step = request.interval.duration();
        let window = format!(
            "period1={}&period2={}",
            request.start.saturating_sub(step).unix_timestamp(),
            request.end.saturating_sub(step).unix_timestamp(),
        );
        let series = self.chart(&request.symbol, request.interval, &window).await?;
        Ok(series.slice(request.start, request.end))
    }

    async fn latest_bar(&self, request: &LatestBarRequest) -> Result<Bar, CallFailure> {
        let window = format!("range={}", latest_range(request.interval));
        let series = self.chart(&request.symbol, request.interval, &window).await?;

        // The trailing bar of an open session is still forming; only completed bars count.
        let now = self.clock.now();
        series
            .bars()
            .iter()
            .rev()
            .find(|bar| bar.ts <= now)
            .cloned()
            .ok_or(CallFailure::Empty)
    }
}

impl PriceProvider for YahooProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, true, false)
    }

    fn fetch_historical<'a>(&'a self, request: HistoricalRequest) -> ProviderFuture<'a, Series> {
        Box::pin(async move {
            match self.historical(&request).await {
                Ok(series) if series.is_empty() => ProviderOutcome::Empty,
                Ok(series) => ProviderOutcome::Success(series),
                Err(failure) => failure.into_outcome(),
            }
        })
    }

    fn fetch_latest_bar<'a>(&'a self, request: LatestBarRequest) -> ProviderFuture<'a, Bar> {
        Box::pin(async move {
            self.latest_bar(&request)
                .await
                .map_or_else(CallFailure::into_outcome, ProviderOutcome::Success)
        })
    }
}

fn chart_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1m",
        Interval::FiveMinutes => "5m",
        Interval::FifteenMinutes => "15m",
        Interval::OneHour => "60m",
        Interval::OneDay => "1d",
    }
}

fn latest_range(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1d",
        Interval::FiveMinutes | Interval::FifteenMinutes => "5d",
        Interval::OneHour | Interval::OneDay => "1mo",
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartEnvelope {
    fn into_series(self, symbol: &Symbol, interval: Interval) -> Result<Series, CallFailure> {
        if let Some(error) = self.chart.error {
            if error.code.eq_ignore_ascii_case("not found") {
                return Err(CallFailure::Empty);
            }
            return Err(CallFailure::Transient(format!(
                "yahoo chart error {}: {}",
                error.code,
                error.description.unwrap_or_default()
            )));
        }

        let Some(result) = self.chart.result.and_then(|results| results.into_iter().next()) else {
            return Err(CallFailure::Empty);
        };
        let columns = result.indicators.quote.into_iter().next().unwrap_or_default();

        let bars = result
            .timestamp
            .iter()
            .enumerate()
            .filter_map(|(index, seconds)| {
                let open = (*columns.open.get(index)?)?;
                let high = (*columns.high.get(index)?)?;
                let low = (*columns.low.get(index)?)?;
                let close = (*columns.close.get(index)?)?;
                let volume = columns
                    .volume
                    .get(index)
                    .copied()
                    .flatten()
                    .filter(|value| value.is_finite() && *value > 0.0)
                    .map_or(0, |value| value.round() as u64);
                let open_ts = UtcDateTime::from_unix_timestamp(*seconds).ok()?;

                Bar::new(close_stamp(open_ts, interval), open, high, low, close, volume, None).ok()
            })
            .collect();

        Ok(Series::normalized(symbol.clone(), interval, bars))
    }
}
