use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::adapters::{close_stamp, get_json, CallFailure};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{
    CapabilitySet, HistoricalRequest, LatestBarRequest, PriceProvider, ProviderFuture, QuoteRequest,
};
use crate::{Bar, Interval, ProviderId, ProviderOutcome, Quote, Series, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://data.alpaca.markets";
const PAGE_LIMIT: u32 = 10_000;
const MAX_PAGES: usize = 20;

/// Alpaca market data v2 adapter.
///
/// Alpaca only publishes a "latest" bar at minute resolution, so latest-bar requests for
/// coarser intervals answer `Empty` and fail over to the next provider.
#[derive(Clone)]
pub struct AlpacaProvider {
    id: ProviderId,
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    secret_key: String,
    base_url: String,
    feed: String,
    timeout_ms: u64,
}

impl AlpacaProvider {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            id: ProviderId::builtin("alpaca"),
            http_client,
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            base_url: String::from(DEFAULT_BASE_URL),
            feed: String::from("iex"),
            timeout_ms: 10_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = feed.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn request(&self, url: String) -> HttpRequest {
        HttpRequest::get(url)
            .with_header("APCA-API-KEY-ID", &self.api_key)
            .with_header("APCA-API-SECRET-KEY", &self.secret_key)
            .with_timeout_ms(self.timeout_ms)
    }

    fn stock_url(&self, symbol: &Symbol, path: &str) -> String {
        format!(
            "{}/v2/stocks/{}/{path}",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        )
    }

    async fn historical(&self, request: &HistoricalRequest) -> Result<Series, CallFailure> {
        // Alpaca stamps bars at period open; shift the window so closes land in [start, end).
        let step = request.interval.duration();
        let open_start = request.start.saturating_sub(step);
        let open_end = request.end.saturating_sub(step);

        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;
        for page_number in 1..=MAX_PAGES {
            let mut url = format!(
                "{}?timeframe={}&start={}&end={}&limit={PAGE_LIMIT}&adjustment=raw&feed={}",
                self.stock_url(&request.symbol, "bars"),
                timeframe(request.interval),
                urlencoding::encode(&open_start.format_rfc3339()),
                urlencoding::encode(&open_end.format_rfc3339()),
                self.feed,
            );
            if let Some(token) = &page_token {
                url.push_str("&page_token=");
                url.push_str(&urlencoding::encode(token));
            }

            let page: BarsPage = get_json(self.http_client.as_ref(), &self.id, self.request(url)).await?;
            bars.extend(
                page.bars
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|raw| raw.into_bar(&request.symbol, request.interval)),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => {
                    // Never return a partial range.
                    if page_number == MAX_PAGES {
                        return Err(CallFailure::Transient(format!(
                            "alpaca page limit of {MAX_PAGES} reached with more bars pending"
                        )));
                    }
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        let series = Series::normalized(request.symbol.clone(), request.interval, bars);
        Ok(series.slice(request.start, request.end))
    }

    async fn latest_bar(&self, request: &LatestBarRequest) -> Result<Bar, CallFailure> {
        if request.interval != Interval::OneMinute {
            return Err(CallFailure::Empty);
        }

        let url = format!(
            "{}?feed={}",
            self.stock_url(&request.symbol, "bars/latest"),
            self.feed
        );
        let payload: LatestBarPayload =
            get_json(self.http_client.as_ref(), &self.id, self.request(url)).await?;

        payload
            .bar
            .and_then(|raw| raw.into_bar(&request.symbol, request.interval))
            .ok_or(CallFailure::Empty)
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, CallFailure> {
        let url = format!(
            "{}?feed={}",
            self.stock_url(&request.symbol, "quotes/latest"),
            self.feed
        );
        let payload: LatestQuotePayload =
            get_json(self.http_client.as_ref(), &self.id, self.request(url)).await?;
        let Some(raw) = payload.quote else {
            return Err(CallFailure::Empty);
        };

        let as_of = UtcDateTime::parse(&raw.t)
            .map_err(|error| CallFailure::Transient(format!("alpaca quote timestamp: {error}")))?;
        Quote::new(request.symbol.clone(), raw.bp, raw.ap, as_of)
            .map_err(|error| CallFailure::Transient(format!("alpaca quote rejected: {error}")))
    }
}

impl PriceProvider for AlpacaProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::all()
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

    fn fetch_quote<'a>(&'a self, request: QuoteRequest) -> ProviderFuture<'a, Quote> {
        Box::pin(async move {
            self.quote(&request)
                .await
                .map_or_else(CallFailure::into_outcome, ProviderOutcome::Success)
        })
    }
}

fn timeframe(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1Min",
        Interval::FiveMinutes => "5Min",
        Interval::FifteenMinutes => "15Min",
        Interval::OneHour => "1Hour",
        Interval::OneDay => "1Day",
    }
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    bars: Option<Vec<RawBar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestBarPayload {
    bar: Option<RawBar>,
}

#[derive(Debug, Deserialize)]
struct LatestQuotePayload {
    quote: Option<RawQuote>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    vw: Option<f64>,
}

impl RawBar {
    fn into_bar(self, symbol: &Symbol, interval: Interval) -> Option<Bar> {
        let open_ts = UtcDateTime::parse(&self.t).ok()?;
        let volume = if self.v.is_finite() && self.v > 0.0 {
            self.v.round() as u64
        } else {
            0
        };

        match Bar::new(
            close_stamp(open_ts, interval),
            self.o,
            self.h,
            self.l,
            self.c,
            volume,
            self.vw,
        ) {
            Ok(bar) => Some(bar),
            Err(error) => {
                warn!(provider = "alpaca", symbol = %symbol, ts = %self.t, %error, "dropping malformed bar");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    t: String,
    bp: f64,
    ap: f64,
}
