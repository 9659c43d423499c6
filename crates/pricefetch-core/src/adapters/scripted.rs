use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::provider::{
    CapabilitySet, HistoricalRequest, LatestBarRequest, PriceProvider, ProviderFuture,
    QuoteRequest,
};
use crate::{Bar, Interval, ProviderId, ProviderOutcome, Quote, Series, Symbol, UtcDateTime};

const MAX_SYNTHETIC_BARS: usize = 5_000;

/// One scripted reaction of a [`ScriptedProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Serve the fixture for the symbol, or deterministic synthetic bars.
    Succeed,
    RateLimited(Option<Duration>),
    AuthError,
    Empty,
    TransientError,
    /// Never resolve; exercises call timeouts.
    Hang,
}

/// Offline provider whose outcomes are scripted up front.
///
/// Queued steps are consumed one per call in FIFO order. Once the queue is drained, a
/// per-symbol step applies if one was registered, then the default step.
#[derive(Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    capabilities: CapabilitySet,
    clock: Arc<dyn Clock>,
    default_step: ScriptStep,
    queue: Mutex<VecDeque<ScriptStep>>,
    symbol_steps: HashMap<Symbol, ScriptStep>,
    fixtures: HashMap<Symbol, Series>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    called_symbols: Mutex<Vec<Symbol>>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            capabilities: CapabilitySet::all(),
            clock: Arc::new(SystemClock),
            default_step: ScriptStep::Succeed,
            queue: Mutex::new(VecDeque::new()),
            symbol_steps: HashMap::new(),
            fixtures: HashMap::new(),
            latency: None,
            calls: AtomicUsize::new(0),
            called_symbols: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default(mut self, step: ScriptStep) -> Self {
        self.default_step = step;
        self
    }

    pub fn then_steps(self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.queue
            .lock()
            .expect("script queue lock is not poisoned")
            .extend(steps);
        self
    }

    pub fn with_symbol_step(mut self, symbol: Symbol, step: ScriptStep) -> Self {
        self.symbol_steps.insert(symbol, step);
        self
    }

    pub fn with_fixture(mut self, series: Series) -> Self {
        self.fixtures.insert(series.symbol().clone(), series);
        self
    }

    /// Simulated network latency, applied before every call resolves.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, symbol: &Symbol) -> usize {
        self.called_symbols
            .lock()
            .expect("called symbols lock is not poisoned")
            .iter()
            .filter(|called| *called == symbol)
            .count()
    }

    fn next_step(&self, symbol: &Symbol) -> ScriptStep {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called_symbols
            .lock()
            .expect("called symbols lock is not poisoned")
            .push(symbol.clone());

        if let Some(step) = self
            .queue
            .lock()
            .expect("script queue lock is not poisoned")
            .pop_front()
        {
            return step;
        }

        self.symbol_steps
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.default_step.clone())
    }

    async fn play<T>(
        &self,
        symbol: &Symbol,
        succeed: impl FnOnce() -> Option<T>,
    ) -> ProviderOutcome<T> {
        let step = self.next_step(symbol);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match step {
            ScriptStep::Succeed => succeed().map_or(ProviderOutcome::Empty, ProviderOutcome::Success),
            ScriptStep::RateLimited(retry_after) => ProviderOutcome::RateLimited { retry_after },
            ScriptStep::AuthError => {
                ProviderOutcome::AuthError(format!("{} rejected scripted credentials", self.id))
            }
            ScriptStep::Empty => ProviderOutcome::Empty,
            ScriptStep::TransientError => {
                ProviderOutcome::TransientError(format!("{} scripted transient failure", self.id))
            }
            ScriptStep::Hang => std::future::pending().await,
        }
    }

    fn historical_series(&self, request: &HistoricalRequest) -> Option<Series> {
        let series = match self.fixtures.get(&request.symbol) {
            Some(fixture) => fixture.slice(request.start, request.end),
            None => synthetic_series(&request.symbol, request.interval, request.start, request.end),
        };
        (!series.is_empty()).then_some(series)
    }

    fn latest(&self, request: &LatestBarRequest) -> Option<Bar> {
        let now = self.clock.now();
        if let Some(fixture) = self.fixtures.get(&request.symbol) {
            return fixture.bars().iter().rev().find(|bar| bar.ts <= now).cloned();
        }

        // Last completed boundary at or before now.
        let step = request.interval.duration().as_secs() as i64;
        let boundary = now.unix_timestamp().div_euclid(step) * step;
        let ts = UtcDateTime::from_unix_timestamp(boundary).ok()?;
        synthetic_bar(&request.symbol, boundary.div_euclid(step), ts)
    }

    fn quote(&self, request: &QuoteRequest) -> Option<Quote> {
        let base = base_price(&request.symbol);
        Quote::new(request.symbol.clone(), base, base + 0.02, self.clock.now()).ok()
    }
}

impl PriceProvider for ScriptedProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn fetch_historical<'a>(&'a self, request: HistoricalRequest) -> ProviderFuture<'a, Series> {
        Box::pin(async move {
            self.play(&request.symbol, || self.historical_series(&request))
                .await
        })
    }

    fn fetch_latest_bar<'a>(&'a self, request: LatestBarRequest) -> ProviderFuture<'a, Bar> {
        Box::pin(async move { self.play(&request.symbol, || self.latest(&request)).await })
    }

    fn fetch_quote<'a>(&'a self, request: QuoteRequest) -> ProviderFuture<'a, Quote> {
        Box::pin(async move { self.play(&request.symbol, || self.quote(&request)).await })
    }
}

fn base_price(symbol: &Symbol) -> f64 {
    let seed = symbol
        .as_str()
        .bytes()
        .fold(0_u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(u32::from(byte)));
    20.0 + f64::from(seed % 200)
}

fn synthetic_bar(symbol: &Symbol, sequence: i64, ts: UtcDateTime) -> Option<Bar> {
    let close = base_price(symbol) + (sequence.rem_euclid(7) as f64) * 0.25;
    let volume = 10_000 + (sequence.unsigned_abs() % 1_000_000) * 10;
    Bar::new(ts, close, close + 0.5, close - 0.5, close, volume, None).ok()
}

fn synthetic_series(
    symbol: &Symbol,
    interval: Interval,
    start: UtcDateTime,
    end: UtcDateTime,
) -> Series {
    let step = interval.duration().as_secs() as i64;
    let first = start.unix_timestamp().div_euclid(step)
        + i64::from(start.unix_timestamp().rem_euclid(step) != 0);
    let last = end.unix_timestamp();

    let bars = (first..)
        .take_while(|sequence| sequence * step < last)
        .take(MAX_SYNTHETIC_BARS)
        .filter_map(|sequence| {
            let ts = UtcDateTime::from_unix_timestamp(sequence * step).ok()?;
            synthetic_bar(symbol, sequence, ts)
        })
        .collect();

    Series::normalized(symbol.clone(), interval, bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutcomeKind;

    fn ts(value: &str) -> UtcDateTime {
        UtcDateTime::parse(value).expect("valid timestamp")
    }

    fn request(symbol: &str) -> HistoricalRequest {
        HistoricalRequest::new(
            Symbol::parse(symbol).expect("valid"),
            Interval::OneHour,
            ts("2024-01-02T00:30:00Z"),
            ts("2024-01-02T05:00:00Z"),
        )
        .expect("valid range")
    }

    #[tokio::test]
    async fn synthetic_bars_sit_on_aligned_boundaries_inside_range() {
        let provider = ScriptedProvider::new(ProviderId::parse("fake").expect("valid"));

        let ProviderOutcome::Success(series) = provider.fetch_historical(request("AAPL")).await
        else {
            panic!("expected synthetic bars");
        };

        let stamps = series
            .bars()
            .iter()
            .map(|bar| bar.ts.format_rfc3339())
            .collect::<Vec<_>>();
        assert_eq!(
            stamps,
            vec![
                "2024-01-02T01:00:00Z",
                "2024-01-02T02:00:00Z",
                "2024-01-02T03:00:00Z",
                "2024-01-02T04:00:00Z",
            ]
        );
    }

    #[tokio::test]
    async fn queued_steps_run_before_symbol_and_default_steps() {
        let aapl = Symbol::parse("AAPL").expect("valid");
        let provider = ScriptedProvider::new(ProviderId::parse("fake").expect("valid"))
            .then_steps([ScriptStep::RateLimited(None)])
            .with_symbol_step(aapl.clone(), ScriptStep::TransientError);

        assert_eq!(
            provider.fetch_historical(request("AAPL")).await.kind(),
            OutcomeKind::RateLimited
        );
        assert_eq!(
            provider.fetch_historical(request("AAPL")).await.kind(),
            OutcomeKind::TransientError
        );
        assert_eq!(
            provider.fetch_historical(request("MSFT")).await.kind(),
            OutcomeKind::Success
        );
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.calls_for(&aapl), 2);
    }

    #[tokio::test]
    async fn latest_bar_is_last_completed_boundary() {
        let clock = Arc::new(crate::clock::ManualClock::new(ts("2024-01-02T10:07:30Z")));
        let provider =
            ScriptedProvider::new(ProviderId::parse("fake").expect("valid")).with_clock(clock);

        let outcome = provider
            .fetch_latest_bar(LatestBarRequest::new(
                Symbol::parse("AAPL").expect("valid"),
                Interval::FiveMinutes,
            ))
            .await;
        let ProviderOutcome::Success(bar) = outcome else {
            panic!("expected bar");
        };
        assert_eq!(bar.ts.format_rfc3339(), "2024-01-02T10:05:00Z");
    }

    #[tokio::test]
    async fn fixture_outside_range_is_empty() {
        let symbol = Symbol::parse("AAPL").expect("valid");
        let bar = Bar::new(ts("2023-06-01T00:00:00Z"), 1.0, 1.0, 1.0, 1.0, 1, None).expect("bar");
        let provider = ScriptedProvider::new(ProviderId::parse("fake").expect("valid"))
            .with_fixture(Series::single(symbol, Interval::OneHour, bar));

        assert_eq!(
            provider.fetch_historical(request("AAPL")).await.kind(),
            OutcomeKind::Empty
        );
    }
}
