// Shared fixtures for the behavior tests

use std::sync::Arc;

use pricefetch_core::{
    Bar, Interval, ManualClock, PriceProvider, ProviderId, ScriptedProvider, Series, Symbol,
    UtcDateTime,
};

pub fn ts(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

pub fn sym(value: &str) -> Symbol {
    Symbol::parse(value).expect("valid symbol")
}

pub fn provider_id(value: &str) -> ProviderId {
    ProviderId::parse(value).expect("valid provider name")
}

pub fn clock_at(value: &str) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(ts(value)))
}

pub fn scripted(name: &str) -> ScriptedProvider {
    ScriptedProvider::new(provider_id(name))
}

pub fn shared(provider: &Arc<ScriptedProvider>) -> Arc<dyn PriceProvider> {
    Arc::clone(provider) as Arc<dyn PriceProvider>
}

/// Daily bars closing on consecutive midnights starting at `first_close`.
pub fn daily_series(symbol: &str, first_close: &str, closes: &[f64]) -> Series {
    let first = ts(first_close);
    let bars = closes
        .iter()
        .enumerate()
        .map(|(offset, close)| {
            let stamp = first.saturating_add(Interval::OneDay.duration() * offset as u32);
            Bar::new(stamp, *close, close + 1.0, close - 1.0, *close, 1_000, None).expect("valid bar")
        })
        .collect();
    Series::new(sym(symbol), Interval::OneDay, bars).expect("ordered series")
}
