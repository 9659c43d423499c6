//! # Domain Models
//!
//! Canonical market data types shared by every engine component.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bar`] | OHLCV bar stamped at period close |
//! | [`Series`] | Strictly ordered bars for one symbol/interval |
//! | [`Quote`] | Top-of-book bid/ask |
//! | [`Symbol`] | Validated ticker |
//! | [`Interval`] | Bar interval (1m, 5m, 15m, 1h, 1d) |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Construction validates invariants, so a value of these types is always well-formed:
//!
//! ```rust
//! use pricefetch_core::{Bar, UtcDateTime, ValidationError};
//!
//! let ts = UtcDateTime::parse("2024-01-01T00:00:00Z").unwrap();
//! assert!(Bar::new(ts, 100.0, 105.0, 95.0, 102.0, 1_000, None).is_ok());
//! assert!(matches!(
//!     Bar::new(ts, 100.0, 95.0, 105.0, 102.0, 1_000, None),
//!     Err(ValidationError::InvalidBarRange)
//! ));
//! ```

mod interval;
mod models;
mod symbol;
mod timestamp;

pub use interval::Interval;
pub(crate) use models::spread_percent;
pub use models::{Bar, Quote, Series};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
