//! Backoff schedules for provider rate-limit windows.

use std::time::Duration;

/// Backoff strategy applied when a provider rate-limits without a retry hint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses the same delay every time.
    Fixed {
        /// Delay applied on each consecutive rate limit.
        delay: Duration,
    },
    /// Delay grows as `base * (factor ^ attempt)` up to `max`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent rate limit.
        factor: f64,
        /// The longest window ever applied.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(30),
            factor: 2.0,
            max: Duration::from_secs(600),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay for the given consecutive rate-limit count (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_seconds = if seconds.is_finite() {
                    seconds.min(max.as_secs_f64())
                } else {
                    max.as_secs_f64()
                };

                let mut delay = Duration::from_secs_f64(capped_seconds.max(0.0));

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}
