//! Per-provider usage accounting, rate-limit windows and availability.
//!
//! The tracker owns one slot per configured provider, each behind its own mutex, so
//! recording an outcome for one provider never waits on another.
//!
//! | Outcome | Effect |
//! |---------|--------|
//! | `Success` | Clears rate-limit window and both streak counters |
//! | `Empty` | Breaks the transient streak |
//! | `RateLimited` | Opens a window of `retry_after` or the backoff delay |
//! | `AuthError` | Provider unavailable for the rest of the run |
//! | `TransientError` | Extends the streak; `failure_threshold` in a row trips the provider |

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::backoff::Backoff;
use crate::provider::{Capability, CapabilitySet, OutcomeKind};
use crate::{ProviderId, ProviderOutcome, UtcDateTime};

/// Thresholds applied by [`UsageTracker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageConfig {
    pub failure_threshold: u32,
    pub rate_limit_backoff: Backoff,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            rate_limit_backoff: Backoff::default(),
        }
    }
}

/// Static provider facts fixed at engine start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistration {
    pub id: ProviderId,
    pub capabilities: CapabilitySet,
    pub priority: u32,
}

impl ProviderRegistration {
    pub fn new(id: ProviderId, capabilities: CapabilitySet, priority: u32) -> Self {
        Self {
            id,
            capabilities,
            priority,
        }
    }
}

/// Why a provider stopped being routable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailability {
    AuthRejected,
    ConsecutiveFailures,
}

impl Display for Unavailability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthRejected => f.write_str("credentials rejected"),
            Self::ConsecutiveFailures => f.write_str("too many consecutive failures"),
        }
    }
}

/// Counters and windows for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub calls_attempted: u64,
    pub calls_succeeded: u64,
    pub calls_empty: u64,
    pub consecutive_transient_errors: u32,
    pub consecutive_rate_limits: u32,
    pub rate_limited_until: Option<UtcDateTime>,
    pub last_error_kind: Option<OutcomeKind>,
    pub last_error_message: Option<String>,
    pub unavailable: Option<Unavailability>,
}

impl UsageStats {
    pub fn calls_failed(&self) -> u64 {
        self.calls_attempted
            .saturating_sub(self.calls_succeeded)
            .saturating_sub(self.calls_empty)
    }
}

/// Diagnostic view of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: ProviderId,
    pub capabilities: CapabilitySet,
    pub priority: u32,
    pub declaration_index: usize,
    pub available: bool,
    pub usage: UsageStats,
}

impl ProviderDescriptor {
    pub fn status_label(&self, now: UtcDateTime) -> &'static str {
        match self.usage.unavailable {
            Some(Unavailability::AuthRejected) => "auth_rejected",
            Some(Unavailability::ConsecutiveFailures) => "tripped",
            None if self.usage.rate_limited_until.is_some_and(|until| now < until) => {
                "rate_limited"
            }
            None => "ready",
        }
    }
}

/// Why a provider was left out of a candidate plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Unavailable { cause: Unavailability },
    RateLimited { until: UtcDateTime },
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { cause } => write!(f, "unavailable ({cause})"),
            Self::RateLimited { until } => write!(f, "rate limited until {until}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedProvider {
    pub provider: ProviderId,
    pub reason: SkipReason,
}

/// Ordered providers to try for one capability, plus the ones left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePlan {
    pub candidates: Vec<ProviderId>,
    pub skipped: Vec<SkippedProvider>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("provider '{0}' is registered more than once")]
    DuplicateProvider(ProviderId),
}

#[derive(Debug)]
struct Slot {
    registration: ProviderRegistration,
    declaration_index: usize,
    state: Mutex<UsageStats>,
}

/// Owns per-provider usage state for the process lifetime.
#[derive(Debug)]
pub struct UsageTracker {
    config: UsageConfig,
    slots: Vec<Slot>,
    index: HashMap<ProviderId, usize>,
}

impl UsageTracker {
    pub fn new(
        registrations: Vec<ProviderRegistration>,
        config: UsageConfig,
    ) -> Result<Self, UsageError> {
        let mut slots = registrations
            .into_iter()
            .enumerate()
            .map(|(declaration_index, registration)| Slot {
                registration,
                declaration_index,
                state: Mutex::new(UsageStats::default()),
            })
            .collect::<Vec<_>>();
        slots.sort_by_key(|slot| (slot.registration.priority, slot.declaration_index));

        let mut index = HashMap::with_capacity(slots.len());
        for (position, slot) in slots.iter().enumerate() {
            if index.insert(slot.registration.id.clone(), position).is_some() {
                return Err(UsageError::DuplicateProvider(slot.registration.id.clone()));
            }
        }

        Ok(Self {
            config,
            slots,
            index,
        })
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    /// Provider ids in routing order.
    pub fn providers(&self) -> Vec<ProviderId> {
        self.slots
            .iter()
            .map(|slot| slot.registration.id.clone())
            .collect()
    }

    pub fn record<T>(&self, provider: &ProviderId, outcome: &ProviderOutcome<T>, now: UtcDateTime) {
        let Some(slot) = self.slot(provider) else {
            warn!(provider = %provider, "outcome recorded for unregistered provider");
            return;
        };

        let mut state = slot.state.lock().expect("usage slot lock is not poisoned");
        state.calls_attempted = state.calls_attempted.saturating_add(1);

        match outcome {
            ProviderOutcome::Success(_) => {
                state.calls_succeeded = state.calls_succeeded.saturating_add(1);
                state.consecutive_transient_errors = 0;
                state.consecutive_rate_limits = 0;
                state.rate_limited_until = None;
            }
            ProviderOutcome::Empty => {
                state.calls_empty = state.calls_empty.saturating_add(1);
                state.consecutive_transient_errors = 0;
            }
            ProviderOutcome::RateLimited { retry_after } => {
                let window = retry_after.unwrap_or_else(|| {
                    self.config
                        .rate_limit_backoff
                        .delay(state.consecutive_rate_limits)
                });
                let until = now.saturating_add(window);
                state.consecutive_transient_errors = 0;
                state.consecutive_rate_limits = state.consecutive_rate_limits.saturating_add(1);
                state.rate_limited_until = Some(until);
                note_error(&mut state, outcome);
                warn!(provider = %provider, until = %until, "provider rate limited");
            }
            ProviderOutcome::AuthError(_) => {
                state.consecutive_transient_errors = 0;
                note_error(&mut state, outcome);
                if state.unavailable != Some(Unavailability::AuthRejected) {
                    warn!(provider = %provider, "provider disabled: credentials rejected");
                }
                state.unavailable = Some(Unavailability::AuthRejected);
            }
            ProviderOutcome::TransientError(_) => {
                state.consecutive_transient_errors =
                    state.consecutive_transient_errors.saturating_add(1);
                note_error(&mut state, outcome);
                if state.unavailable.is_none()
                    && state.consecutive_transient_errors >= self.config.failure_threshold
                {
                    warn!(
                        provider = %provider,
                        streak = state.consecutive_transient_errors,
                        "provider disabled: consecutive transient failures"
                    );
                    state.unavailable = Some(Unavailability::ConsecutiveFailures);
                }
            }
        }
    }

    /// Available and outside any rate-limit window.
    pub fn is_usable(&self, provider: &ProviderId, now: UtcDateTime) -> bool {
        self.slot(provider)
            .is_some_and(|slot| skip_reason(&slot.lock_state(), now).is_none())
    }

    pub fn is_available(&self, provider: &ProviderId) -> bool {
        self.slot(provider)
            .is_some_and(|slot| slot.lock_state().unavailable.is_none())
    }

    pub fn candidates(&self, capability: Capability, now: UtcDateTime) -> CandidatePlan {
        let mut plan = CandidatePlan::default();

        for slot in &self.slots {
            if !slot.registration.capabilities.supports(capability) {
                continue;
            }

            let reason = skip_reason(&slot.lock_state(), now);
            match reason {
                None => plan.candidates.push(slot.registration.id.clone()),
                Some(reason) => plan.skipped.push(SkippedProvider {
                    provider: slot.registration.id.clone(),
                    reason,
                }),
            }
        }

        plan
    }

    /// Re-enables a provider tripped by transient failures. Returns whether it changed.
    ///
    /// Providers whose credentials were rejected stay disabled.
    pub fn reinstate(&self, provider: &ProviderId) -> bool {
        let Some(slot) = self.slot(provider) else {
            return false;
        };

        let mut state = slot.lock_state();
        if state.unavailable == Some(Unavailability::ConsecutiveFailures) {
            state.unavailable = None;
            state.consecutive_transient_errors = 0;
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self, provider: &ProviderId) -> Option<ProviderDescriptor> {
        self.slot(provider).map(Slot::descriptor)
    }

    pub fn snapshots(&self) -> Vec<ProviderDescriptor> {
        self.slots.iter().map(Slot::descriptor).collect()
    }

    fn slot(&self, provider: &ProviderId) -> Option<&Slot> {
        self.index
            .get(provider)
            .and_then(|position| self.slots.get(*position))
    }
}

impl Slot {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, UsageStats> {
        self.state.lock().expect("usage slot lock is not poisoned")
    }

    fn descriptor(&self) -> ProviderDescriptor {
        let usage = self.lock_state().clone();
        ProviderDescriptor {
            name: self.registration.id.clone(),
            capabilities: self.registration.capabilities,
            priority: self.registration.priority,
            declaration_index: self.declaration_index,
            available: usage.unavailable.is_none(),
            usage,
        }
    }
}

fn skip_reason(state: &UsageStats, now: UtcDateTime) -> Option<SkipReason> {
    if let Some(cause) = state.unavailable {
        return Some(SkipReason::Unavailable { cause });
    }

    match state.rate_limited_until {
        Some(until) if now < until => Some(SkipReason::RateLimited { until }),
        _ => None,
    }
}

fn note_error<T>(state: &mut UsageStats, outcome: &ProviderOutcome<T>) {
    state.last_error_kind = Some(outcome.kind());
    state.last_error_message = outcome.detail();
}
