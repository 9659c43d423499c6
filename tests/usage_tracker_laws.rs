//! Behavior tests for provider availability bookkeeping.
//!
//! The central law: a provider is unavailable exactly when an auth error was recorded or
//! a run of at least `failure_threshold` consecutive transient errors occurred.

use std::time::Duration;

use pricefetch_core::{
    Backoff, Capability, CapabilitySet, OutcomeKind, ProviderOutcome, ProviderRegistration,
    SkipReason, Unavailability, UsageConfig, UsageTracker,
};
use proptest::prelude::*;

use pricefetch_tests::{provider_id, ts};

fn tracker(threshold: u32) -> UsageTracker {
    UsageTracker::new(
        vec![ProviderRegistration::new(
            provider_id("alpha"),
            CapabilitySet::all(),
            1,
        )],
        UsageConfig {
            failure_threshold: threshold,
            rate_limit_backoff: Backoff::Fixed {
                delay: Duration::from_secs(30),
            },
        },
    )
    .expect("single provider")
}

fn outcome(kind: OutcomeKind) -> ProviderOutcome<()> {
    match kind {
        OutcomeKind::Success => ProviderOutcome::Success(()),
        OutcomeKind::RateLimited => ProviderOutcome::RateLimited { retry_after: None },
        OutcomeKind::AuthError => ProviderOutcome::AuthError(String::from("bad key")),
        OutcomeKind::Empty => ProviderOutcome::Empty,
        OutcomeKind::TransientError => ProviderOutcome::TransientError(String::from("503")),
    }
}

/// Reference model of the availability law.
fn expected_unavailable(kinds: &[OutcomeKind], threshold: u32) -> bool {
    let mut streak = 0_u32;
    let mut tripped = false;
    for kind in kinds {
        match kind {
            OutcomeKind::AuthError => return true,
            OutcomeKind::TransientError => {
                streak += 1;
                if streak >= threshold {
                    tripped = true;
                }
            }
            _ => streak = 0,
        }
    }
    tripped
}

fn outcome_kind() -> impl Strategy<Value = OutcomeKind> {
    prop_oneof![
        4 => Just(OutcomeKind::Success),
        2 => Just(OutcomeKind::Empty),
        2 => Just(OutcomeKind::RateLimited),
        1 => Just(OutcomeKind::AuthError),
        5 => Just(OutcomeKind::TransientError),
    ]
}

proptest! {
    #[test]
    fn availability_follows_auth_and_transient_streak_law(
        kinds in prop::collection::vec(outcome_kind(), 0..40),
        threshold in 1_u32..6,
    ) {
        let tracker = tracker(threshold);
        let id = provider_id("alpha");
        let now = ts("2024-01-02T00:00:00Z");

        for kind in &kinds {
            tracker.record(&id, &outcome(*kind), now);
        }

        prop_assert_eq!(
            !tracker.is_available(&id),
            expected_unavailable(&kinds, threshold)
        );
        let snapshot = tracker.snapshot(&id).expect("registered");
        prop_assert_eq!(snapshot.usage.calls_attempted, kinds.len() as u64);
    }
}

// =============================================================================
// Rate-limit windows
// =============================================================================

#[test]
fn when_provider_rate_limits_it_is_skipped_until_the_window_passes() {
    // Given: A provider that just answered RateLimited without a hint
    let tracker = tracker(3);
    let id = provider_id("alpha");
    let now = ts("2024-01-02T00:00:00Z");
    tracker.record(&id, &outcome(OutcomeKind::RateLimited), now);

    // When: Candidates are requested inside and after the 30s backoff window
    let inside = tracker.candidates(Capability::HistoricalBars, now.saturating_add(Duration::from_secs(29)));
    let after = tracker.candidates(Capability::HistoricalBars, now.saturating_add(Duration::from_secs(30)));

    // Then: It is skipped inside the window and offered again afterwards
    assert!(inside.candidates.is_empty());
    assert_eq!(
        inside.skipped[0].reason,
        SkipReason::RateLimited {
            until: now.saturating_add(Duration::from_secs(30))
        }
    );
    assert_eq!(after.candidates, vec![id.clone()]);
    assert!(tracker.is_available(&id), "rate limiting never trips a provider");
}

#[test]
fn when_retry_after_is_given_it_sets_the_window() {
    let tracker = tracker(3);
    let id = provider_id("alpha");
    let now = ts("2024-01-02T00:00:00Z");

    tracker.record(
        &id,
        &ProviderOutcome::<()>::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        },
        now,
    );

    assert!(!tracker.is_usable(&id, now.saturating_add(Duration::from_secs(4))));
    assert!(tracker.is_usable(&id, now.saturating_add(Duration::from_secs(5))));
}

#[test]
fn when_exponential_backoff_applies_consecutive_windows_grow() {
    // Given: Default exponential backoff (30s base, factor 2)
    let tracker = UsageTracker::new(
        vec![ProviderRegistration::new(provider_id("alpha"), CapabilitySet::all(), 1)],
        UsageConfig::default(),
    )
    .expect("single provider");
    let id = provider_id("alpha");
    let now = ts("2024-01-02T00:00:00Z");

    // When: Two rate limits arrive back to back
    tracker.record(&id, &outcome(OutcomeKind::RateLimited), now);
    let first = tracker.snapshot(&id).expect("registered").usage.rate_limited_until;
    tracker.record(&id, &outcome(OutcomeKind::RateLimited), now);
    let second = tracker.snapshot(&id).expect("registered").usage.rate_limited_until;

    // Then: The second window is twice as long
    assert_eq!(first, Some(now.saturating_add(Duration::from_secs(30))));
    assert_eq!(second, Some(now.saturating_add(Duration::from_secs(60))));
}

// =============================================================================
// Trips and reinstatement
// =============================================================================

#[test]
fn when_tripped_by_failures_reinstate_restores_it_but_auth_rejection_sticks() {
    let tracker = UsageTracker::new(
        vec![
            ProviderRegistration::new(provider_id("flaky"), CapabilitySet::all(), 1),
            ProviderRegistration::new(provider_id("locked"), CapabilitySet::all(), 2),
        ],
        UsageConfig {
            failure_threshold: 2,
            ..UsageConfig::default()
        },
    )
    .expect("unique providers");
    let now = ts("2024-01-02T00:00:00Z");
    let flaky = provider_id("flaky");
    let locked = provider_id("locked");

    tracker.record(&flaky, &outcome(OutcomeKind::TransientError), now);
    tracker.record(&flaky, &outcome(OutcomeKind::TransientError), now);
    tracker.record(&locked, &outcome(OutcomeKind::AuthError), now);

    let plan = tracker.candidates(Capability::Quote, now);
    assert!(plan.candidates.is_empty());
    assert_eq!(
        plan.skipped[1].reason,
        SkipReason::Unavailable {
            cause: Unavailability::AuthRejected
        }
    );

    assert!(tracker.reinstate(&flaky));
    assert!(!tracker.reinstate(&locked));
    assert_eq!(tracker.candidates(Capability::Quote, now).candidates, vec![flaky]);
}
