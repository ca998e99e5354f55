//! Property-Based Tests for Upload Rate Limiting
//!
//! Invariants checked with proptest over random attempt sequences:
//!
//! - **Window bounds**: allowed uploads within one window never exceed the
//!   configured limit
//! - **Cooldown stickiness**: after a breach, every attempt inside the
//!   cooldown is rejected as `cooldown_active`
//! - **Cooldown monotonicity**: `set_cooldown` never moves an active
//!   cooldown earlier
//! - **Normalization**: normalized extension lists are valid and idempotent
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib rate_limit::proptests
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use crate::rate_limit::counter::ClientUploadState;
use crate::rate_limit::enforcer::{DenyReason, RateLimitEnforcer, UploadAttempt};
use crate::rate_limit::policy::{normalize_extensions, Policy};
use crate::rate_limit::store::JsonPolicyStore;
use std::sync::Arc;

fn base() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn enforcer(policy: Policy) -> RateLimitEnforcer {
    RateLimitEnforcer::new(Arc::new(JsonPolicyStore::with_policy(policy)))
}

fn attempt(size: u64) -> UploadAttempt<'static> {
    UploadAttempt {
        client_id: "client",
        file_size_bytes: size,
        file_extension: Some(".txt"),
    }
}

// Helper: sorted offsets (ms) inside a window of `len_ms`
fn arb_offsets(len_ms: i64, max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0..len_ms, 1..max_len).prop_map(|mut v| {
        v.sort_unstable();
        v
    })
}

// ============================================================================
// Property 1: Window Bounds
// ============================================================================

proptest! {
    /// Allowed uploads inside one minute never exceed the per-minute limit
    #[test]
    fn prop_minute_limit_never_exceeded(
        limit in 0u32..10,
        cooldown in 0u64..120,
        offsets in arb_offsets(60_000, 40)
    ) {
        let policy = enforcer_policy(limit, 1000, cooldown);
        let enforcer = enforcer(policy.clone());

        let allowed = offsets
            .iter()
            .filter(|ms| {
                enforcer
                    .evaluate_with(&policy, attempt(1), base() + Duration::milliseconds(**ms))
                    .is_allowed()
            })
            .count();

        prop_assert!(allowed as u32 <= limit);
    }

    /// Allowed uploads inside one hour never exceed the per-hour limit
    #[test]
    fn prop_hour_limit_never_exceeded(
        limit in 0u32..20,
        offsets in arb_offsets(3_600_000, 80)
    ) {
        let policy = enforcer_policy(1000, limit, 0);
        let enforcer = enforcer(policy.clone());

        let allowed = offsets
            .iter()
            .filter(|ms| {
                enforcer
                    .evaluate_with(&policy, attempt(1), base() + Duration::milliseconds(**ms))
                    .is_allowed()
            })
            .count();

        prop_assert!(allowed as u32 <= limit);
    }
}

fn enforcer_policy(per_minute: u32, per_hour: u32, cooldown: u64) -> Policy {
    Policy {
        max_uploads_per_minute: per_minute,
        max_uploads_per_hour: per_hour,
        cooldown_seconds: cooldown,
        ..Policy::default()
    }
}

// ============================================================================
// Property 2: Cooldown Stickiness
// ============================================================================

proptest! {
    /// Once a breach is reported, attempts inside the cooldown are all
    /// `cooldown_active`, even across window resets
    #[test]
    fn prop_cooldown_sticks_after_breach(
        limit in 0u32..5,
        cooldown in 1u64..7200,
        probes in prop::collection::vec(0u64..7200, 1..20)
    ) {
        let policy = enforcer_policy(limit, 1000, cooldown);
        let enforcer = enforcer(policy.clone());

        // Exhaust the minute and trigger the breach at t = 0
        let mut breach_at = None;
        for _ in 0..=limit {
            let d = enforcer.evaluate_with(&policy, attempt(1), base());
            if d.reason() == Some(DenyReason::RateLimitExceeded) {
                breach_at = Some(base());
            }
        }
        prop_assert_eq!(breach_at, Some(base()));

        let mut probes = probes;
        probes.sort_unstable();
        for secs in probes.into_iter().filter(|s| *s < cooldown) {
            let now = base() + Duration::seconds(secs as i64);
            let d = enforcer.evaluate_with(&policy, attempt(1), now);
            prop_assert_eq!(d.reason(), Some(DenyReason::CooldownActive));
        }
    }
}

// ============================================================================
// Property 3: Cooldown Monotonicity
// ============================================================================

proptest! {
    /// `set_cooldown` never shortens an active cooldown
    #[test]
    fn prop_set_cooldown_never_shortens(
        calls in prop::collection::vec((0i64..10_000, 0u64..10_000), 1..30)
    ) {
        let mut state = ClientUploadState::new(base());
        let mut calls = calls;
        calls.sort_by_key(|(at, _)| *at);

        for (at, duration) in calls {
            let now = base() + Duration::seconds(at);
            let before = state.cooldown_until;
            state.set_cooldown(now, duration);

            if let Some(prev) = before {
                if now < prev {
                    prop_assert!(state.cooldown_until.unwrap() >= prev);
                }
            }
            if duration > 0 {
                prop_assert!(state.cooldown_until.unwrap() > now);
            }
        }
    }
}

// ============================================================================
// Property 4: Extension Normalization
// ============================================================================

proptest! {
    /// Normalized lists always validate and normalizing twice changes nothing
    #[test]
    fn prop_normalized_extensions_are_valid(
        raw in prop::collection::vec("[ .]{0,2}[a-zA-Z0-9]{0,5}[ ]{0,2}", 0..12)
    ) {
        let normalized = normalize_extensions(&raw);
        let policy = Policy {
            blocked_extensions: normalized.clone(),
            ..Policy::default()
        };
        prop_assert!(policy.validate().is_ok());
        prop_assert_eq!(normalize_extensions(&normalized), normalized.clone());

        for ext in &normalized {
            prop_assert!(policy.is_extension_blocked(&ext.to_uppercase()));
        }
    }
}
