//! Rate Limit Enforcer
//!
//! Decides whether an upload attempt may proceed.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. active cooldown
//! 2. blocked extension
//! 3. file size
//! 4. per-minute / per-hour counts (the attempt is counted first)
//!
//! Extension and size rejections do not consume a rate-limit slot. A breach of
//! the numeric limits does, and arms the cooldown so that the next attempt is
//! rejected at step 1. If the policy cannot be read the attempt is denied.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use super::counter::UploadCounter;
use super::policy::Policy;
use super::store::PolicyStore;
use crate::metrics;

/// Why an upload attempt was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Client is locked out after an earlier breach
    CooldownActive,
    /// File extension is on the blocked list
    BlockedExtension,
    /// Payload exceeds the maximum file size
    FileTooLarge,
    /// This attempt exceeded the per-minute or per-hour limit
    RateLimitExceeded,
    /// Policy could not be read; failing closed
    StoreUnavailable,
}

impl DenyReason {
    /// Stable identifier surfaced to callers
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::CooldownActive => "cooldown_active",
            DenyReason::BlockedExtension => "blocked_extension",
            DenyReason::FileTooLarge => "file_too_large",
            DenyReason::RateLimitExceeded => "rate_limit_exceeded",
            DenyReason::StoreUnavailable => "store_unavailable",
        }
    }

    /// Whether retrying later can succeed without changing the upload
    pub fn is_rate_related(&self) -> bool {
        matches!(
            self,
            DenyReason::CooldownActive | DenyReason::RateLimitExceeded
        )
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating an upload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        reason: DenyReason,
        /// Seconds until a retry can succeed (rate-related denials only)
        retry_after_secs: Option<u64>,
    },
}

impl Decision {
    fn deny(reason: DenyReason) -> Self {
        Decision::Deny {
            reason,
            retry_after_secs: None,
        }
    }

    /// Whether the upload may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Deny reason, if denied
    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny { reason, .. } => Some(*reason),
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Decision::Allow => "allowed",
            Decision::Deny { reason, .. } => reason.as_str(),
        }
    }
}

/// Upload attempt to evaluate
#[derive(Debug, Clone, Copy)]
pub struct UploadAttempt<'a> {
    /// Stable identity of the uploading party
    pub client_id: &'a str,

    /// Payload size in bytes
    pub file_size_bytes: u64,

    /// Extension in any case, leading dot optional (`None` if the file has none)
    pub file_extension: Option<&'a str>,
}

/// Enforces the current policy against per-client counters
#[derive(Debug, Clone)]
pub struct RateLimitEnforcer {
    store: Arc<dyn PolicyStore>,
    counter: UploadCounter,
}

impl RateLimitEnforcer {
    /// Create an enforcer reading policy from `store`
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self::with_counter(store, UploadCounter::new())
    }

    /// Create an enforcer with an existing counter
    pub fn with_counter(store: Arc<dyn PolicyStore>, counter: UploadCounter) -> Self {
        Self { store, counter }
    }

    /// Evaluate one upload attempt at `now`
    pub async fn evaluate(&self, attempt: UploadAttempt<'_>, now: DateTime<Utc>) -> Decision {
        let decision = match self.store.get().await {
            Ok(policy) => self.evaluate_with(&policy, attempt, now),
            Err(e) => {
                error!("Denying upload from {}: {}", attempt.client_id, e);
                Decision::deny(DenyReason::StoreUnavailable)
            }
        };

        metrics::UPLOAD_DECISIONS_TOTAL
            .with_label_values(&[decision.outcome_label()])
            .inc();
        metrics::TRACKED_UPLOAD_CLIENTS.set(self.counter.len() as i64);

        if let Decision::Deny { reason, .. } = decision {
            debug!(client = attempt.client_id, %reason, "Upload denied");
        }
        decision
    }

    /// Evaluate against an explicit policy snapshot.
    ///
    /// The whole sequence runs under the client's lock, so two concurrent
    /// attempts cannot both observe the last free slot.
    pub fn evaluate_with(
        &self,
        policy: &Policy,
        attempt: UploadAttempt<'_>,
        now: DateTime<Utc>,
    ) -> Decision {
        self.counter.with_client(attempt.client_id, now, |state| {
            if let Some(remaining) = state.cooldown_remaining_secs(now) {
                return Decision::Deny {
                    reason: DenyReason::CooldownActive,
                    retry_after_secs: Some(remaining),
                };
            }

            if let Some(ext) = attempt.file_extension {
                if policy.is_extension_blocked(ext) {
                    return Decision::deny(DenyReason::BlockedExtension);
                }
            }

            if attempt.file_size_bytes > policy.max_file_size_bytes {
                return Decision::deny(DenyReason::FileTooLarge);
            }

            let snapshot = state.record_attempt(now);
            if snapshot.minute_count > policy.max_uploads_per_minute
                || snapshot.hour_count > policy.max_uploads_per_hour
            {
                state.set_cooldown(now, policy.cooldown_seconds);
                return Decision::Deny {
                    reason: DenyReason::RateLimitExceeded,
                    retry_after_secs: Some(state.cooldown_remaining_secs(now).unwrap_or(0)),
                };
            }

            Decision::Allow
        })
    }

    /// Drop idle client records
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let removed = self.counter.evict_idle(now);
        if removed > 0 {
            metrics::EVICTED_UPLOAD_CLIENTS_TOTAL.inc_by(removed as u64);
            debug!("Evicted {} idle upload clients", removed);
        }
        metrics::TRACKED_UPLOAD_CLIENTS.set(self.counter.len() as i64);
        removed
    }

    /// Per-client counters (for inspection)
    pub fn counter(&self) -> &UploadCounter {
        &self.counter
    }
}
