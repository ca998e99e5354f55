//! Upload Counter
//!
//! Per-client fixed-window counters and cooldown timestamps.
//!
//! Each client owns one [`ClientUploadState`] behind its own mutex, so attempts
//! from the same client are serialized while different clients proceed in
//! parallel. The map itself is only write-locked to insert a new client or to
//! drop idle ones.
//!
//! Windows are fixed, not sliding: a burst straddling a window boundary can be
//! accepted twice over.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Length of the short window in seconds
pub const MINUTE_WINDOW_SECS: i64 = 60;

/// Length of the long window in seconds
pub const HOUR_WINDOW_SECS: i64 = 3600;

/// Counts observed by one attempt (post-increment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountsSnapshot {
    pub minute_count: u32,
    pub hour_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Upload bookkeeping for a single client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientUploadState {
    pub minute_window_start: DateTime<Utc>,
    pub minute_count: u32,
    pub hour_window_start: DateTime<Utc>,
    pub hour_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl ClientUploadState {
    /// Fresh state with both windows opening at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            minute_window_start: now,
            minute_count: 0,
            hour_window_start: now,
            hour_count: 0,
            cooldown_until: None,
        }
    }

    /// Count one attempt, rolling expired windows first
    pub fn record_attempt(&mut self, now: DateTime<Utc>) -> CountsSnapshot {
        if window_expired(self.minute_window_start, MINUTE_WINDOW_SECS, now) {
            self.minute_window_start = now;
            self.minute_count = 0;
        }
        if window_expired(self.hour_window_start, HOUR_WINDOW_SECS, now) {
            self.hour_window_start = now;
            self.hour_count = 0;
        }

        self.minute_count = self.minute_count.saturating_add(1);
        self.hour_count = self.hour_count.saturating_add(1);
        self.snapshot()
    }

    /// True while a cooldown is armed and has not yet elapsed
    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(until) if now < until)
    }

    /// Arm a cooldown of `duration_secs` from `now`.
    ///
    /// Never shortens an active cooldown. A zero duration is a no-op since
    /// the cooldown would already have elapsed.
    pub fn set_cooldown(&mut self, now: DateTime<Utc>, duration_secs: u64) {
        if duration_secs == 0 {
            return;
        }
        let until = add_secs(now, duration_secs);
        match self.cooldown_until {
            Some(current) if current >= until => {}
            _ => self.cooldown_until = Some(until),
        }
    }

    /// Seconds until the cooldown elapses (rounded up), if one is active
    pub fn cooldown_remaining_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        let until = self.cooldown_until.filter(|until| now < *until)?;
        let millis = (until - now).num_milliseconds().max(0) as u64;
        Some(millis.div_ceil(1000))
    }

    /// Both windows expired and no cooldown pending.
    ///
    /// Dropping an idle state is unobservable: the next attempt would reset
    /// both windows anyway.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        window_expired(self.minute_window_start, MINUTE_WINDOW_SECS, now)
            && window_expired(self.hour_window_start, HOUR_WINDOW_SECS, now)
            && !self.is_in_cooldown(now)
    }

    /// Current counts without recording anything
    pub fn snapshot(&self) -> CountsSnapshot {
        CountsSnapshot {
            minute_count: self.minute_count,
            hour_count: self.hour_count,
            cooldown_until: self.cooldown_until,
        }
    }
}

fn window_expired(start: DateTime<Utc>, length_secs: i64, now: DateTime<Utc>) -> bool {
    now >= start + Duration::seconds(length_secs)
}

fn add_secs(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

type ClientSlot = Arc<Mutex<ClientUploadState>>;

fn lock_slot(slot: &ClientSlot) -> MutexGuard<'_, ClientUploadState> {
    // Updates are plain field assignments; a poisoned state is still whole
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-client upload counters
#[derive(Debug, Clone, Default)]
pub struct UploadCounter {
    clients: Arc<RwLock<HashMap<String, ClientSlot>>>,
}

impl UploadCounter {
    /// Create an empty counter
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_slot(&self, client_id: &str) -> Option<ClientSlot> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(client_id).cloned()
    }

    fn slot(&self, client_id: &str, now: DateTime<Utc>) -> ClientSlot {
        if let Some(slot) = self.existing_slot(client_id) {
            return slot;
        }
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientUploadState::new(now))))
            .clone()
    }

    /// Run `f` with exclusive access to a client's state, creating it lazily.
    ///
    /// Everything done inside `f` is atomic with respect to other attempts
    /// from the same client.
    pub fn with_client<R>(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut ClientUploadState) -> R,
    ) -> R {
        let slot = self.slot(client_id, now);
        let mut state = lock_slot(&slot);
        f(&mut state)
    }

    /// Count one attempt for `client_id`
    pub fn record_attempt(&self, client_id: &str, now: DateTime<Utc>) -> CountsSnapshot {
        self.with_client(client_id, now, |state| state.record_attempt(now))
    }

    /// Whether `client_id` is locked out at `now`
    pub fn is_in_cooldown(&self, client_id: &str, now: DateTime<Utc>) -> bool {
        let Some(slot) = self.existing_slot(client_id) else {
            return false;
        };
        let in_cooldown = lock_slot(&slot).is_in_cooldown(now);
        in_cooldown
    }

    /// Arm (or extend) a cooldown for `client_id`
    pub fn set_cooldown(&self, client_id: &str, now: DateTime<Utc>, duration_secs: u64) {
        self.with_client(client_id, now, |state| state.set_cooldown(now, duration_secs));
    }

    /// Copy of a client's state, if tracked
    pub fn state(&self, client_id: &str) -> Option<ClientUploadState> {
        let slot = self.existing_slot(client_id)?;
        let state = lock_slot(&slot).clone();
        Some(state)
    }

    /// Drop idle clients, returning how many were removed.
    ///
    /// Entries currently borrowed by an attempt are skipped; the map is only
    /// write-locked for the removal pass.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let candidates: Vec<String> = {
            let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
            clients
                .iter()
                .filter(|(_, slot)| Self::evictable(slot, now))
                .map(|(id, _)| id.clone())
                .collect()
        };

        if candidates.is_empty() {
            return 0;
        }

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for id in candidates {
            // Re-check: the client may have come back between the passes
            let still_idle = clients
                .get(&id)
                .map(|slot| Self::evictable(slot, now))
                .unwrap_or(false);
            if still_idle {
                clients.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    fn evictable(slot: &ClientSlot, now: DateTime<Utc>) -> bool {
        // Any clone outside the map means an attempt is in flight
        if Arc::strong_count(slot) > 1 {
            return false;
        }
        match slot.try_lock() {
            Ok(state) => state.is_idle(now),
            Err(_) => false,
        }
    }

    /// Number of tracked clients
    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no client is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
