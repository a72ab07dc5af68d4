//! Bridge health state machine.
//!
//! Mirrors the state diagram in spec.md §4.2: `offline → starting →
//! healthy`, with excursions into `flood_wait`, `error`, and the terminal
//! `banned`. The transition out of `flood_wait` back to `healthy` is lazy —
//! it fires the next time `is_healthy`/`status` is queried once wall-clock
//! passes `flood_until`, not on a background timer, matching the original's
//! observed behavior (spec.md §9 open question 2).

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Consecutive errors before a healthy bridge is demoted to `error`.
pub const ERROR_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    Offline,
    Starting,
    Healthy,
    FloodWait,
    Error,
    Banned,
}

impl std::fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BridgeStatus::Offline => "offline",
            BridgeStatus::Starting => "starting",
            BridgeStatus::Healthy => "healthy",
            BridgeStatus::FloodWait => "flood_wait",
            BridgeStatus::Error => "error",
            BridgeStatus::Banned => "banned",
        };
        write!(f, "{s}")
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Thread-safe health state for one bridge. Plain atomics rather than a
/// `Mutex<BridgeStatus>` since every transition is a single compare/update
/// and bridges are queried far more often than they transition.
#[derive(Debug)]
pub struct Health {
    raw_status: AtomicU32,
    flood_until: AtomicI64,
    error_count: AtomicU32,
    last_error: std::sync::Mutex<Option<String>>,
}

fn encode(status: BridgeStatus) -> u32 {
    status as u32
}

fn decode(raw: u32) -> BridgeStatus {
    match raw {
        0 => BridgeStatus::Offline,
        1 => BridgeStatus::Starting,
        2 => BridgeStatus::Healthy,
        3 => BridgeStatus::FloodWait,
        4 => BridgeStatus::Error,
        _ => BridgeStatus::Banned,
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}

impl Health {
    pub fn new() -> Self {
        Self {
            raw_status: AtomicU32::new(encode(BridgeStatus::Offline)),
            flood_until: AtomicI64::new(0),
            error_count: AtomicU32::new(0),
            last_error: std::sync::Mutex::new(None),
        }
    }

    /// Current status, lazily resolving an expired flood-wait back to
    /// `healthy` as a side effect — this is the one place the "transition
    /// observed on next query" rule from spec.md §4.2 is implemented.
    pub fn status(&self) -> BridgeStatus {
        let raw = decode(self.raw_status.load(Ordering::SeqCst));
        if raw == BridgeStatus::FloodWait && now_unix() >= self.flood_until.load(Ordering::SeqCst) {
            // CAS so two concurrent queries racing this resolution don't
            // both fight over who "owns" the transition; either winner
            // observes the same post-condition.
            let _ = self.raw_status.compare_exchange(
                encode(BridgeStatus::FloodWait),
                encode(BridgeStatus::Healthy),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            return BridgeStatus::Healthy;
        }
        raw
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == BridgeStatus::Healthy
    }

    pub fn flood_until(&self) -> i64 {
        self.flood_until.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("health mutex poisoned").clone()
    }

    pub fn mark_starting(&self) {
        self.raw_status.store(encode(BridgeStatus::Starting), Ordering::SeqCst);
    }

    /// A successful protocol call. Resets the error counter and promotes
    /// `error` back to `healthy`; does not touch an active flood-wait —
    /// shortening it would contradict the rate limit Telegram imposed.
    pub fn mark_success(&self) {
        self.error_count.store(0, Ordering::SeqCst);
        let current = decode(self.raw_status.load(Ordering::SeqCst));
        if current == BridgeStatus::Error || current == BridgeStatus::Starting || current == BridgeStatus::Offline {
            self.raw_status.store(encode(BridgeStatus::Healthy), Ordering::SeqCst);
        }
    }

    /// Increment the error counter and demote to `error` at threshold.
    /// Never touches `banned`, which is terminal.
    pub fn mark_error(&self, detail: impl Into<String>) {
        *self.last_error.lock().expect("health mutex poisoned") = Some(detail.into());
        if self.status() == BridgeStatus::Banned {
            return;
        }
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= ERROR_THRESHOLD {
            self.raw_status.store(encode(BridgeStatus::Error), Ordering::SeqCst);
        }
    }

    pub fn mark_flood(&self, seconds: u32) {
        self.flood_until.store(now_unix() + seconds as i64, Ordering::SeqCst);
        self.raw_status.store(encode(BridgeStatus::FloodWait), Ordering::SeqCst);
    }

    /// Terminal until an administrator calls [`Health::admin_reset`].
    pub fn mark_banned(&self, detail: impl Into<String>) {
        *self.last_error.lock().expect("health mutex poisoned") = Some(detail.into());
        self.raw_status.store(encode(BridgeStatus::Banned), Ordering::SeqCst);
    }

    /// Administrator intervention: the only way out of `banned`.
    pub fn admin_reset(&self) {
        self.error_count.store(0, Ordering::SeqCst);
        self.flood_until.store(0, Ordering::SeqCst);
        self.raw_status.store(encode(BridgeStatus::Offline), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_offline() {
        let h = Health::new();
        assert_eq!(h.status(), BridgeStatus::Offline);
        assert!(!h.is_healthy());
    }

    #[test]
    fn success_after_starting_becomes_healthy() {
        let h = Health::new();
        h.mark_starting();
        h.mark_success();
        assert_eq!(h.status(), BridgeStatus::Healthy);
    }

    #[test]
    fn error_threshold_demotes_to_error() {
        let h = Health::new();
        h.mark_starting();
        h.mark_success();
        for _ in 0..ERROR_THRESHOLD - 1 {
            h.mark_error("boom");
            assert_eq!(h.status(), BridgeStatus::Healthy);
        }
        h.mark_error("boom");
        assert_eq!(h.status(), BridgeStatus::Error);
    }

    #[test]
    fn success_clears_error_state() {
        let h = Health::new();
        h.mark_starting();
        h.mark_success();
        for _ in 0..ERROR_THRESHOLD {
            h.mark_error("boom");
        }
        assert_eq!(h.status(), BridgeStatus::Error);
        h.mark_success();
        assert_eq!(h.status(), BridgeStatus::Healthy);
        assert_eq!(h.error_count(), 0);
    }

    #[test]
    fn flood_wait_is_not_healthy_until_expiry() {
        let h = Health::new();
        h.mark_starting();
        h.mark_success();
        h.mark_flood(0);
        // seconds=0 means flood_until == now, so the very next query should
        // already observe expiry and flip back to healthy.
        assert!(h.is_healthy());
    }

    #[test]
    fn flood_wait_blocks_until_deadline() {
        let h = Health::new();
        h.mark_starting();
        h.mark_success();
        h.mark_flood(3600);
        assert!(!h.is_healthy());
        assert_eq!(h.status(), BridgeStatus::FloodWait);
    }

    #[test]
    fn success_does_not_shorten_active_flood_wait() {
        let h = Health::new();
        h.mark_starting();
        h.mark_success();
        h.mark_flood(3600);
        h.mark_success();
        assert_eq!(h.status(), BridgeStatus::FloodWait);
    }

    #[test]
    fn banned_is_terminal_until_admin_reset() {
        let h = Health::new();
        h.mark_starting();
        h.mark_success();
        h.mark_banned("account deactivated");
        h.mark_success();
        assert_eq!(h.status(), BridgeStatus::Banned);
        h.mark_error("whatever");
        assert_eq!(h.status(), BridgeStatus::Banned);
        h.admin_reset();
        assert_eq!(h.status(), BridgeStatus::Offline);
    }
}
