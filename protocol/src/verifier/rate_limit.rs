//! Per-address verification rate limit: one attempt per window.
//!
//! Entries older than the window are swept out at most once per window, so
//! the map holds roughly the addresses seen in the last two windows.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use tracing::debug;

use crate::identity::Address;

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    last_attempt: DashMap<Address, DateTime<Utc>>,
    last_sweep_ms: AtomicI64,
}

impl RateLimiter {
    /// A zero window never limits.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_attempt: DashMap::new(),
            last_sweep_ms: AtomicI64::new(i64::MIN),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Addresses currently remembered.
    pub fn tracked(&self) -> usize {
        self.last_attempt.len()
    }

    /// Time left before `address` may try again, without consuming anything.
    pub fn retry_after(&self, address: &Address, now: DateTime<Utc>) -> Option<Duration> {
        let last = *self.last_attempt.get(address)?;
        self.remaining(last, now)
    }

    /// Take the slot for `address`, or report how long until it frees up.
    pub fn try_acquire(&self, address: &Address, now: DateTime<Utc>) -> Result<(), Duration> {
        if self.window.is_zero() {
            return Ok(());
        }
        self.sweep(now);
        match self.last_attempt.entry(*address) {
            Entry::Occupied(mut slot) => {
                if let Some(wait) = self.remaining(*slot.get(), now) {
                    return Err(wait);
                }
                slot.insert(now);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(())
            }
        }
    }

    /// Drop every entry whose window has closed, once per window.
    fn sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if last != i64::MIN && now_ms.saturating_sub(last) < window_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let before = self.last_attempt.len();
        self.last_attempt.retain(|_, last| self.remaining(*last, now).is_some());
        let swept = before.saturating_sub(self.last_attempt.len());
        if swept > 0 {
            debug!(swept, remaining = self.last_attempt.len(), "rate limiter swept expired entries");
        }
    }

    fn remaining(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.window.checked_sub(elapsed).filter(|d| !d.is_zero())
    }
}
