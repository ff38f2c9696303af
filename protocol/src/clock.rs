//! # Clocks
//!
//! The escrow reads time only through [`Clock`]. Timestamps are Unix
//! seconds as `u64`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Host time source.
pub trait Clock: Send + Sync {
    /// Current time in Unix seconds. Never decreases between calls on the
    /// same clock.
    fn now(&self) -> u64;
}

/// Wall-clock time from the system, clamped so it never runs backwards
/// (NTP steps, VM migrations) within one process.
#[derive(Debug, Default)]
pub struct SystemClock {
    high_water: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        let wall = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        let previous = self.high_water.fetch_max(wall, Ordering::SeqCst);
        previous.max(wall)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn at(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Jump to `now`. Ignored if it would move the clock backwards.
    pub fn set(&self, now: u64) {
        self.now.fetch_max(now, Ordering::SeqCst);
    }

    /// Move forward by `secs`, saturating at `u64::MAX`.
    pub fn advance(&self, secs: u64) {
        // fetch_update only fails if the closure returns None.
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(secs))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
