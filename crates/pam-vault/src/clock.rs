//! Wall-clock source shared by the store and the access workflow.
//!
//! Ticket expiry is evaluated lazily by comparing `now` against an absolute
//! `expires_at`, so every component must read time from the same
//! non-decreasing source.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Highest timestamp (microseconds) handed out by any [`SystemClock`].
static LAST_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// System wall clock that never steps backwards within the process.
///
/// If the OS clock is adjusted backwards, readings hold at the last value
/// returned until real time catches up.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let observed = Utc::now().timestamp_micros();
        let previous = LAST_MICROS.fetch_max(observed, Ordering::AcqRel);
        let micros = observed.max(previous);
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }
}

/// A hand-driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
