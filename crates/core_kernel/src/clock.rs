//! Access to the current instant
//!
//! Services ask a [`Clock`] instead of calling `Utc::now()` so that cascades
//! keyed on "the current month" stay deterministic under test.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to an instant that tests can move
#[derive(Debug, Clone)]
pub struct FixedClock(Arc<Mutex<DateTime<Utc>>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    /// Midnight UTC on the given day; falls back to the epoch for an invalid date
    pub fn on(year: i32, month: u32, day: u32) -> Self {
        let at = Utc
            .with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Self::new(at)
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = at;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.0.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_moves_only_when_set() {
        let clock = FixedClock::on(2024, 3, 15);
        let first = clock.now();
        assert_eq!(first, clock.now());

        let later = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
