//! Wall-clock abstraction.
//!
//! Domain code never reads the clock directly; services stamp commands with
//! `Clock::now()` so refund windows and membership expiry can be tested
//! deterministically.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for tests and simulations.
///
/// Time only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += by;
        }
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut current) = self.current.lock() {
            *current = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::days(2));
        assert_eq!(clock.now(), start + Duration::days(2));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn clones_share_the_same_instant() {
        let clock = ManualClock::new(Utc::now());
        let shared = clock.clone();
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), shared.now());
    }
}
