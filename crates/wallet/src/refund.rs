use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use heartbank_core::DomainError;

pub const DEFAULT_REFUND_WINDOW_DAYS: i64 = 7;

/// Time-bounded refund eligibility.
///
/// A purchase may be reversed while `now - created_at <= window`; one second
/// past the window is too late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    window_seconds: i64,
}

impl RefundPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            window_seconds: window.num_seconds(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds)
    }

    pub fn is_within_window(&self, purchased_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - purchased_at <= self.window()
    }

    pub fn check(&self, purchased_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.is_within_window(purchased_at, now) {
            Ok(())
        } else {
            Err(DomainError::RefundWindowExpired)
        }
    }
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_REFUND_WINDOW_DAYS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_seven_days_is_still_refundable() {
        let t = Utc::now();
        let policy = RefundPolicy::default();
        assert!(policy.check(t, t + Duration::days(7)).is_ok());
    }

    #[test]
    fn one_second_past_the_window_is_rejected() {
        let t = Utc::now();
        let policy = RefundPolicy::default();
        assert_eq!(
            policy.check(t, t + Duration::days(7) + Duration::seconds(1)),
            Err(DomainError::RefundWindowExpired)
        );
    }

    #[test]
    fn custom_window() {
        let t = Utc::now();
        let policy = RefundPolicy::new(Duration::hours(1));
        assert!(policy.is_within_window(t, t + Duration::minutes(59)));
        assert!(!policy.is_within_window(t, t + Duration::minutes(61)));
    }
}
