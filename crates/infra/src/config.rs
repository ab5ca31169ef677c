//! Ledger configuration.
//!
//! Defaults are the production values; every knob can be overridden from the
//! environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HEARTBANK_MAX_ATTEMPTS` | 5 |
//! | `HEARTBANK_REFUND_WINDOW_DAYS` | 7 |
//! | `HEARTBANK_SIGNUP_BONUS` | 0 |
//! | `HEARTBANK_BONUS_BASIC` | 0 |
//! | `HEARTBANK_BONUS_PREMIUM` | 500 |
//! | `HEARTBANK_BONUS_PLATINUM` | 1500 |

use anyhow::{Context, ensure};
use chrono::Duration;

use heartbank_wallet::{DEFAULT_REFUND_WINDOW_DAYS, PlanCatalog, PlanTier, RefundPolicy};

use crate::dispatcher::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Attempts per operation before reporting a concurrent modification.
    pub max_attempts: u32,
    pub refund_window: Duration,
    /// Hearts credited when an account is opened; zero for none.
    pub signup_bonus: i64,
    pub plans: PlanCatalog,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: RetryPolicy::default().max_attempts,
            refund_window: Duration::days(DEFAULT_REFUND_WINDOW_DAYS),
            signup_bonus: 0,
            plans: PlanCatalog::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(attempts) = parse::<u32>(&lookup, "HEARTBANK_MAX_ATTEMPTS")? {
            ensure!(attempts >= 1, "HEARTBANK_MAX_ATTEMPTS must be at least 1");
            config.max_attempts = attempts;
        }

        if let Some(days) = parse::<i64>(&lookup, "HEARTBANK_REFUND_WINDOW_DAYS")? {
            ensure!(days >= 0, "HEARTBANK_REFUND_WINDOW_DAYS must not be negative");
            config.refund_window = Duration::try_days(days).with_context(|| {
                format!("HEARTBANK_REFUND_WINDOW_DAYS out of range: {days}")
            })?;
        }

        if let Some(bonus) = parse::<i64>(&lookup, "HEARTBANK_SIGNUP_BONUS")? {
            ensure!(bonus >= 0, "HEARTBANK_SIGNUP_BONUS must not be negative");
            config.signup_bonus = bonus;
        }

        for tier in PlanTier::ALL {
            let key = format!("HEARTBANK_BONUS_{tier}");
            if let Some(bonus) = parse::<i64>(&lookup, &key)? {
                ensure!(bonus >= 0, "{key} must not be negative");
                config.plans = config.plans.with_bonus(tier, bonus);
            }
        }

        Ok(config)
    }

    pub fn refund_policy(&self) -> RefundPolicy {
        RefundPolicy::new(self.refund_window)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: core::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}
