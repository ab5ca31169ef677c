//! Membership (VIP) plans and effective-state computation.
//!
//! The stored `Membership` is never trusted on its own: whether a member is
//! VIP right now is always `is_active && expires_at > now`, evaluated at read
//! time.

use core::str::FromStr;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use heartbank_core::DomainError;

/// Length of one subscription period.
pub const MEMBERSHIP_DURATION_DAYS: i64 = 30;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanTier {
    Basic,
    Premium,
    Platinum,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [PlanTier::Basic, PlanTier::Premium, PlanTier::Platinum];

    pub fn as_str(self) -> &'static str {
        match self {
            PlanTier::Basic => "BASIC",
            PlanTier::Premium => "PREMIUM",
            PlanTier::Platinum => "PLATINUM",
        }
    }
}

impl core::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BASIC" => Ok(PlanTier::Basic),
            "PREMIUM" => Ok(PlanTier::Premium),
            "PLATINUM" => Ok(PlanTier::Platinum),
            _ => Err(DomainError::invalid_tier(s)),
        }
    }
}

/// Static catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPlan {
    pub tier: PlanTier,
    pub bonus_amount: i64,
    pub duration_days: i64,
}

impl MembershipPlan {
    pub fn new(tier: PlanTier, bonus_amount: i64) -> Self {
        Self {
            tier,
            bonus_amount,
            duration_days: MEMBERSHIP_DURATION_DAYS,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(self.duration_days)
    }

    /// Reason recorded on the bonus ledger entry.
    pub fn bonus_reason(&self) -> String {
        format!("{} subscription bonus", self.tier)
    }
}

/// Read-only plan catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCatalog {
    plans: BTreeMap<PlanTier, MembershipPlan>,
}

impl PlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = MembershipPlan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.tier, p)).collect(),
        }
    }

    pub fn get(&self, tier: PlanTier) -> Result<MembershipPlan, DomainError> {
        self.plans
            .get(&tier)
            .copied()
            .ok_or_else(|| DomainError::invalid_tier(tier.as_str()))
    }

    pub fn plans(&self) -> impl Iterator<Item = &MembershipPlan> {
        self.plans.values()
    }

    /// Replace (or add) the bonus for a tier.
    pub fn with_bonus(mut self, tier: PlanTier, bonus_amount: i64) -> Self {
        self.plans.insert(tier, MembershipPlan::new(tier, bonus_amount));
        self
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new([
            MembershipPlan::new(PlanTier::Basic, 0),
            MembershipPlan::new(PlanTier::Premium, 500),
            MembershipPlan::new(PlanTier::Platinum, 1500),
        ])
    }
}

/// Stored membership state, embedded in the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Membership {
    pub is_active: bool,
    pub tier: Option<PlanTier>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Effective lifecycle phase at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipPhase {
    None,
    Active,
    Expired,
}

/// What callers see when asking about a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipStatus {
    pub is_vip_effective: bool,
    pub phase: MembershipPhase,
    pub tier: Option<PlanTier>,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: u32,
}

impl Membership {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_some_and(|expires_at| expires_at > now)
    }

    pub fn phase(&self, now: DateTime<Utc>) -> MembershipPhase {
        if self.is_effective(now) {
            MembershipPhase::Active
        } else if self.is_active {
            MembershipPhase::Expired
        } else {
            MembershipPhase::None
        }
    }

    /// Whole days left, rounded up; 0 when not effective.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> u32 {
        if !self.is_effective(now) {
            return 0;
        }
        let Some(expires_at) = self.expires_at else {
            return 0;
        };
        let left = expires_at - now;
        let whole = left.num_days();
        let days = if left > Duration::days(whole) { whole + 1 } else { whole };
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    pub fn status(&self, now: DateTime<Utc>) -> MembershipStatus {
        MembershipStatus {
            is_vip_effective: self.is_effective(now),
            phase: self.phase(now),
            tier: self.tier,
            expires_at: self.expires_at,
            days_remaining: self.days_remaining(now),
        }
    }
}
