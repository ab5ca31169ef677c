use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use heartbank_core::{AccountId, EntryId};

/// Origin of a ledger entry. Classifies where hearts came from or went to, not the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Bonus,
    Purchase,
    Spend,
    Refund,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Bonus => "BONUS",
            EntryKind::Purchase => "PURCHASE",
            EntryKind::Spend => "SPEND",
            EntryKind::Refund => "REFUND",
        }
    }

    /// Kinds a plain credit may carry.
    pub fn is_creditable(self) -> bool {
        matches!(self, EntryKind::Bonus | EntryKind::Purchase)
    }

    /// Kinds a plain debit may carry. Refunds go through `RefundPurchase`.
    pub fn is_debitable(self) -> bool {
        matches!(self, EntryKind::Spend)
    }
}

impl core::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable, signed, balance-changing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub kind: EntryKind,
    /// Positive for credits, negative for debits.
    pub amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// Purchase entry this entry reverses (REFUND entries only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<EntryId>,
}

impl LedgerEntry {
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}
