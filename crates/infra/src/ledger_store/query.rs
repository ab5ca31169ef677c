//! Ledger entry queries for history screens and audits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use heartbank_wallet::{EntryKind, LedgerEntry};

/// Pagination parameters for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of entries to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria for ledger entries. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub kind: Option<EntryKind>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn kind(kind: EntryKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.kind.is_none_or(|k| entry.kind == k)
            && self.since.is_none_or(|since| entry.created_at >= since)
            && self.until.is_none_or(|until| entry.created_at < until)
    }
}

/// One page of ledger entries, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPage {
    pub entries: Vec<LedgerEntry>,
    /// Number of entries matching the filter across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl EntryPage {
    /// Cut a page out of entries that are already newest-first and filtered.
    pub fn from_sorted(entries: Vec<LedgerEntry>, pagination: Pagination) -> Self {
        let total = entries.len() as u64;
        let offset = pagination.offset as usize;
        let limit = pagination.limit as usize;
        let page: Vec<LedgerEntry> = entries.into_iter().skip(offset).take(limit).collect();
        let has_more = (offset + page.len()) < total as usize;

        Self {
            entries: page,
            total,
            pagination,
            has_more,
        }
    }
}
