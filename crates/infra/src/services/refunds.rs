use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use heartbank_core::{AccountId, EntryId};
use heartbank_events::EventBus;
use heartbank_wallet::{AccountCommand, AccountEvent, EntryKind, LedgerEntry, RefundPurchase};

use super::{Ledger, LedgerEnvelope};
use crate::error::WalletError;
use crate::ledger_store::{EntryFilter, EntryPage, LedgerStore, Pagination};

/// Result of an accepted refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_entry_id: EntryId,
    /// Hearts taken back; equals the purchase amount.
    pub amount: i64,
    pub new_balance: i64,
}

/// Purchase reversals and ledger history.
pub struct RefundProcessor<S, B> {
    ledger: Arc<Ledger<S, B>>,
}

impl<S, B> Clone for RefundProcessor<S, B> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, B> RefundProcessor<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub(super) fn new(ledger: Arc<Ledger<S, B>>) -> Self {
        Self { ledger }
    }

    /// Reverse a PURCHASE entry with a REFUND entry of the negated amount.
    ///
    /// Checked in order: the entry exists and is a purchase, it belongs to
    /// `account_id`, it has not been refunded, it is inside the refund window,
    /// and the balance still covers it.
    #[instrument(
        skip_all,
        fields(account_id = %account_id, purchase_entry_id = %purchase_entry_id),
        err
    )]
    pub fn request_refund(
        &self,
        account_id: AccountId,
        purchase_entry_id: EntryId,
        reason: &str,
    ) -> Result<RefundReceipt, WalletError> {
        let purchase = self.find_purchase(account_id, purchase_entry_id)?;

        let refund_entry_id = EntryId::new();
        let out = self.ledger.execute(
            account_id,
            AccountCommand::RefundPurchase(RefundPurchase {
                account_id,
                purchase_entry_id,
                refund_entry_id,
                reason: reason.to_string(),
                policy: self.ledger.config.refund_policy(),
                occurred_at: self.ledger.now(),
            }),
        )?;

        let new_balance = out.aggregate.balance();
        info!(
            account_id = %account_id,
            purchase_entry_id = %purchase_entry_id,
            refund_entry_id = %refund_entry_id,
            amount = purchase.amount,
            new_balance,
            "purchase refunded"
        );
        Ok(RefundReceipt {
            refund_entry_id,
            amount: purchase.amount,
            new_balance,
        })
    }

    /// Entries of an account, most recent first, optionally of one kind.
    pub fn history(
        &self,
        account_id: AccountId,
        kind: Option<EntryKind>,
    ) -> Result<Vec<LedgerEntry>, WalletError> {
        let filter = EntryFilter {
            kind,
            ..Default::default()
        };
        self.newest_first(account_id, &filter)
    }

    pub fn history_page(
        &self,
        account_id: AccountId,
        filter: EntryFilter,
        pagination: Pagination,
    ) -> Result<EntryPage, WalletError> {
        let entries = self.newest_first(account_id, &filter)?;
        Ok(EntryPage::from_sorted(entries, pagination))
    }

    /// Sum of the signed amounts of `kind` entries created at or after `since`.
    pub fn totals_by_period(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        since: DateTime<Utc>,
    ) -> Result<i64, WalletError> {
        let filter = EntryFilter {
            kind: Some(kind),
            since: Some(since),
            until: None,
        };
        Ok(self
            .ledger
            .load_entries(account_id)?
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.amount)
            .sum())
    }

    fn newest_first(
        &self,
        account_id: AccountId,
        filter: &EntryFilter,
    ) -> Result<Vec<LedgerEntry>, WalletError> {
        let mut entries = self.ledger.load_entries(account_id)?;
        entries.retain(|e| filter.matches(e));
        entries.reverse();
        Ok(entries)
    }

    fn find_purchase(
        &self,
        account_id: AccountId,
        purchase_entry_id: EntryId,
    ) -> Result<LedgerEntry, WalletError> {
        let stored = self
            .ledger
            .dispatcher
            .store()
            .load_event(Uuid::from(purchase_entry_id))?
            .ok_or(WalletError::PurchaseNotFound)?;

        let event: AccountEvent = serde_json::from_value(stored.payload)
            .map_err(|e| WalletError::Deserialize(e.to_string()))?;
        let entry = event
            .into_entry()
            .filter(|e| e.kind == EntryKind::Purchase)
            .ok_or(WalletError::PurchaseNotFound)?;

        if stored.account_id != account_id || entry.account_id != account_id {
            return Err(WalletError::Unauthorized);
        }
        Ok(entry)
    }
}
