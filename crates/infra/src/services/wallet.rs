use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use heartbank_core::{AccountId, AggregateRoot, EntryId};
use heartbank_events::EventBus;
use heartbank_wallet::{
    AccountCommand, EntryKind, HeartAccount, MembershipStatus, OpenAccount, PostCredit, PostDebit,
};

use super::{Ledger, LedgerEnvelope};
use crate::error::WalletError;
use crate::ledger_store::LedgerStore;

/// Point-in-time view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub balance: i64,
    pub membership: MembershipStatus,
    pub entry_count: u64,
    /// Stream version the snapshot was read at.
    pub version: u64,
}

/// Balance and ledger entries of heart accounts.
///
/// Every successful `credit`/`debit` appends exactly one entry; a failed one
/// leaves no trace.
pub struct HeartWallet<S, B> {
    ledger: Arc<Ledger<S, B>>,
}

impl<S, B> Clone for HeartWallet<S, B> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, B> HeartWallet<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub(super) fn new(ledger: Arc<Ledger<S, B>>) -> Self {
        Self { ledger }
    }

    /// Register an account, crediting the configured signup bonus.
    #[instrument(skip_all, fields(account_id = %account_id), err)]
    pub fn open_account(&self, account_id: AccountId) -> Result<i64, WalletError> {
        let signup_bonus = self.ledger.config.signup_bonus;
        let out = self.ledger.execute(
            account_id,
            AccountCommand::OpenAccount(OpenAccount {
                account_id,
                signup_bonus,
                bonus_entry_id: EntryId::new(),
                occurred_at: self.ledger.now(),
            }),
        )?;

        info!(account_id = %account_id, signup_bonus, "account opened");
        Ok(out.aggregate.balance())
    }

    /// Add `amount` hearts as a BONUS or PURCHASE entry; returns the new balance.
    #[instrument(skip_all, fields(account_id = %account_id, amount = amount, kind = %kind), err)]
    pub fn credit(
        &self,
        account_id: AccountId,
        amount: i64,
        kind: EntryKind,
        reason: &str,
    ) -> Result<i64, WalletError> {
        let entry_id = EntryId::new();
        let out = self.ledger.execute(
            account_id,
            AccountCommand::PostCredit(PostCredit {
                account_id,
                entry_id,
                kind,
                amount,
                reason: reason.to_string(),
                occurred_at: self.ledger.now(),
            }),
        )?;

        let balance = out.aggregate.balance();
        info!(account_id = %account_id, entry_id = %entry_id, amount, balance, "hearts credited");
        Ok(balance)
    }

    /// Remove `amount` hearts as a SPEND entry; returns the new balance.
    ///
    /// Fails with `InsufficientBalance` when the balance at decision time is
    /// below `amount`.
    #[instrument(skip_all, fields(account_id = %account_id, amount = amount, kind = %kind), err)]
    pub fn debit(
        &self,
        account_id: AccountId,
        amount: i64,
        kind: EntryKind,
        reason: &str,
    ) -> Result<i64, WalletError> {
        let entry_id = EntryId::new();
        let out = self.ledger.execute(
            account_id,
            AccountCommand::PostDebit(PostDebit {
                account_id,
                entry_id,
                kind,
                amount,
                reason: reason.to_string(),
                occurred_at: self.ledger.now(),
            }),
        )?;

        let balance = out.aggregate.balance();
        info!(account_id = %account_id, entry_id = %entry_id, amount, balance, "hearts debited");
        Ok(balance)
    }

    pub fn balance(&self, account_id: AccountId) -> Result<i64, WalletError> {
        Ok(self.ledger.load_open_account(account_id)?.balance())
    }

    pub fn account(&self, account_id: AccountId) -> Result<AccountSnapshot, WalletError> {
        let account: HeartAccount = self.ledger.load_open_account(account_id)?;
        Ok(AccountSnapshot {
            account_id,
            balance: account.balance(),
            membership: account.membership().status(self.ledger.now()),
            entry_count: account.entry_count(),
            version: account.version(),
        })
    }
}
