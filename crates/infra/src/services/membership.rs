use std::sync::Arc;

use tracing::{info, instrument};

use heartbank_core::{AccountId, EntryId};
use heartbank_events::EventBus;
use heartbank_wallet::{AccountCommand, CancelMembership, MembershipStatus, PlanTier, Subscribe};

use super::{Ledger, LedgerEnvelope};
use crate::error::WalletError;
use crate::ledger_store::LedgerStore;

/// VIP membership lifecycle.
///
/// Whether a membership is in effect is always evaluated against the clock at
/// read time; nothing expires in the background.
pub struct MembershipManager<S, B> {
    ledger: Arc<Ledger<S, B>>,
}

impl<S, B> Clone for MembershipManager<S, B> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, B> MembershipManager<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub(super) fn new(ledger: Arc<Ledger<S, B>>) -> Self {
        Self { ledger }
    }

    /// Activate (or overwrite) a membership and grant the plan's bonus.
    #[instrument(skip_all, fields(account_id = %account_id, tier = %tier), err)]
    pub fn subscribe(
        &self,
        account_id: AccountId,
        tier: PlanTier,
    ) -> Result<MembershipStatus, WalletError> {
        let plan = self.ledger.config.plans.get(tier)?;
        let now = self.ledger.now();

        let out = self.ledger.execute(
            account_id,
            AccountCommand::Subscribe(Subscribe {
                account_id,
                plan,
                bonus_entry_id: EntryId::new(),
                occurred_at: now,
            }),
        )?;

        info!(
            account_id = %account_id,
            tier = %tier,
            bonus = plan.bonus_amount,
            balance = out.aggregate.balance(),
            "membership activated"
        );
        Ok(out.aggregate.membership().status(now))
    }

    /// `subscribe` for a tier given by name, e.g. from a request payload.
    pub fn subscribe_named(
        &self,
        account_id: AccountId,
        tier: &str,
    ) -> Result<MembershipStatus, WalletError> {
        let tier: PlanTier = tier.parse()?;
        self.subscribe(account_id, tier)
    }

    /// End the membership now. Cancelling an inactive membership is a no-op.
    #[instrument(skip_all, fields(account_id = %account_id), err)]
    pub fn cancel(&self, account_id: AccountId) -> Result<MembershipStatus, WalletError> {
        let now = self.ledger.now();
        let out = self.ledger.execute(
            account_id,
            AccountCommand::CancelMembership(CancelMembership {
                account_id,
                occurred_at: now,
            }),
        )?;

        if !out.committed.is_empty() {
            info!(account_id = %account_id, "membership cancelled");
        }
        Ok(out.aggregate.membership().status(now))
    }

    pub fn status(&self, account_id: AccountId) -> Result<MembershipStatus, WalletError> {
        let account = self.ledger.load_open_account(account_id)?;
        Ok(account.membership().status(self.ledger.now()))
    }
}
