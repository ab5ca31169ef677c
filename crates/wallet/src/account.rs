use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use heartbank_core::{AccountId, Aggregate, AggregateRoot, DomainError, EntryId};
use heartbank_events::Event;

use crate::entry::{EntryKind, LedgerEntry};
use crate::membership::{Membership, MembershipPlan, PlanTier};
use crate::refund::RefundPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PurchaseRecord {
    amount: i64,
    created_at: DateTime<Utc>,
    refunded: bool,
}

/// Aggregate root: HeartAccount.
///
/// Holds the balance, the embedded membership, and enough purchase history to
/// decide refunds. All of it is rebuilt from the account's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartAccount {
    id: AccountId,
    opened: bool,
    balance: i64,
    membership: Membership,
    purchases: HashMap<EntryId, PurchaseRecord>,
    entry_count: u64,
    version: u64,
}

impl HeartAccount {
    /// Empty aggregate for rehydration.
    pub fn empty(id: AccountId) -> Self {
        Self {
            id,
            opened: false,
            balance: 0,
            membership: Membership::none(),
            purchases: HashMap::new(),
            entry_count: 0,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    /// Number of ledger entries applied so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_refunded(&self, purchase_entry_id: EntryId) -> bool {
        self.purchases
            .get(&purchase_entry_id)
            .is_some_and(|p| p.refunded)
    }
}

impl AggregateRoot for HeartAccount {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount (user registration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub account_id: AccountId,
    /// Hearts granted at signup; zero for none.
    pub signup_bonus: i64,
    pub bonus_entry_id: EntryId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostCredit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCredit {
    pub account_id: AccountId,
    pub entry_id: EntryId,
    pub kind: EntryKind,
    pub amount: i64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostDebit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDebit {
    pub account_id: AccountId,
    pub entry_id: EntryId,
    pub kind: EntryKind,
    pub amount: i64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Subscribe (activate or overwrite a membership).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribe {
    pub account_id: AccountId,
    pub plan: MembershipPlan,
    pub bonus_entry_id: EntryId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelMembership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMembership {
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundPurchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPurchase {
    pub account_id: AccountId,
    pub purchase_entry_id: EntryId,
    pub refund_entry_id: EntryId,
    pub reason: String,
    pub policy: RefundPolicy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccount),
    PostCredit(PostCredit),
    PostDebit(PostDebit),
    Subscribe(Subscribe),
    CancelMembership(CancelMembership),
    RefundPurchase(RefundPurchase),
}

impl AccountCommand {
    pub fn account_id(&self) -> AccountId {
        match self {
            AccountCommand::OpenAccount(c) => c.account_id,
            AccountCommand::PostCredit(c) => c.account_id,
            AccountCommand::PostDebit(c) => c.account_id,
            AccountCommand::Subscribe(c) => c.account_id,
            AccountCommand::CancelMembership(c) => c.account_id,
            AccountCommand::RefundPurchase(c) => c.account_id,
        }
    }
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MembershipActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipActivated {
    pub account_id: AccountId,
    pub tier: PlanTier,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MembershipCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipCancelled {
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    EntryPosted(LedgerEntry),
    MembershipActivated(MembershipActivated),
    MembershipCancelled(MembershipCancelled),
}

impl AccountEvent {
    pub fn as_entry(&self) -> Option<&LedgerEntry> {
        match self {
            AccountEvent::EntryPosted(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn into_entry(self) -> Option<LedgerEntry> {
        match self {
            AccountEvent::EntryPosted(entry) => Some(entry),
            _ => None,
        }
    }
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => "wallet.account.opened",
            AccountEvent::EntryPosted(_) => "wallet.entry.posted",
            AccountEvent::MembershipActivated(_) => "wallet.membership.activated",
            AccountEvent::MembershipCancelled(_) => "wallet.membership.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountOpened(e) => e.occurred_at,
            AccountEvent::EntryPosted(e) => e.created_at,
            AccountEvent::MembershipActivated(e) => e.occurred_at,
            AccountEvent::MembershipCancelled(e) => e.occurred_at,
        }
    }

    fn natural_id(&self) -> Option<Uuid> {
        self.as_entry().map(|e| Uuid::from(e.id))
    }

    fn unique_key(&self) -> Option<String> {
        self.as_entry()
            .and_then(|e| e.reverses)
            .map(|purchase| format!("refund:{purchase}"))
    }
}

impl Aggregate for HeartAccount {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.opened = true;
            }
            AccountEvent::EntryPosted(e) => {
                self.balance += e.amount;
                self.entry_count += 1;
                if e.kind == EntryKind::Purchase {
                    self.purchases.insert(
                        e.id,
                        PurchaseRecord {
                            amount: e.amount,
                            created_at: e.created_at,
                            refunded: false,
                        },
                    );
                }
                if let Some(purchase) = e.reverses.and_then(|id| self.purchases.get_mut(&id)) {
                    purchase.refunded = true;
                }
            }
            AccountEvent::MembershipActivated(e) => {
                self.membership = Membership {
                    is_active: true,
                    tier: Some(e.tier),
                    expires_at: Some(e.expires_at),
                };
            }
            AccountEvent::MembershipCancelled(e) => {
                self.membership = Membership {
                    is_active: false,
                    tier: None,
                    expires_at: Some(e.occurred_at),
                };
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_account_id(command.account_id())?;

        match command {
            AccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            AccountCommand::PostCredit(cmd) => self.handle_credit(cmd),
            AccountCommand::PostDebit(cmd) => self.handle_debit(cmd),
            AccountCommand::Subscribe(cmd) => self.handle_subscribe(cmd),
            AccountCommand::CancelMembership(cmd) => self.handle_cancel(cmd),
            AccountCommand::RefundPurchase(cmd) => self.handle_refund(cmd),
        }
    }
}

impl HeartAccount {
    fn ensure_account_id(&self, account_id: AccountId) -> Result<(), DomainError> {
        if self.id != account_id {
            return Err(DomainError::invariant("account_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.opened {
            return Err(DomainError::AccountNotFound);
        }
        Ok(())
    }

    fn ensure_positive(amount: i64) -> Result<(), DomainError> {
        if amount <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        Ok(())
    }

    fn credited_balance(&self, amount: i64) -> Result<i64, DomainError> {
        self.balance
            .checked_add(amount)
            .ok_or_else(|| DomainError::validation("balance overflow"))
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
        if self.opened {
            return Err(DomainError::AccountAlreadyExists);
        }
        if cmd.signup_bonus < 0 {
            return Err(DomainError::validation("signup bonus cannot be negative"));
        }

        let mut events = vec![AccountEvent::AccountOpened(AccountOpened {
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })];
        if cmd.signup_bonus > 0 {
            events.push(AccountEvent::EntryPosted(LedgerEntry {
                id: cmd.bonus_entry_id,
                account_id: cmd.account_id,
                kind: EntryKind::Bonus,
                amount: cmd.signup_bonus,
                reason: "signup bonus".to_string(),
                created_at: cmd.occurred_at,
                reverses: None,
            }));
        }
        Ok(events)
    }

    fn handle_credit(&self, cmd: &PostCredit) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        Self::ensure_positive(cmd.amount)?;
        if !cmd.kind.is_creditable() {
            return Err(DomainError::validation(format!(
                "{} entries cannot be posted as a credit",
                cmd.kind
            )));
        }
        self.credited_balance(cmd.amount)?;

        Ok(vec![AccountEvent::EntryPosted(LedgerEntry {
            id: cmd.entry_id,
            account_id: cmd.account_id,
            kind: cmd.kind,
            amount: cmd.amount,
            reason: cmd.reason.clone(),
            created_at: cmd.occurred_at,
            reverses: None,
        })])
    }

    fn handle_debit(&self, cmd: &PostDebit) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        Self::ensure_positive(cmd.amount)?;
        if !cmd.kind.is_debitable() {
            return Err(DomainError::validation(format!(
                "{} entries cannot be posted as a debit",
                cmd.kind
            )));
        }
        if self.balance < cmd.amount {
            return Err(DomainError::InsufficientBalance {
                requested: cmd.amount,
                available: self.balance,
            });
        }

        Ok(vec![AccountEvent::EntryPosted(LedgerEntry {
            id: cmd.entry_id,
            account_id: cmd.account_id,
            kind: cmd.kind,
            amount: -cmd.amount,
            reason: cmd.reason.clone(),
            created_at: cmd.occurred_at,
            reverses: None,
        })])
    }

    fn handle_subscribe(&self, cmd: &Subscribe) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        if cmd.plan.bonus_amount < 0 {
            return Err(DomainError::validation("plan bonus cannot be negative"));
        }

        // Re-subscribing overwrites tier/expiry and grants the full bonus again.
        let mut events = vec![AccountEvent::MembershipActivated(MembershipActivated {
            account_id: cmd.account_id,
            tier: cmd.plan.tier,
            expires_at: cmd.occurred_at + cmd.plan.duration(),
            occurred_at: cmd.occurred_at,
        })];
        if cmd.plan.bonus_amount > 0 {
            self.credited_balance(cmd.plan.bonus_amount)?;
            events.push(AccountEvent::EntryPosted(LedgerEntry {
                id: cmd.bonus_entry_id,
                account_id: cmd.account_id,
                kind: EntryKind::Bonus,
                amount: cmd.plan.bonus_amount,
                reason: cmd.plan.bonus_reason(),
                created_at: cmd.occurred_at,
                reverses: None,
            }));
        }
        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelMembership) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        if !self.membership.is_active {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::MembershipCancelled(MembershipCancelled {
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundPurchase) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;

        let purchase = self
            .purchases
            .get(&cmd.purchase_entry_id)
            .ok_or(DomainError::PurchaseNotFound)?;
        if purchase.refunded {
            return Err(DomainError::AlreadyRefunded);
        }
        cmd.policy.check(purchase.created_at, cmd.occurred_at)?;
        if self.balance < purchase.amount {
            return Err(DomainError::RefundBalanceInsufficient {
                required: purchase.amount,
                available: self.balance,
            });
        }

        Ok(vec![AccountEvent::EntryPosted(LedgerEntry {
            id: cmd.refund_entry_id,
            account_id: cmd.account_id,
            kind: EntryKind::Refund,
            amount: -purchase.amount,
            reason: cmd.reason.clone(),
            created_at: cmd.occurred_at,
            reverses: Some(cmd.purchase_entry_id),
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn run(account: &mut HeartAccount, cmd: AccountCommand) -> Result<Vec<AccountEvent>, DomainError> {
        let events = account.handle(&cmd)?;
        for e in &events {
            account.apply(e);
        }
        Ok(events)
    }

    fn opened_account(signup_bonus: i64) -> HeartAccount {
        let id = AccountId::new();
        let mut account = HeartAccount::empty(id);
        run(
            &mut account,
            AccountCommand::OpenAccount(OpenAccount {
                account_id: id,
                signup_bonus,
                bonus_entry_id: EntryId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        account
    }

    fn credit(id: AccountId, kind: EntryKind, amount: i64, at: DateTime<Utc>) -> AccountCommand {
        AccountCommand::PostCredit(PostCredit {
            account_id: id,
            entry_id: EntryId::new(),
            kind,
            amount,
            reason: "test".to_string(),
            occurred_at: at,
        })
    }

    fn debit(id: AccountId, amount: i64) -> AccountCommand {
        AccountCommand::PostDebit(PostDebit {
            account_id: id,
            entry_id: EntryId::new(),
            kind: EntryKind::Spend,
            amount,
            reason: "test".to_string(),
            occurred_at: test_time(),
        })
    }

    fn subscribe(id: AccountId, tier: PlanTier, bonus: i64, at: DateTime<Utc>) -> AccountCommand {
        AccountCommand::Subscribe(Subscribe {
            account_id: id,
            plan: MembershipPlan::new(tier, bonus),
            bonus_entry_id: EntryId::new(),
            occurred_at: at,
        })
    }

    fn cancel(id: AccountId, at: DateTime<Utc>) -> AccountCommand {
        AccountCommand::CancelMembership(CancelMembership {
            account_id: id,
            occurred_at: at,
        })
    }

    fn refund(id: AccountId, purchase: EntryId, at: DateTime<Utc>) -> AccountCommand {
        AccountCommand::RefundPurchase(RefundPurchase {
            account_id: id,
            purchase_entry_id: purchase,
            refund_entry_id: EntryId::new(),
            reason: "changed my mind".to_string(),
            policy: RefundPolicy::default(),
            occurred_at: at,
        })
    }

    fn posted_entry(events: &[AccountEvent]) -> &LedgerEntry {
        events
            .iter()
            .find_map(AccountEvent::as_entry)
            .expect("expected an EntryPosted event")
    }

    /// Posts a purchase and returns its entry id.
    fn purchase(account: &mut HeartAccount, amount: i64, at: DateTime<Utc>) -> EntryId {
        let id = account.id_typed();
        let events = run(account, credit(id, EntryKind::Purchase, amount, at)).unwrap();
        posted_entry(&events).id
    }

    #[test]
    fn open_with_signup_bonus_posts_bonus_entry() {
        let account = opened_account(500);
        assert!(account.is_open());
        assert_eq!(account.balance(), 500);
        assert_eq!(account.entry_count(), 1);
        assert_eq!(account.version(), 2);
    }

    #[test]
    fn open_without_bonus_posts_no_entry() {
        let account = opened_account(0);
        assert_eq!(account.balance(), 0);
        assert_eq!(account.entry_count(), 0);
    }

    #[test]
    fn opening_twice_is_rejected() {
        let account = opened_account(0);
        let err = account
            .handle(&AccountCommand::OpenAccount(OpenAccount {
                account_id: account.id_typed(),
                signup_bonus: 0,
                bonus_entry_id: EntryId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::AccountAlreadyExists);
    }

    #[test]
    fn negative_signup_bonus_is_rejected() {
        let id = AccountId::new();
        let err = HeartAccount::empty(id)
            .handle(&AccountCommand::OpenAccount(OpenAccount {
                account_id: id,
                signup_bonus: -1,
                bonus_entry_id: EntryId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn commands_against_unopened_account_fail_not_found() {
        let id = AccountId::new();
        let account = HeartAccount::empty(id);
        let err = account
            .handle(&credit(id, EntryKind::Bonus, 10, test_time()))
            .unwrap_err();
        assert_eq!(err, DomainError::AccountNotFound);
    }

    #[test]
    fn command_for_another_account_is_an_invariant_violation() {
        let account = opened_account(0);
        let err = account
            .handle(&credit(AccountId::new(), EntryKind::Bonus, 10, test_time()))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn credit_posts_positive_entry() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let events = run(&mut account, credit(id, EntryKind::Purchase, 1000, test_time())).unwrap();
        let entry = posted_entry(&events);
        assert_eq!(entry.amount, 1000);
        assert_eq!(entry.kind, EntryKind::Purchase);
        assert_eq!(account.balance(), 1000);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let account = opened_account(100);
        let id = account.id_typed();
        for amount in [0, -5] {
            assert!(matches!(
                account.handle(&credit(id, EntryKind::Bonus, amount, test_time())),
                Err(DomainError::Validation(_))
            ));
            assert!(matches!(
                account.handle(&debit(id, amount)),
                Err(DomainError::Validation(_))
            ));
        }
    }

    #[test]
    fn credit_rejects_spend_and_refund_kinds() {
        let account = opened_account(0);
        for kind in [EntryKind::Spend, EntryKind::Refund] {
            assert!(matches!(
                account.handle(&credit(account.id_typed(), kind, 10, test_time())),
                Err(DomainError::Validation(_))
            ));
        }
    }

    #[test]
    fn credit_overflow_is_rejected() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        run(&mut account, credit(id, EntryKind::Bonus, i64::MAX, test_time())).unwrap();
        assert!(matches!(
            account.handle(&credit(id, EntryKind::Bonus, 1, test_time())),
            Err(DomainError::Validation(msg)) if msg.contains("overflow")
        ));
    }

    #[test]
    fn overdraft_is_rejected_without_events() {
        let account = opened_account(100);
        let err = account.handle(&debit(account.id_typed(), 150)).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientBalance {
                requested: 150,
                available: 100
            }
        );
    }

    #[test]
    fn debit_of_entire_balance_is_allowed() {
        let mut account = opened_account(100);
        let id = account.id_typed();
        let events = run(&mut account, debit(id, 100)).unwrap();
        assert_eq!(posted_entry(&events).amount, -100);
        assert_eq!(account.balance(), 0);
    }

    #[test]
    fn subscribe_bonus_overflow_rejects_the_whole_batch() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        run(&mut account, credit(id, EntryKind::Bonus, i64::MAX - 10, test_time())).unwrap();
        let before = account.clone();

        let err = run(&mut account, subscribe(id, PlanTier::Premium, 500, test_time())).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("overflow")));
        assert_eq!(account, before);
        assert!(!account.membership().is_active);
    }

    #[test]
    fn subscribe_activates_and_grants_bonus_in_one_batch() {
        let account = opened_account(500);
        let now = test_time();
        let events = account
            .handle(&subscribe(account.id_typed(), PlanTier::Premium, 500, now))
            .unwrap();

        assert_eq!(events.len(), 2);
        match &events[0] {
            AccountEvent::MembershipActivated(e) => {
                assert_eq!(e.tier, PlanTier::Premium);
                assert_eq!(e.expires_at, now + Duration::days(30));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let bonus = posted_entry(&events);
        assert_eq!(bonus.kind, EntryKind::Bonus);
        assert_eq!(bonus.amount, 500);
        assert_eq!(bonus.reason, "PREMIUM subscription bonus");
    }

    #[test]
    fn zero_bonus_plan_posts_no_entry() {
        let account = opened_account(0);
        let events = account
            .handle(&subscribe(account.id_typed(), PlanTier::Basic, 0, test_time()))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events.iter().all(|e| e.as_entry().is_none()));
    }

    #[test]
    fn resubscribe_overwrites_and_regrants() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let t0 = test_time();
        run(&mut account, subscribe(id, PlanTier::Premium, 500, t0)).unwrap();
        run(&mut account, subscribe(id, PlanTier::Platinum, 1500, t0 + Duration::days(3))).unwrap();

        assert_eq!(account.balance(), 2000);
        let membership = account.membership();
        assert_eq!(membership.tier, Some(PlanTier::Platinum));
        assert_eq!(membership.expires_at, Some(t0 + Duration::days(33)));
    }

    #[test]
    fn cancel_is_noop_when_inactive_and_keeps_bonus() {
        let mut account = opened_account(0);
        let id = account.id_typed();

        assert!(account.handle(&cancel(id, test_time())).unwrap().is_empty());

        run(&mut account, subscribe(id, PlanTier::Premium, 500, test_time())).unwrap();

        let at = test_time();
        let events = run(&mut account, cancel(id, at)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            account.membership(),
            Membership {
                is_active: false,
                tier: None,
                expires_at: Some(at)
            }
        );
        assert_eq!(account.balance(), 500);
        assert!(account.handle(&cancel(id, test_time())).unwrap().is_empty());
    }

    #[test]
    fn refund_reverses_exact_purchase_amount() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let t = test_time();
        let purchase_id = purchase(&mut account, 1000, t);

        let events = run(&mut account, refund(id, purchase_id, t + Duration::days(1))).unwrap();
        let entry = posted_entry(&events);
        assert_eq!(entry.kind, EntryKind::Refund);
        assert_eq!(entry.amount, -1000);
        assert_eq!(entry.reverses, Some(purchase_id));
        assert_eq!(account.balance(), 0);
        assert!(account.is_refunded(purchase_id));
    }

    #[test]
    fn refund_twice_is_rejected() {
        let mut account = opened_account(5000);
        let id = account.id_typed();
        let t = test_time();
        let purchase_id = purchase(&mut account, 1000, t);

        run(&mut account, refund(id, purchase_id, t)).unwrap();
        assert_eq!(
            account.handle(&refund(id, purchase_id, t)).unwrap_err(),
            DomainError::AlreadyRefunded
        );
        assert_eq!(account.balance(), 5000);
    }

    #[test]
    fn refund_outside_window_is_rejected() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let t = test_time();
        let purchase_id = purchase(&mut account, 1000, t);

        let late = t + Duration::days(7) + Duration::seconds(1);
        assert_eq!(
            account.handle(&refund(id, purchase_id, late)).unwrap_err(),
            DomainError::RefundWindowExpired
        );
        assert!(account.handle(&refund(id, purchase_id, t + Duration::days(7))).is_ok());
    }

    #[test]
    fn refund_after_spending_is_rejected() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let t = test_time();
        let purchase_id = purchase(&mut account, 1000, t);
        run(&mut account, debit(id, 1000)).unwrap();

        assert_eq!(
            account
                .handle(&refund(id, purchase_id, t + Duration::days(1)))
                .unwrap_err(),
            DomainError::RefundBalanceInsufficient {
                required: 1000,
                available: 0
            }
        );
    }

    #[test]
    fn refund_of_non_purchase_entry_is_not_found() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let events = run(&mut account, credit(id, EntryKind::Bonus, 100, test_time())).unwrap();
        let bonus_id = posted_entry(&events).id;
        assert_eq!(
            account.handle(&refund(id, bonus_id, test_time())).unwrap_err(),
            DomainError::PurchaseNotFound
        );
    }

    #[test]
    fn refund_entries_carry_a_unique_key() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let t = test_time();
        let purchase_id = purchase(&mut account, 10, t);

        let events = run(&mut account, refund(id, purchase_id, t)).unwrap();
        assert_eq!(events[0].unique_key(), Some(format!("refund:{purchase_id}")));
        assert_eq!(events[0].natural_id(), Some(Uuid::from(posted_entry(&events).id)));
    }

    #[test]
    fn only_refunds_carry_a_unique_key() {
        let mut account = opened_account(0);
        let id = account.id_typed();
        let events = run(&mut account, credit(id, EntryKind::Purchase, 10, test_time())).unwrap();
        assert_eq!(events[0].unique_key(), None);
    }

    #[test]
    fn events_survive_json_round_trip() {
        let mut account = opened_account(250);
        let id = account.id_typed();
        let events = run(&mut account, credit(id, EntryKind::Purchase, 40, test_time())).unwrap();
        let json = serde_json::to_value(&events[0]).unwrap();
        let back: AccountEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, events[0]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Bonus(i64),
        Purchase(i64),
        Spend(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..10_000).prop_map(Op::Bonus),
            (1i64..10_000).prop_map(Op::Purchase),
            (1i64..20_000).prop_map(Op::Spend),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: balance always equals the sum of posted entry amounts and
        /// never goes negative; a debit is accepted iff it fits the balance.
        #[test]
        fn balance_equals_sum_of_entries(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut account = opened_account(0);
            let id = account.id_typed();
            let mut entries: Vec<LedgerEntry> = Vec::new();

            for op in ops {
                let before = account.balance();
                let cmd = match op {
                    Op::Bonus(a) => credit(id, EntryKind::Bonus, a, test_time()),
                    Op::Purchase(a) => credit(id, EntryKind::Purchase, a, test_time()),
                    Op::Spend(a) => debit(id, a),
                };
                match run(&mut account, cmd) {
                    Ok(events) => {
                        entries.extend(events.into_iter().filter_map(AccountEvent::into_entry));
                    }
                    Err(DomainError::InsufficientBalance { requested, available }) => {
                        prop_assert!(requested > available);
                        prop_assert_eq!(account.balance(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
                }

                let sum: i64 = entries.iter().map(|e| e.amount).sum();
                prop_assert_eq!(account.balance(), sum);
                prop_assert!(account.balance() >= 0);
            }
        }
    }
}
