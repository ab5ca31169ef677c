//! Caller-facing ledger services.
//!
//! `HeartWallet`, `MembershipManager`, and `RefundProcessor` share one
//! dispatcher, clock, and configuration. Each call stamps its command with
//! the clock, runs it through the dispatcher, and returns the resulting state.

mod membership;
mod refunds;
mod wallet;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use heartbank_core::{AccountId, Clock};
use heartbank_events::{EventBus, EventEnvelope, InMemoryEventBus};
use heartbank_wallet::{AccountCommand, HeartAccount, LedgerEntry};

use crate::config::LedgerConfig;
use crate::dispatcher::{AccountDispatcher, Dispatched};
use crate::error::WalletError;
use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};

pub use membership::MembershipManager;
pub use refunds::{RefundProcessor, RefundReceipt};
pub use wallet::{AccountSnapshot, HeartWallet};

/// Message type carried by the ledger's event bus.
pub type LedgerEnvelope = EventEnvelope<JsonValue>;

/// Everything the three services have in common.
struct Ledger<S, B> {
    dispatcher: AccountDispatcher<S, B>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl<S, B> Ledger<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn execute(
        &self,
        account_id: AccountId,
        command: AccountCommand,
    ) -> Result<Dispatched<HeartAccount>, WalletError> {
        self.dispatcher
            .dispatch(account_id, &command, HeartAccount::empty)
    }

    fn load_open_account(&self, account_id: AccountId) -> Result<HeartAccount, WalletError> {
        let account = self.dispatcher.load(account_id, HeartAccount::empty)?;
        if !account.is_open() {
            return Err(WalletError::AccountNotFound);
        }
        Ok(account)
    }

    /// Ledger entries of an open account in commit order.
    fn load_entries(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>, WalletError> {
        let (account, events) = self
            .dispatcher
            .load_history(account_id, HeartAccount::empty)?;
        if !account.is_open() {
            return Err(WalletError::AccountNotFound);
        }
        Ok(events.into_iter().filter_map(|e| e.into_entry()).collect())
    }
}

/// The three ledger services wired to one store, bus, and clock.
pub struct LedgerServices<S, B> {
    pub wallet: HeartWallet<S, B>,
    pub memberships: MembershipManager<S, B>,
    pub refunds: RefundProcessor<S, B>,
    ledger: Arc<Ledger<S, B>>,
}

/// Services over the in-memory store and bus.
pub type InMemoryLedgerServices =
    LedgerServices<InMemoryLedgerStore, InMemoryEventBus<LedgerEnvelope>>;

impl<S, B> LedgerServices<S, B>
where
    S: LedgerStore,
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(store: S, bus: B, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        let ledger = Arc::new(Ledger {
            dispatcher: AccountDispatcher::new(store, bus, config.retry_policy()),
            clock,
            config,
        });

        Self {
            wallet: HeartWallet::new(ledger.clone()),
            memberships: MembershipManager::new(ledger.clone()),
            refunds: RefundProcessor::new(ledger.clone()),
            ledger,
        }
    }

    pub fn store(&self) -> &S {
        self.ledger.dispatcher.store()
    }

    pub fn bus(&self) -> &B {
        self.ledger.dispatcher.bus()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.ledger.config
    }
}

impl InMemoryLedgerServices {
    pub fn in_memory(clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self::new(InMemoryLedgerStore::new(), InMemoryEventBus::new(), clock, config)
    }
}
