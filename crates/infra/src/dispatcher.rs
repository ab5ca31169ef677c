//! Account command pipeline.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the account stream
//!   ↓
//! 2. Rehydrate the aggregate
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version)
//!   ↓   lost the race? reload and go back to 2, up to max_attempts
//! 5. Publish committed events to the bus
//! ```
//!
//! The conditional append is what serializes operations on one account: two
//! callers that decided against the same version cannot both commit, and the
//! loser re-decides against the winner's state. Operations on different
//! accounts never touch the same stream and proceed in parallel.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use heartbank_core::{AccountId, Aggregate, DomainError, ExpectedVersion};
use heartbank_events::{EventBus, EventEnvelope};

use crate::error::WalletError;
use crate::ledger_store::{LedgerStore, LedgerStoreError, StoredEvent, UncommittedEvent};

/// How often a command is re-decided after losing a concurrent append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Outcome of a committed (or no-op) command.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    /// Aggregate state after the committed events were applied.
    pub aggregate: A,
    /// Events appended by this command, in stream order. Empty for no-ops.
    pub committed: Vec<StoredEvent>,
}

/// Runs account commands against a ledger store and publishes what commits.
#[derive(Debug)]
pub struct AccountDispatcher<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> AccountDispatcher<S, B> {
    pub fn new(store: S, bus: B, retry: RetryPolicy) -> Self {
        Self { store, bus, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> AccountDispatcher<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its committed stream.
    pub fn load<A>(
        &self,
        account_id: AccountId,
        make_aggregate: impl Fn(AccountId) -> A,
    ) -> Result<A, WalletError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        self.load_history(account_id, make_aggregate)
            .map(|(aggregate, _)| aggregate)
    }

    /// Rehydrate an aggregate and also return the typed events it was built from.
    pub fn load_history<A>(
        &self,
        account_id: AccountId,
        make_aggregate: impl Fn(AccountId) -> A,
    ) -> Result<(A, Vec<A::Event>), WalletError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let stream = self.store.load_stream(account_id)?;
        validate_loaded_stream(account_id, &stream)?;

        let events = decode_events::<A>(&stream)?;
        let mut aggregate = make_aggregate(account_id);
        for event in &events {
            aggregate.apply(event);
        }
        Ok((aggregate, events))
    }

    /// Decide and commit `command` against the latest state of `account_id`.
    ///
    /// Lost compare-and-swaps are retried with a fresh load up to
    /// `RetryPolicy::max_attempts`; after that the caller gets
    /// `WalletError::ConcurrentModification`. Domain rejections are never
    /// retried: they are deterministic for the state they were decided on.
    pub fn dispatch<A>(
        &self,
        account_id: AccountId,
        command: &A::Command,
        make_aggregate: impl Fn(AccountId) -> A,
    ) -> Result<Dispatched<A>, WalletError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: heartbank_events::Event + Serialize + DeserializeOwned,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_conflict = String::new();

        for attempt in 1..=max_attempts {
            let stream = self.store.load_stream(account_id)?;
            validate_loaded_stream(account_id, &stream)?;
            let loaded_version = stream_version(&stream);

            let mut aggregate = make_aggregate(account_id);
            for event in decode_events::<A>(&stream)? {
                aggregate.apply(&event);
            }

            let decided = aggregate.handle(command)?;
            if decided.is_empty() {
                return Ok(Dispatched {
                    aggregate,
                    committed: vec![],
                });
            }

            let uncommitted = decided
                .iter()
                .map(|event| UncommittedEvent::from_typed(account_id, event))
                .collect::<Result<Vec<_>, _>>()?;

            match self
                .store
                .append(uncommitted, ExpectedVersion::Exact(loaded_version))
            {
                Ok(committed) => {
                    for event in &decided {
                        aggregate.apply(event);
                    }
                    self.publish(&committed);
                    return Ok(Dispatched {
                        aggregate,
                        committed,
                    });
                }
                Err(LedgerStoreError::Concurrency(msg)) => {
                    debug!(
                        account_id = %account_id,
                        attempt,
                        max_attempts,
                        "lost concurrent append, retrying"
                    );
                    last_conflict = msg;
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(
            account_id = %account_id,
            max_attempts,
            "giving up after repeated concurrent modifications"
        );
        Err(WalletError::ConcurrentModification(format!(
            "gave up after {max_attempts} attempts: {last_conflict}"
        )))
    }

    /// Publication happens after commit; a failure here never undoes the commit.
    fn publish(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    account_id = %stored.account_id,
                    sequence_number = stored.sequence_number,
                    event_type = %stored.event_type,
                    error = ?e,
                    "failed to publish committed ledger event"
                );
            }
        }
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn decode_events<A>(stream: &[StoredEvent]) -> Result<Vec<A::Event>, WalletError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    stream
        .iter()
        .map(|stored| {
            serde_json::from_value(stored.payload.clone()).map_err(|e| {
                WalletError::Deserialize(format!(
                    "sequence_number {}: {e}",
                    stored.sequence_number
                ))
            })
        })
        .collect()
}

fn validate_loaded_stream(account_id: AccountId, stream: &[StoredEvent]) -> Result<(), WalletError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.account_id != account_id {
            return Err(WalletError::InvariantViolation(format!(
                "loaded stream contains wrong account_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(WalletError::Store(LedgerStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;
    use heartbank_core::EntryId;
    use heartbank_events::InMemoryEventBus;
    use heartbank_wallet::{AccountCommand, EntryKind, HeartAccount, OpenAccount, PostCredit};
    use uuid::Uuid;

    use super::*;
    use crate::ledger_store::InMemoryLedgerStore;

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

    fn open(account_id: AccountId) -> AccountCommand {
        AccountCommand::OpenAccount(OpenAccount {
            account_id,
            signup_bonus: 0,
            bonus_entry_id: EntryId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn credit(account_id: AccountId, amount: i64) -> AccountCommand {
        AccountCommand::PostCredit(PostCredit {
            account_id,
            entry_id: EntryId::new(),
            kind: EntryKind::Bonus,
            amount,
            reason: "test".to_string(),
            occurred_at: Utc::now(),
        })
    }

    /// Store that reports a lost race a fixed number of times before delegating.
    struct FlakyStore {
        inner: InMemoryLedgerStore,
        conflicts_left: AtomicU32,
    }

    impl LedgerStore for FlakyStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, LedgerStoreError> {
            let left = self.conflicts_left.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, Ordering::SeqCst);
                return Err(LedgerStoreError::Concurrency("injected".to_string()));
            }
            self.inner.append(events, expected)
        }

        fn load_stream(&self, account_id: AccountId) -> Result<Vec<StoredEvent>, LedgerStoreError> {
            self.inner.load_stream(account_id)
        }

        fn load_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, LedgerStoreError> {
            self.inner.load_event(event_id)
        }
    }

    #[test]
    fn dispatch_commits_and_publishes() {
        let bus = Arc::new(Bus::new());
        let sub = bus.subscribe();
        let dispatcher =
            AccountDispatcher::new(InMemoryLedgerStore::new(), bus.clone(), RetryPolicy::default());
        let id = AccountId::new();

        dispatcher.dispatch(id, &open(id), HeartAccount::empty).unwrap();
        let out = dispatcher.dispatch(id, &credit(id, 40), HeartAccount::empty).unwrap();

        assert_eq!(out.aggregate.balance(), 40);
        assert_eq!(out.committed.len(), 1);
        assert_eq!(out.committed[0].sequence_number, 2);

        let published = sub.drain();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].event_type(), "wallet.entry.posted");

        let reloaded: HeartAccount = dispatcher.load(id, HeartAccount::empty).unwrap();
        assert_eq!(reloaded.balance(), 40);
    }

    #[test]
    fn domain_rejections_write_nothing() {
        let dispatcher =
            AccountDispatcher::new(InMemoryLedgerStore::new(), Bus::new(), RetryPolicy::default());
        let id = AccountId::new();

        let err = dispatcher
            .dispatch(id, &credit(id, 10), HeartAccount::empty)
            .unwrap_err();
        assert_eq!(err, WalletError::AccountNotFound);
        assert!(dispatcher.store().load_stream(id).unwrap().is_empty());
    }

    #[test]
    fn lost_races_are_retried() {
        let store = FlakyStore {
            inner: InMemoryLedgerStore::new(),
            conflicts_left: AtomicU32::new(2),
        };
        let dispatcher = AccountDispatcher::new(store, Bus::new(), RetryPolicy { max_attempts: 3 });
        let id = AccountId::new();

        let out = dispatcher.dispatch(id, &open(id), HeartAccount::empty).unwrap();
        assert!(out.aggregate.is_open());
    }

    #[test]
    fn retries_are_bounded() {
        let store = FlakyStore {
            inner: InMemoryLedgerStore::new(),
            conflicts_left: AtomicU32::new(10),
        };
        let dispatcher = AccountDispatcher::new(store, Bus::new(), RetryPolicy { max_attempts: 3 });
        let id = AccountId::new();

        let err = dispatcher
            .dispatch(id, &open(id), HeartAccount::empty)
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(dispatcher.store().conflicts_left.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn foreign_events_in_a_stream_are_rejected() {
        let store = InMemoryLedgerStore::new();
        let id = AccountId::new();
        let dispatcher = AccountDispatcher::new(store, Bus::new(), RetryPolicy::default());
        dispatcher.dispatch(id, &open(id), HeartAccount::empty).unwrap();

        let stream = dispatcher.store().load_stream(id).unwrap();
        let mut tampered = stream.clone();
        tampered[0].account_id = AccountId::new();

        let err = validate_loaded_stream(id, &tampered).unwrap_err();
        assert!(matches!(err, WalletError::InvariantViolation(_)));
        assert!(validate_loaded_stream(id, &stream).is_ok());
    }
}
