use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use heartbank_core::{AccountId, ExpectedVersion};
use std::sync::Arc;

/// An event ready to be appended to an account stream (no sequence number yet).
///
/// Built from a typed domain event with `UncommittedEvent::from_typed()`, which
/// serializes the payload and captures the metadata needed to read it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub account_id: AccountId,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    /// At most one event per key is ever accepted, across all accounts.
    pub unique_key: Option<String>,

    pub payload: JsonValue,
}

/// A committed event in an account stream.
///
/// Sequence numbers are assigned by the store during append: they start at 1,
/// increase by one per event within an account stream, and never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub account_id: AccountId,

    /// Monotonically increasing position in the account stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Convert a stored event into an envelope for publication.
    pub fn to_envelope(&self) -> heartbank_events::EventEnvelope<JsonValue> {
        heartbank_events::EventEnvelope::new(
            self.event_id,
            self.account_id,
            self.event_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Ledger store operation error.
///
/// Infrastructure failures only; business rule failures are `DomainError`s.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    /// The stream moved since it was read (compare-and-swap lost).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// An event id or unique key was already taken.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The storage engine itself failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Append-only, account-scoped ledger store.
///
/// Every account owns one stream. The store is the only shared mutable resource
/// of the ledger, so it carries the serialization guarantees:
///
/// - `append()` is all-or-nothing for the whole batch.
/// - `append()` succeeds only if the stream is still at `expected_version`
///   (per-account compare-and-swap); appends to different accounts never
///   contend with each other.
/// - Event ids and non-empty unique keys are unique across the store.
/// - Anything visible through `load_stream()` / `load_event()` is committed.
pub trait LedgerStore: Send + Sync {
    /// Append events to one account stream.
    ///
    /// Implementations must:
    /// - reject batches spanning several accounts
    /// - enforce optimistic concurrency against the current stream version
    /// - assign `sequence_number`s starting at `current_version + 1`
    /// - reject duplicate event ids and unique keys without writing anything
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, LedgerStoreError>;

    /// Load the full stream for an account, in sequence order.
    ///
    /// Unknown accounts yield an empty stream.
    fn load_stream(&self, account_id: AccountId) -> Result<Vec<StoredEvent>, LedgerStoreError>;

    /// Look up a single event by id, whichever account it belongs to.
    fn load_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, LedgerStoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, account_id: AccountId) -> Result<Vec<StoredEvent>, LedgerStoreError> {
        (**self).load_stream(account_id)
    }

    fn load_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, LedgerStoreError> {
        (**self).load_event(event_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// The event's natural id (e.g. a ledger entry id) becomes the event id when
    /// present, so the fact can later be fetched by the id the domain handed out.
    pub fn from_typed<E>(account_id: AccountId, event: &E) -> Result<Self, LedgerStoreError>
    where
        E: heartbank_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            LedgerStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id: event.natural_id().unwrap_or_else(Uuid::now_v7),
            account_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            unique_key: event.unique_key(),
            payload,
        })
    }
}
