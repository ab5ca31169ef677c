use serde::{Deserialize, Serialize};
use uuid::Uuid;

use heartbank_core::AccountId;

/// Envelope for a committed event, carrying stream metadata.
///
/// This is the unit published to the bus after an append succeeds.
///
/// Notes:
/// - `sequence_number` is monotonically increasing per account stream.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    account_id: AccountId,
    event_type: String,

    /// Monotonically increasing position in the account stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        account_id: AccountId,
        event_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            account_id,
            event_type: event_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
