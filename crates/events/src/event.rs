use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "wallet.entry_posted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Identifier the payload already carries, if any.
    ///
    /// Stores use it as the event id so the fact can be looked up by the id the
    /// domain handed out (e.g. a ledger entry id).
    fn natural_id(&self) -> Option<Uuid> {
        None
    }

    /// Store-enforced uniqueness key, if any.
    ///
    /// At most one event per key may ever be appended, across all streams.
    fn unique_key(&self) -> Option<String> {
        None
    }
}
