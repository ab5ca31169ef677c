//! Append-only ledger store boundary.
//!
//! One stream per account. Ledger entries, membership changes, and account
//! opening are all events in that stream, so a single conditional append
//! covers "update balance + append entry" as one atomic unit.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;
pub use query::{EntryFilter, EntryPage, Pagination};
pub use r#trait::{LedgerStore, LedgerStoreError, StoredEvent, UncommittedEvent};
