//! `heartbank-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{AccountId, EntryId};
