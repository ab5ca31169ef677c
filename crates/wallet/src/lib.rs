//! Heart wallet domain (event-sourced).
//!
//! Pure domain logic only: no IO, no clock reads, no persistence concerns.
//! Every balance change is a `LedgerEntry` carried by an `AccountEvent`, so the
//! balance of a rehydrated `HeartAccount` is the sum of its entries by
//! construction.

pub mod account;
pub mod entry;
pub mod membership;
pub mod refund;

pub use account::{
    AccountCommand, AccountEvent, AccountOpened, CancelMembership, HeartAccount,
    MembershipActivated, MembershipCancelled, OpenAccount, PostCredit, PostDebit,
    RefundPurchase, Subscribe,
};
pub use entry::{EntryKind, LedgerEntry};
pub use membership::{
    Membership, MembershipPhase, MembershipPlan, MembershipStatus, PlanCatalog, PlanTier,
    MEMBERSHIP_DURATION_DAYS,
};
pub use refund::{RefundPolicy, DEFAULT_REFUND_WINDOW_DAYS};
