//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, ledger rules). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive amount).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The account has never been opened.
    #[error("account not found")]
    AccountNotFound,

    /// Attempted to open an account twice.
    #[error("account already exists")]
    AccountAlreadyExists,

    /// A debit would take the balance below zero.
    #[error("insufficient balance (requested: {requested}, available: {available})")]
    InsufficientBalance { requested: i64, available: i64 },

    /// The membership tier is not part of the plan catalog.
    #[error("invalid membership tier: {0}")]
    InvalidTier(String),

    /// The referenced purchase entry does not exist (or is not a purchase).
    #[error("purchase not found")]
    PurchaseNotFound,

    /// The purchase is older than the refund window.
    #[error("refund window expired")]
    RefundWindowExpired,

    /// The purchased hearts have already been spent.
    #[error("insufficient balance to refund purchase (required: {required}, available: {available})")]
    RefundBalanceInsufficient { required: i64, available: i64 },

    /// The purchase already has a refund entry.
    #[error("purchase already refunded")]
    AlreadyRefunded,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_tier(tier: impl Into<String>) -> Self {
        Self::InvalidTier(tier.into())
    }
}
