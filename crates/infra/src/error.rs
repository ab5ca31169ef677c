//! Caller-facing error type for ledger operations.

use thiserror::Error;

use heartbank_core::DomainError;

use crate::ledger_store::LedgerStoreError;

/// Error returned by `HeartWallet`, `MembershipManager`, and `RefundProcessor`.
///
/// Business rule failures keep their domain meaning one-to-one. Storage
/// failures are split into the retryable `ConcurrentModification` and the rest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("account not found")]
    AccountNotFound,

    #[error("account already exists")]
    AccountAlreadyExists,

    #[error("insufficient balance (requested: {requested}, available: {available})")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("invalid membership tier: {0}")]
    InvalidTier(String),

    #[error("purchase not found")]
    PurchaseNotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("refund window expired")]
    RefundWindowExpired,

    #[error("insufficient balance to refund purchase (required: {required}, available: {available})")]
    RefundBalanceInsufficient { required: i64, available: i64 },

    #[error("purchase already refunded")]
    AlreadyRefunded,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The account kept changing underneath the operation; safe to retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// The store rejected an event id or unique key that already exists.
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A historical payload could not be read back into a domain event.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(LedgerStoreError),
}

impl WalletError {
    /// Whether repeating the same call may succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::ConcurrentModification(_))
    }
}

impl From<DomainError> for WalletError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => WalletError::Validation(msg),
            DomainError::InvalidId(msg) => WalletError::Validation(msg),
            DomainError::InvariantViolation(msg) => WalletError::InvariantViolation(msg),
            DomainError::AccountNotFound => WalletError::AccountNotFound,
            DomainError::AccountAlreadyExists => WalletError::AccountAlreadyExists,
            DomainError::InsufficientBalance {
                requested,
                available,
            } => WalletError::InsufficientBalance {
                requested,
                available,
            },
            DomainError::InvalidTier(tier) => WalletError::InvalidTier(tier),
            DomainError::PurchaseNotFound => WalletError::PurchaseNotFound,
            DomainError::RefundWindowExpired => WalletError::RefundWindowExpired,
            DomainError::RefundBalanceInsufficient {
                required,
                available,
            } => WalletError::RefundBalanceInsufficient {
                required,
                available,
            },
            DomainError::AlreadyRefunded => WalletError::AlreadyRefunded,
        }
    }
}

impl From<LedgerStoreError> for WalletError {
    fn from(value: LedgerStoreError) -> Self {
        match value {
            LedgerStoreError::Concurrency(msg) => WalletError::ConcurrentModification(msg),
            LedgerStoreError::DuplicateKey(key) => WalletError::DuplicateEntry(key),
            other => WalletError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_meaning() {
        assert_eq!(
            WalletError::from(DomainError::InsufficientBalance {
                requested: 80,
                available: 20
            }),
            WalletError::InsufficientBalance {
                requested: 80,
                available: 20
            }
        );
        assert_eq!(
            WalletError::from(DomainError::invalid_tier("GOLD")),
            WalletError::InvalidTier("GOLD".to_string())
        );
        assert!(!WalletError::from(DomainError::RefundWindowExpired).is_retryable());
    }

    #[test]
    fn store_concurrency_is_retryable_but_backend_is_not() {
        let lost = WalletError::from(LedgerStoreError::Concurrency("v3".to_string()));
        assert!(lost.is_retryable());

        let backend = WalletError::from(LedgerStoreError::Backend("down".to_string()));
        assert!(!backend.is_retryable());
        assert!(matches!(backend, WalletError::Store(_)));
    }
}
