//! Infrastructure layer: ledger storage, command dispatch, configuration, and
//! the caller-facing services built on them.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger_store;
pub mod services;


pub use config::LedgerConfig;
pub use dispatcher::{AccountDispatcher, Dispatched, RetryPolicy};
pub use error::WalletError;
pub use services::{
    AccountSnapshot, HeartWallet, InMemoryLedgerServices, LedgerEnvelope, LedgerServices,
    MembershipManager, RefundProcessor, RefundReceipt,
};
