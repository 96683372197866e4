// Copyright (c) 2026 X-Bank. MIT License.
// See LICENSE for details.

//! # Bank Ledger: Core Library
//!
//! The ledger transaction engine behind the retail bank: accounts, transfers
//! between them, and cash moving in and out of ATMs. This is the part of the
//! service where a bug loses somebody's money, so every balance change goes
//! through exactly one place: an atomic unit in the ledger store.
//!
//! ## Architecture
//!
//! - **types**: Accounts, owners, ATMs, transaction records, cash logs.
//! - **store**: The `LedgerStore` contract plus the sled and in-memory
//!   backends. Atomic primitives, no business policy.
//! - **engine**: The `TransactionEngine`. Status, balance, ownership and
//!   credential checks, then delegation to the store.
//! - **credentials**: Password hashing for ATM logins, behind a trait.
//! - **settlement**: The pluggable "apply pending transactions" worker.
//! - **error**: The error kinds surfaced to callers.
//! - **config**: Ledger-wide constants.
//!
//! ## Invariants
//!
//! 1. No account balance is ever negative.
//! 2. Blocked accounts never send or receive.
//! 3. Every transaction record is exactly one debit and one credit.
//! 4. Every ATM cash movement has exactly one cash-log entry.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod settlement;
pub mod store;
pub mod types;

pub use credentials::{BcryptCredentials, CredentialError, CredentialVerifier};
pub use engine::{RequestContext, TransactionEngine};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use settlement::{
    AcknowledgeHook, SettlementError, SettlementHook, SettlementReport, SettlementWorker,
};
pub use store::{CashReceipt, LedgerStore, MemoryLedger, SledConfig, SledLedger, StoreError};
pub use types::{
    Account, AccountId, AccountOwner, AccountStatus, Atm, AtmId, CashDirection, CashOperation,
    HistoryPage, OwnerId, Requester, Transaction, TransactionId, TransactionStatus, UserId,
};

/// Crate version, reported by the node's `version` subcommand.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
