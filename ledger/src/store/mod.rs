//! # Ledger Store
//!
//! Durable storage for owners, accounts, transaction records, ATMs and the
//! ATM cash log, exposed as a set of atomic primitives.
//!
//! ## Backends
//!
//! ```text
//! sled_store.rs: SledLedger: sled trees, serializable multi-tree transactions
//! memory.rs:     MemoryLedger: BTreeMaps behind one parking_lot mutex
//! ```
//!
//! ## Conditional updates
//!
//! The engine checks status and balances before it calls in here, but those
//! reads can be stale by the time the write happens. Every mutating primitive
//! therefore re-checks its preconditions inside the atomic unit and aborts
//! with a [`GuardViolation`] if they no longer hold. Two concurrent transfers
//! from one sender can both pass the engine's check; only one of them can
//! pass the guard.
//!
//! ## Deadlines
//!
//! Mutating primitives take a [`Deadline`] and check it as the last step
//! before commit. A unit that runs past the deadline aborts and leaves
//! nothing behind. Once a unit has committed it reports success, however
//! long the flush that follows takes, so callers must await mutating
//! primitives to completion rather than race them against a timer.

pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::types::{
    Account, AccountId, AccountOwner, Atm, AtmId, CashDirection, CashOperation, HistoryPage,
    OwnerId, Transaction, TransactionId, UserId,
};

pub use memory::MemoryLedger;
pub use sled_store::{SledConfig, SledLedger};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A precondition that no longer held inside the atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("account {0} does not exist")]
    MissingAccount(AccountId),

    #[error("atm {0} does not exist")]
    MissingAtm(AtmId),

    #[error("account {0} is blocked")]
    AccountBlocked(AccountId),

    #[error("account {account_id} holds {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: u64,
        requested: u64,
    },

    #[error("balance of account {0} would overflow")]
    Overflow(AccountId),

    #[error("amount {0} is out of range")]
    AmountOutOfRange(u64),

    #[error("atm login {0:?} is already taken")]
    DuplicateLogin(String),
}

/// Errors returned by [`LedgerStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("guard rejected the write: {0}")]
    Guard(#[from] GuardViolation),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// The latest instant a mutating unit may commit at. `Deadline::NONE` never
/// expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub const NONE: Deadline = Deadline(None);

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }

    /// Fails with [`StoreError::Timeout`] once the deadline has passed.
    pub fn check(&self) -> StoreResult<()> {
        if self.is_expired() {
            return Err(StoreError::Timeout);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Input for [`LedgerStore::transfer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount_cents: u64,
    pub description: String,
}

/// Input for [`LedgerStore::create_atm`].
#[derive(Clone, Debug)]
pub struct NewAtm {
    pub login: String,
    pub password_hash: Vec<u8>,
    pub vault_owner_id: OwnerId,
}

/// The customer side of an ATM cash movement.
///
/// On a deposit the vault pays the customer; on a withdrawal the customer
/// pays the vault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerLeg {
    pub account_id: AccountId,
    pub description: String,
}

/// Input for [`LedgerStore::apply_cash_movement`]: everything one ATM cash
/// operation changes, committed as a single unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CashMovement {
    pub atm_id: AtmId,
    pub direction: CashDirection,
    pub amount_cents: u64,
    pub customer: Option<CustomerLeg>,
}

/// What an applied [`CashMovement`] left behind.
#[derive(Clone, Debug)]
pub struct CashReceipt {
    pub atm: Atm,
    pub vault: Account,
    pub transaction: Option<Transaction>,
    pub operation: CashOperation,
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// The atomic primitives the transaction engine is built on.
///
/// Lookups return `Ok(None)` for missing records; a storage failure is the
/// only `Err`. Implementations hold no business policy beyond the guards
/// documented on each mutating method.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    // -- Owners -------------------------------------------------------------

    /// Returns the owner for `user_id`, creating it if absent. Concurrent
    /// callers for the same user observe a single owner.
    async fn get_or_create_owner(
        &self,
        user_id: UserId,
        deadline: Deadline,
    ) -> StoreResult<AccountOwner>;

    async fn owner(&self, owner_id: OwnerId) -> StoreResult<Option<AccountOwner>>;

    async fn owner_by_user(&self, user_id: UserId) -> StoreResult<Option<AccountOwner>>;

    // -- Accounts -----------------------------------------------------------

    /// Creates an empty, active account for an existing owner.
    async fn create_account(&self, owner_id: OwnerId, deadline: Deadline)
        -> StoreResult<Account>;

    async fn account(&self, account_id: AccountId) -> StoreResult<Option<Account>>;

    /// All accounts of one owner, in creation order.
    async fn accounts_of_owner(&self, owner_id: OwnerId) -> StoreResult<Vec<Account>>;

    /// Marks the account blocked. Returns `false` if it already was.
    async fn block_account(&self, account_id: AccountId, deadline: Deadline) -> StoreResult<bool>;

    /// Adds a signed delta to one balance, independent of any transaction
    /// record. Guard: the result must stay non-negative.
    async fn update_vault_balance(
        &self,
        account_id: AccountId,
        delta_cents: i64,
        deadline: Deadline,
    ) -> StoreResult<Account>;

    // -- Transactions -------------------------------------------------------

    /// Inserts a transaction record, debits the sender and credits the
    /// receiver as one unit. Guards: both accounts exist and are active, and
    /// the sender can cover the amount.
    async fn transfer(&self, request: TransferRequest, deadline: Deadline)
        -> StoreResult<Transaction>;

    /// Records of `account_id` as sender or receiver, newest first.
    async fn history(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<HistoryPage>;

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    /// Oldest-first records not yet marked applied.
    async fn pending_transactions(&self, limit: usize) -> StoreResult<Vec<Transaction>>;

    /// Flags the given records applied. Unknown or already-applied ids are
    /// skipped. Returns how many records changed.
    async fn mark_applied(&self, ids: &[TransactionId], deadline: Deadline) -> StoreResult<usize>;

    // -- ATMs ---------------------------------------------------------------

    /// Creates a vault account for `vault_owner_id` and the ATM linked to it.
    /// Guard: the login is unique.
    async fn create_atm(&self, atm: NewAtm, deadline: Deadline) -> StoreResult<Atm>;

    async fn atm(&self, atm_id: AtmId) -> StoreResult<Option<Atm>>;

    async fn atm_by_login(&self, login: &str) -> StoreResult<Option<Atm>>;

    /// Adds a signed delta to the ATM's drawer cash.
    async fn update_atm_cash(
        &self,
        atm_id: AtmId,
        delta_cents: i64,
        deadline: Deadline,
    ) -> StoreResult<Atm>;

    /// Appends one row to the cash log.
    async fn log_cash_operation(&self, operation: CashOperation, deadline: Deadline)
        -> StoreResult<()>;

    /// Cash log rows of one ATM, oldest first.
    async fn cash_operations(&self, atm_id: AtmId) -> StoreResult<Vec<CashOperation>>;

    /// Applies a whole ATM cash operation atomically: vault balance and
    /// drawer cash move together, the optional customer transfer is recorded,
    /// and one cash-log row is appended. Guards: as [`transfer`] for the
    /// customer leg, plus a non-negative vault balance.
    ///
    /// [`transfer`]: LedgerStore::transfer
    async fn apply_cash_movement(
        &self,
        movement: CashMovement,
        deadline: Deadline,
    ) -> StoreResult<CashReceipt>;
}

/// Cuts a description down to the stored maximum at a character boundary.
pub(crate) fn clamp_description(description: &str) -> String {
    let max = crate::config::MAX_DESCRIPTION_LENGTH;
    if description.len() <= max {
        return description.to_string();
    }
    let mut end = max;
    while !description.is_char_boundary(end) {
        end -= 1;
    }
    description[..end].to_string()
}
