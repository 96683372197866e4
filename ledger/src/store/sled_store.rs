//! # SledLedger: Durable Ledger Store
//!
//! The production [`LedgerStore`], built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree              | Key                         | Value                    |
//! |-------------------|-----------------------------|--------------------------|
//! | `owners`          | `owner_id` (8B BE)          | `bincode(AccountOwner)`  |
//! | `owners_by_user`  | `user_id` (8B BE)           | `owner_id` (8B BE)       |
//! | `accounts`        | `account_id` (8B BE)        | `bincode(Account)`       |
//! | `owner_accounts`  | `owner_id ++ account_id`    | empty                    |
//! | `transactions`    | `tx_id` (8B BE)             | `bincode(Transaction)`   |
//! | `account_history` | `account_id ++ tx_id`       | empty                    |
//! | `pending`         | `tx_id` (8B BE)             | empty                    |
//! | `atms`            | `atm_id` (8B BE)            | `bincode(Atm)`           |
//! | `atm_logins`      | login (UTF-8)               | `atm_id` (8B BE)         |
//! | `cash_operations` | `atm_id ++ seq`             | `bincode(CashOperation)` |
//!
//! Ids are big-endian so sled's lexicographic order is numeric order. That
//! makes `account_history` prefix scans come out in creation order, and a
//! reversed scan gives newest-first history for free.
//!
//! ## Atomicity
//!
//! Every mutating primitive is one sled transaction over the trees it
//! touches. sled transactions are serializable: a unit that read a record
//! another unit wrote in the meantime is retried from scratch, so the guards
//! evaluated inside the closure always see current state.
//!
//! Units run on tokio's blocking pool together with the `sync_commits` flush,
//! in a task that finishes even if the caller stops waiting. The deadline is
//! the last check inside the unit, so a result reported as `Timeout` means
//! nothing was written.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    abort, ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use tracing::debug;

use super::{
    clamp_description, CashMovement, CashReceipt, Deadline, GuardViolation, LedgerStore, NewAtm,
    StoreError, StoreResult, TransferRequest,
};
use crate::types::{
    Account, AccountId, AccountOwner, AccountStatus, Atm, AtmId, CashDirection, CashOperation,
    HistoryPage, OwnerId, Transaction, TransactionId, TransactionStatus, UserId,
};

type TxResult<T> = ConflictableTransactionResult<T, StoreError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How to open the database.
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Directory holding the database files. Created if missing.
    pub path: PathBuf,
    /// Page cache size in bytes.
    pub cache_capacity: u64,
    /// Background flush interval. `None` disables the background flusher.
    pub flush_every_ms: Option<u64>,
    /// Flush to disk after every committed mutation before returning.
    pub sync_commits: bool,
}

impl SledConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_capacity: 64 * 1024 * 1024,
            flush_every_ms: Some(500),
            sync_commits: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn pair_key(prefix: u64, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&prefix.to_be_bytes());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> StoreResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8-byte id, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

/// The second id of a `prefix ++ id` key.
fn pair_suffix(key: &[u8]) -> StoreResult<u64> {
    key.get(8..16)
        .ok_or_else(|| StoreError::Corrupt(format!("expected 16-byte key, got {}", key.len())))
        .and_then(decode_id)
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Lifts a store error into a transaction abort.
fn aborting<T>(result: StoreResult<T>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

/// Lifts a guard violation into a transaction abort.
fn guard<T>(result: Result<T, GuardViolation>) -> TxResult<T> {
    result.map_err(|v| ConflictableTransactionError::Abort(StoreError::Guard(v)))
}

fn finish<T>(result: TransactionResult<T, StoreError>) -> StoreResult<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => StoreError::Sled(err),
    })
}

/// Ids from sled start at zero; ledger ids start at one.
fn next_id(tree: &TransactionalTree) -> TxResult<u64> {
    Ok(tree.generate_id()? + 1)
}

// ---------------------------------------------------------------------------
// Transactional building blocks
// ---------------------------------------------------------------------------

fn load_account(accounts: &TransactionalTree, id: AccountId) -> TxResult<Account> {
    match accounts.get(id_key(id))? {
        Some(bytes) => aborting(decode(&bytes)),
        None => abort(StoreError::Guard(GuardViolation::MissingAccount(id))),
    }
}

fn save_account(accounts: &TransactionalTree, account: &Account) -> TxResult<()> {
    accounts.insert(id_key(account.id), aborting(encode(account))?)?;
    Ok(())
}

fn load_atm(atms: &TransactionalTree, id: AtmId) -> TxResult<Atm> {
    match atms.get(id_key(id))? {
        Some(bytes) => aborting(decode(&bytes)),
        None => abort(StoreError::Guard(GuardViolation::MissingAtm(id))),
    }
}

fn save_atm(atms: &TransactionalTree, atm: &Atm) -> TxResult<()> {
    atms.insert(id_key(atm.id), aborting(encode(atm))?)?;
    Ok(())
}

/// Debits the sender and credits the receiver, re-checking both.
fn move_funds(
    accounts: &TransactionalTree,
    sender_id: AccountId,
    receiver_id: AccountId,
    amount: u64,
) -> TxResult<()> {
    let mut sender = load_account(accounts, sender_id)?;
    guard(sender.ensure_active())?;
    guard(sender.debit(amount))?;
    save_account(accounts, &sender)?;

    // Loaded after the sender is saved so a self-transfer sees the debit.
    let mut receiver = load_account(accounts, receiver_id)?;
    guard(receiver.ensure_active())?;
    guard(receiver.credit(amount))?;
    save_account(accounts, &receiver)
}

/// Trees a transaction record is written to.
struct RecordTrees<'a> {
    transactions: &'a TransactionalTree,
    history: &'a TransactionalTree,
    pending: &'a TransactionalTree,
}

impl RecordTrees<'_> {
    fn insert(&self, request: &TransferRequest) -> TxResult<Transaction> {
        let tx = Transaction {
            id: next_id(self.transactions)?,
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            amount_cents: request.amount_cents,
            description: clamp_description(&request.description),
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
        };
        self.transactions
            .insert(id_key(tx.id), aborting(encode(&tx))?)?;
        self.history
            .insert(pair_key(tx.sender_id, tx.id), Vec::new())?;
        if tx.receiver_id != tx.sender_id {
            self.history
                .insert(pair_key(tx.receiver_id, tx.id), Vec::new())?;
        }
        self.pending.insert(id_key(tx.id), Vec::new())?;
        Ok(tx)
    }
}

// ---------------------------------------------------------------------------
// SledLedger
// ---------------------------------------------------------------------------

/// Durable ledger store over a sled database.
///
/// Cheap to clone; every clone shares the same database handle. sled handles
/// concurrent readers and writers internally, so the store can be shared
/// across request tasks behind an `Arc` without extra locking.
#[derive(Debug, Clone)]
pub struct SledLedger {
    db: Db,
    owners: Tree,
    owners_by_user: Tree,
    accounts: Tree,
    owner_accounts: Tree,
    transactions: Tree,
    account_history: Tree,
    pending: Tree,
    atms: Tree,
    atm_logins: Tree,
    cash_operations: Tree,
    sync_commits: bool,
}

impl SledLedger {
    /// Opens or creates a database at `path` with default tuning.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::open_with(&SledConfig::new(path.as_ref()))
    }

    /// Opens or creates a database using explicit settings.
    pub fn open_with(config: &SledConfig) -> StoreResult<Self> {
        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .flush_every_ms(config.flush_every_ms)
            .open()?;
        Self::from_db(db, config.sync_commits)
    }

    /// A throwaway database removed when the last handle drops.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, false)
    }

    fn from_db(db: Db, sync_commits: bool) -> StoreResult<Self> {
        Ok(Self {
            owners: db.open_tree("owners")?,
            owners_by_user: db.open_tree("owners_by_user")?,
            accounts: db.open_tree("accounts")?,
            owner_accounts: db.open_tree("owner_accounts")?,
            transactions: db.open_tree("transactions")?,
            account_history: db.open_tree("account_history")?,
            pending: db.open_tree("pending")?,
            atms: db.open_tree("atms")?,
            atm_logins: db.open_tree("atm_logins")?,
            cash_operations: db.open_tree("cash_operations")?,
            db,
            sync_commits,
        })
    }

    /// Number of stored accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of stored transaction records.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Number of stored owner records.
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Blocks until all buffered writes are on disk.
    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Runs one mutating unit on the blocking pool and, with `sync_commits`,
    /// flushes it to disk before returning. The task runs to completion even
    /// if the caller stops waiting for it.
    async fn write<T, F>(&self, unit: F) -> StoreResult<T>
    where
        F: FnOnce(&SledLedger) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let value = unit(&store)?;
            if store.sync_commits {
                store.db.flush()?;
            }
            Ok(value)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn read<T: DeserializeOwned>(tree: &Tree, id: u64) -> StoreResult<Option<T>> {
        match tree.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LedgerStore for SledLedger {
    async fn get_or_create_owner(
        &self,
        user_id: UserId,
        deadline: Deadline,
    ) -> StoreResult<AccountOwner> {
        if let Some(owner) = self.owner_by_user(user_id).await? {
            return Ok(owner);
        }

        let (owner, created) = self
            .write(move |store| {
                let result: TransactionResult<(AccountOwner, bool), StoreError> = (
                    &store.owners,
                    &store.owners_by_user,
                )
                    .transaction(|(owners, by_user)| {
                        if let Some(bytes) = by_user.get(id_key(user_id))? {
                            let owner_id = aborting(decode_id(&bytes))?;
                            return match owners.get(id_key(owner_id))? {
                                Some(bytes) => Ok((aborting(decode(&bytes))?, false)),
                                None => abort(StoreError::Corrupt(format!(
                                    "user {user_id} indexes missing owner {owner_id}"
                                ))),
                            };
                        }

                        let owner = AccountOwner {
                            id: next_id(owners)?,
                            user_id,
                        };
                        owners.insert(id_key(owner.id), aborting(encode(&owner))?)?;
                        by_user.insert(id_key(user_id), id_key(owner.id))?;
                        aborting(deadline.check())?;
                        Ok((owner, true))
                    });
                finish(result)
            })
            .await?;

        if created {
            debug!(owner_id = owner.id, user_id, "account owner created");
        }
        Ok(owner)
    }

    async fn owner(&self, owner_id: OwnerId) -> StoreResult<Option<AccountOwner>> {
        Self::read(&self.owners, owner_id)
    }

    async fn owner_by_user(&self, user_id: UserId) -> StoreResult<Option<AccountOwner>> {
        match self.owners_by_user.get(id_key(user_id))? {
            Some(bytes) => Self::read(&self.owners, decode_id(&bytes)?),
            None => Ok(None),
        }
    }

    async fn create_account(
        &self,
        owner_id: OwnerId,
        deadline: Deadline,
    ) -> StoreResult<Account> {
        self.write(move |store| {
            let result: TransactionResult<Account, StoreError> = (
                &store.accounts,
                &store.owner_accounts,
            )
                .transaction(|(accounts, owner_accounts)| {
                    let account = Account::open(next_id(accounts)?, owner_id);
                    save_account(accounts, &account)?;
                    owner_accounts.insert(pair_key(owner_id, account.id), Vec::new())?;
                    aborting(deadline.check())?;
                    Ok(account)
                });
            finish(result)
        })
        .await
    }

    async fn account(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        Self::read(&self.accounts, account_id)
    }

    async fn accounts_of_owner(&self, owner_id: OwnerId) -> StoreResult<Vec<Account>> {
        let mut accounts = Vec::new();
        for entry in self.owner_accounts.scan_prefix(owner_id.to_be_bytes()) {
            let (key, _) = entry?;
            let account_id = pair_suffix(&key)?;
            match Self::read(&self.accounts, account_id)? {
                Some(account) => accounts.push(account),
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "owner {owner_id} indexes missing account {account_id}"
                    )))
                }
            }
        }
        Ok(accounts)
    }

    async fn block_account(&self, account_id: AccountId, deadline: Deadline) -> StoreResult<bool> {
        self.write(move |store| {
            let result: TransactionResult<bool, StoreError> =
                store.accounts.transaction(|accounts| {
                    let mut account = load_account(accounts, account_id)?;
                    if account.status == AccountStatus::Blocked {
                        return Ok(false);
                    }
                    account.status = AccountStatus::Blocked;
                    save_account(accounts, &account)?;
                    aborting(deadline.check())?;
                    Ok(true)
                });
            finish(result)
        })
        .await
    }

    async fn update_vault_balance(
        &self,
        account_id: AccountId,
        delta_cents: i64,
        deadline: Deadline,
    ) -> StoreResult<Account> {
        self.write(move |store| {
            let result: TransactionResult<Account, StoreError> =
                store.accounts.transaction(|accounts| {
                    let mut account = load_account(accounts, account_id)?;
                    guard(account.adjust(delta_cents))?;
                    save_account(accounts, &account)?;
                    aborting(deadline.check())?;
                    Ok(account)
                });
            finish(result)
        })
        .await
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        deadline: Deadline,
    ) -> StoreResult<Transaction> {
        self.write(move |store| {
            let result: TransactionResult<Transaction, StoreError> = (
                &store.accounts,
                &store.transactions,
                &store.account_history,
                &store.pending,
            )
                .transaction(|(accounts, transactions, history, pending)| {
                    move_funds(
                        accounts,
                        request.sender_id,
                        request.receiver_id,
                        request.amount_cents,
                    )?;
                    let tx = RecordTrees {
                        transactions,
                        history,
                        pending,
                    }
                    .insert(&request)?;
                    aborting(deadline.check())?;
                    Ok(tx)
                });
            finish(result)
        })
        .await
    }

    async fn history(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<HistoryPage> {
        let prefix = account_id.to_be_bytes();
        let total = self.account_history.scan_prefix(prefix).count();

        let mut items = Vec::with_capacity(limit.min(total.saturating_sub(offset)));
        for entry in self
            .account_history
            .scan_prefix(prefix)
            .rev()
            .skip(offset)
            .take(limit)
        {
            let (key, _) = entry?;
            let id = pair_suffix(&key)?;
            match Self::read(&self.transactions, id)? {
                Some(tx) => items.push(tx),
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "history of account {account_id} indexes missing transaction {id}"
                    )))
                }
            }
        }
        Ok(HistoryPage { items, total })
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Self::read(&self.transactions, id)
    }

    async fn pending_transactions(&self, limit: usize) -> StoreResult<Vec<Transaction>> {
        let mut items = Vec::new();
        for entry in self.pending.iter().take(limit) {
            let (key, _) = entry?;
            let id = decode_id(&key)?;
            if let Some(tx) = Self::read(&self.transactions, id)? {
                items.push(tx);
            }
        }
        Ok(items)
    }

    async fn mark_applied(&self, ids: &[TransactionId], deadline: Deadline) -> StoreResult<usize> {
        let ids = ids.to_vec();
        self.write(move |store| {
            let result: TransactionResult<usize, StoreError> = (&store.transactions, &store.pending)
                .transaction(|(transactions, pending)| {
                    let mut changed = 0;
                    for &id in &ids {
                        if pending.remove(id_key(id))?.is_none() {
                            continue;
                        }
                        let Some(bytes) = transactions.get(id_key(id))? else {
                            continue;
                        };
                        let mut tx: Transaction = aborting(decode(&bytes))?;
                        tx.status = TransactionStatus::Applied;
                        transactions.insert(id_key(id), aborting(encode(&tx))?)?;
                        changed += 1;
                    }
                    aborting(deadline.check())?;
                    Ok(changed)
                });
            finish(result)
        })
        .await
    }

    async fn create_atm(&self, atm: NewAtm, deadline: Deadline) -> StoreResult<Atm> {
        self.write(move |store| {
            let result: TransactionResult<Atm, StoreError> = (
                &store.atms,
                &store.atm_logins,
                &store.accounts,
                &store.owner_accounts,
            )
                .transaction(|(atms, logins, accounts, owner_accounts)| {
                    if logins.get(atm.login.as_bytes())?.is_some() {
                        return abort(StoreError::Guard(GuardViolation::DuplicateLogin(
                            atm.login.clone(),
                        )));
                    }

                    let vault = Account::open(next_id(accounts)?, atm.vault_owner_id);
                    save_account(accounts, &vault)?;
                    owner_accounts.insert(pair_key(vault.owner_id, vault.id), Vec::new())?;

                    let record = Atm {
                        id: next_id(atms)?,
                        login: atm.login.clone(),
                        account_id: vault.id,
                        password_hash: atm.password_hash.clone(),
                        cash_cents: 0,
                        created_at: Utc::now(),
                    };
                    save_atm(atms, &record)?;
                    logins.insert(record.login.as_bytes(), id_key(record.id))?;
                    aborting(deadline.check())?;
                    Ok(record)
                });
            finish(result)
        })
        .await
    }

    async fn atm(&self, atm_id: AtmId) -> StoreResult<Option<Atm>> {
        Self::read(&self.atms, atm_id)
    }

    async fn atm_by_login(&self, login: &str) -> StoreResult<Option<Atm>> {
        match self.atm_logins.get(login.as_bytes())? {
            Some(bytes) => Self::read(&self.atms, decode_id(&bytes)?),
            None => Ok(None),
        }
    }

    async fn update_atm_cash(
        &self,
        atm_id: AtmId,
        delta_cents: i64,
        deadline: Deadline,
    ) -> StoreResult<Atm> {
        self.write(move |store| {
            let result: TransactionResult<Atm, StoreError> = store.atms.transaction(|atms| {
                let mut atm = load_atm(atms, atm_id)?;
                atm.cash_cents = guard(
                    atm.cash_cents
                        .checked_add(delta_cents)
                        .ok_or(GuardViolation::AmountOutOfRange(delta_cents.unsigned_abs())),
                )?;
                save_atm(atms, &atm)?;
                aborting(deadline.check())?;
                Ok(atm)
            });
            finish(result)
        })
        .await
    }

    async fn log_cash_operation(
        &self,
        operation: CashOperation,
        deadline: Deadline,
    ) -> StoreResult<()> {
        self.write(move |store| {
            let result: TransactionResult<(), StoreError> =
                store.cash_operations.transaction(|log| {
                    let seq = next_id(log)?;
                    log.insert(pair_key(operation.atm_id, seq), aborting(encode(&operation))?)?;
                    aborting(deadline.check())?;
                    Ok(())
                });
            finish(result)
        })
        .await
    }

    async fn cash_operations(&self, atm_id: AtmId) -> StoreResult<Vec<CashOperation>> {
        let mut operations = Vec::new();
        for entry in self.cash_operations.scan_prefix(atm_id.to_be_bytes()) {
            let (_, value) = entry?;
            operations.push(decode(&value)?);
        }
        Ok(operations)
    }

    async fn apply_cash_movement(
        &self,
        movement: CashMovement,
        deadline: Deadline,
    ) -> StoreResult<CashReceipt> {
        let delta = movement.direction.signed(movement.amount_cents)?;
        let amount = movement.amount_cents;

        self.write(move |store| {
            let result: TransactionResult<CashReceipt, StoreError> = (
                &store.atms,
                &store.accounts,
                &store.transactions,
                &store.account_history,
                &store.pending,
                &store.cash_operations,
            )
                .transaction(|(atms, accounts, transactions, history, pending, log)| {
                    let mut atm = load_atm(atms, movement.atm_id)?;
                    let records = RecordTrees {
                        transactions,
                        history,
                        pending,
                    };

                    let transaction = match (&movement.customer, movement.direction) {
                        (None, _) => {
                            let mut vault = load_account(accounts, atm.account_id)?;
                            guard(vault.ensure_active())?;
                            guard(vault.adjust(delta))?;
                            save_account(accounts, &vault)?;
                            None
                        }
                        (Some(leg), CashDirection::Deposit) => {
                            let mut vault = load_account(accounts, atm.account_id)?;
                            guard(vault.ensure_active())?;
                            guard(vault.adjust(delta))?;
                            save_account(accounts, &vault)?;
                            move_funds(accounts, atm.account_id, leg.account_id, amount)?;
                            Some(records.insert(&TransferRequest {
                                sender_id: atm.account_id,
                                receiver_id: leg.account_id,
                                amount_cents: amount,
                                description: leg.description.clone(),
                            })?)
                        }
                        (Some(leg), CashDirection::Withdrawal) => {
                            move_funds(accounts, leg.account_id, atm.account_id, amount)?;
                            let mut vault = load_account(accounts, atm.account_id)?;
                            guard(vault.adjust(delta))?;
                            save_account(accounts, &vault)?;
                            Some(records.insert(&TransferRequest {
                                sender_id: leg.account_id,
                                receiver_id: atm.account_id,
                                amount_cents: amount,
                                description: leg.description.clone(),
                            })?)
                        }
                    };

                    atm.cash_cents = guard(
                        atm.cash_cents
                            .checked_add(delta)
                            .ok_or(GuardViolation::AmountOutOfRange(amount)),
                    )?;
                    save_atm(atms, &atm)?;

                    let operation = CashOperation {
                        atm_id: atm.id,
                        amount_cents: amount,
                        direction: movement.direction,
                        user_account_id: movement.customer.as_ref().map(|leg| leg.account_id),
                        created_at: Utc::now(),
                    };
                    log.insert(
                        pair_key(atm.id, next_id(log)?),
                        aborting(encode(&operation))?,
                    )?;

                    let vault = load_account(accounts, atm.account_id)?;
                    aborting(deadline.check())?;
                    Ok(CashReceipt {
                        atm,
                        vault,
                        transaction,
                        operation,
                    })
                });
            finish(result)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
