//! In-process [`LedgerStore`] backed by ordinary collections.
//!
//! Everything lives behind a single `parking_lot::Mutex`, so each primitive
//! is trivially atomic and serialized. Mutations are staged on copies of the
//! touched records and written back only once every guard has passed.
//! Used by unit tests and anywhere durability is not wanted.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{
    clamp_description, CashMovement, CashReceipt, Deadline, GuardViolation, LedgerStore, NewAtm,
    StoreResult, TransferRequest,
};
use crate::types::{
    Account, AccountId, AccountOwner, AccountStatus, Atm, AtmId, CashDirection, CashOperation,
    HistoryPage, OwnerId, Transaction, TransactionId, TransactionStatus, UserId,
};

#[derive(Default)]
struct State {
    last_id: u64,
    owners: BTreeMap<OwnerId, AccountOwner>,
    owners_by_user: HashMap<UserId, OwnerId>,
    accounts: BTreeMap<AccountId, Account>,
    transactions: BTreeMap<TransactionId, Transaction>,
    atms: BTreeMap<AtmId, Atm>,
    atm_logins: HashMap<String, AtmId>,
    cash_log: Vec<CashOperation>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

/// Copies of the accounts a unit touches, written back on commit.
struct Staged<'a> {
    state: &'a State,
    accounts: BTreeMap<AccountId, Account>,
}

impl<'a> Staged<'a> {
    fn new(state: &'a State) -> Self {
        Self {
            state,
            accounts: BTreeMap::new(),
        }
    }

    fn account_mut(&mut self, id: AccountId) -> Result<&mut Account, GuardViolation> {
        if !self.accounts.contains_key(&id) {
            let account = self
                .state
                .accounts
                .get(&id)
                .cloned()
                .ok_or(GuardViolation::MissingAccount(id))?;
            self.accounts.insert(id, account);
        }
        self.accounts
            .get_mut(&id)
            .ok_or(GuardViolation::MissingAccount(id))
    }

    fn move_funds(
        &mut self,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: u64,
    ) -> Result<(), GuardViolation> {
        let sender = self.account_mut(sender_id)?;
        sender.ensure_active()?;
        sender.debit(amount)?;

        let receiver = self.account_mut(receiver_id)?;
        receiver.ensure_active()?;
        receiver.credit(amount)
    }

    fn into_accounts(self) -> BTreeMap<AccountId, Account> {
        self.accounts
    }
}

/// Non-durable ledger store for tests and tooling.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a balance directly, bypassing every guard. Test seeding only.
    pub fn seed_balance(&self, account_id: AccountId, balance_cents: u64) -> bool {
        let mut state = self.state.lock();
        match state.accounts.get_mut(&account_id) {
            Some(account) => {
                account.balance_cents = balance_cents;
                true
            }
            None => false,
        }
    }

    /// Number of owner records.
    pub fn owner_count(&self) -> usize {
        self.state.lock().owners.len()
    }

    /// Number of transaction records.
    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Sum of every account balance. Constant across transfers.
    pub fn total_balance(&self) -> u128 {
        self.state
            .lock()
            .accounts
            .values()
            .map(|a| a.balance_cents as u128)
            .sum()
    }

    fn insert_transaction(state: &mut State, request: &TransferRequest) -> Transaction {
        let tx = Transaction {
            id: state.next_id(),
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            amount_cents: request.amount_cents,
            description: clamp_description(&request.description),
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
        };
        state.transactions.insert(tx.id, tx.clone());
        tx
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_or_create_owner(
        &self,
        user_id: UserId,
        deadline: Deadline,
    ) -> StoreResult<AccountOwner> {
        let mut state = self.state.lock();
        if let Some(id) = state.owners_by_user.get(&user_id) {
            if let Some(owner) = state.owners.get(id) {
                return Ok(owner.clone());
            }
        }
        deadline.check()?;

        let owner = AccountOwner {
            id: state.next_id(),
            user_id,
        };
        state.owners_by_user.insert(user_id, owner.id);
        state.owners.insert(owner.id, owner.clone());
        Ok(owner)
    }

    async fn owner(&self, owner_id: OwnerId) -> StoreResult<Option<AccountOwner>> {
        Ok(self.state.lock().owners.get(&owner_id).cloned())
    }

    async fn owner_by_user(&self, user_id: UserId) -> StoreResult<Option<AccountOwner>> {
        let state = self.state.lock();
        Ok(state
            .owners_by_user
            .get(&user_id)
            .and_then(|id| state.owners.get(id))
            .cloned())
    }

    async fn create_account(
        &self,
        owner_id: OwnerId,
        deadline: Deadline,
    ) -> StoreResult<Account> {
        let mut state = self.state.lock();
        deadline.check()?;
        let account = Account::open(state.next_id(), owner_id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn account(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.state.lock().accounts.get(&account_id).cloned())
    }

    async fn accounts_of_owner(&self, owner_id: OwnerId) -> StoreResult<Vec<Account>> {
        Ok(self
            .state
            .lock()
            .accounts
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn block_account(&self, account_id: AccountId, deadline: Deadline) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get_mut(&account_id)
            .ok_or(GuardViolation::MissingAccount(account_id))?;
        if account.is_blocked() {
            return Ok(false);
        }
        deadline.check()?;
        account.status = AccountStatus::Blocked;
        Ok(true)
    }

    async fn update_vault_balance(
        &self,
        account_id: AccountId,
        delta_cents: i64,
        deadline: Deadline,
    ) -> StoreResult<Account> {
        let mut state = self.state.lock();
        let mut account = state
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(GuardViolation::MissingAccount(account_id))?;
        account.adjust(delta_cents)?;
        deadline.check()?;
        state.accounts.insert(account_id, account.clone());
        Ok(account)
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        deadline: Deadline,
    ) -> StoreResult<Transaction> {
        let mut state = self.state.lock();

        let mut staged = Staged::new(&state);
        staged.move_funds(request.sender_id, request.receiver_id, request.amount_cents)?;
        let accounts = staged.into_accounts();
        deadline.check()?;

        state.accounts.extend(accounts);
        Ok(Self::insert_transaction(&mut state, &request))
    }

    async fn history(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<HistoryPage> {
        let state = self.state.lock();
        let transactions = &state.transactions;
        let matching = || {
            transactions
                .values()
                .rev()
                .filter(move |tx| tx.involves(account_id))
        };

        Ok(HistoryPage {
            total: matching().count(),
            items: matching().skip(offset).take(limit).cloned().collect(),
        })
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(self.state.lock().transactions.get(&id).cloned())
    }

    async fn pending_transactions(&self, limit: usize) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .state
            .lock()
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_applied(&self, ids: &[TransactionId], deadline: Deadline) -> StoreResult<usize> {
        let mut state = self.state.lock();
        deadline.check()?;
        let mut changed = 0;
        for id in ids {
            if let Some(tx) = state.transactions.get_mut(id) {
                if tx.status == TransactionStatus::Pending {
                    tx.status = TransactionStatus::Applied;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn create_atm(&self, atm: NewAtm, deadline: Deadline) -> StoreResult<Atm> {
        let mut state = self.state.lock();
        if state.atm_logins.contains_key(&atm.login) {
            return Err(GuardViolation::DuplicateLogin(atm.login).into());
        }
        deadline.check()?;

        let vault = Account::open(state.next_id(), atm.vault_owner_id);
        let record = Atm {
            id: state.next_id(),
            login: atm.login,
            account_id: vault.id,
            password_hash: atm.password_hash,
            cash_cents: 0,
            created_at: Utc::now(),
        };
        state.accounts.insert(vault.id, vault);
        state.atm_logins.insert(record.login.clone(), record.id);
        state.atms.insert(record.id, record.clone());
        Ok(record)
    }

    async fn atm(&self, atm_id: AtmId) -> StoreResult<Option<Atm>> {
        Ok(self.state.lock().atms.get(&atm_id).cloned())
    }

    async fn atm_by_login(&self, login: &str) -> StoreResult<Option<Atm>> {
        let state = self.state.lock();
        Ok(state
            .atm_logins
            .get(login)
            .and_then(|id| state.atms.get(id))
            .cloned())
    }

    async fn update_atm_cash(
        &self,
        atm_id: AtmId,
        delta_cents: i64,
        deadline: Deadline,
    ) -> StoreResult<Atm> {
        let mut state = self.state.lock();
        let atm = state
            .atms
            .get_mut(&atm_id)
            .ok_or(GuardViolation::MissingAtm(atm_id))?;
        let cash = atm
            .cash_cents
            .checked_add(delta_cents)
            .ok_or(GuardViolation::AmountOutOfRange(delta_cents.unsigned_abs()))?;
        deadline.check()?;
        atm.cash_cents = cash;
        Ok(atm.clone())
    }

    async fn log_cash_operation(
        &self,
        operation: CashOperation,
        deadline: Deadline,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        deadline.check()?;
        state.cash_log.push(operation);
        Ok(())
    }

    async fn cash_operations(&self, atm_id: AtmId) -> StoreResult<Vec<CashOperation>> {
        Ok(self
            .state
            .lock()
            .cash_log
            .iter()
            .filter(|op| op.atm_id == atm_id)
            .cloned()
            .collect())
    }

    async fn apply_cash_movement(
        &self,
        movement: CashMovement,
        deadline: Deadline,
    ) -> StoreResult<CashReceipt> {
        let mut state = self.state.lock();

        let mut atm = state
            .atms
            .get(&movement.atm_id)
            .cloned()
            .ok_or(GuardViolation::MissingAtm(movement.atm_id))?;
        let delta = movement.direction.signed(movement.amount_cents)?;
        let amount = movement.amount_cents;

        let mut staged = Staged::new(&state);
        let transfer = match (&movement.customer, movement.direction) {
            (None, _) => {
                let vault = staged.account_mut(atm.account_id)?;
                vault.ensure_active()?;
                vault.adjust(delta)?;
                None
            }
            (Some(leg), CashDirection::Deposit) => {
                let vault = staged.account_mut(atm.account_id)?;
                vault.ensure_active()?;
                vault.adjust(delta)?;
                staged.move_funds(atm.account_id, leg.account_id, amount)?;
                Some(TransferRequest {
                    sender_id: atm.account_id,
                    receiver_id: leg.account_id,
                    amount_cents: amount,
                    description: leg.description.clone(),
                })
            }
            (Some(leg), CashDirection::Withdrawal) => {
                staged.move_funds(leg.account_id, atm.account_id, amount)?;
                staged.account_mut(atm.account_id)?.adjust(delta)?;
                Some(TransferRequest {
                    sender_id: leg.account_id,
                    receiver_id: atm.account_id,
                    amount_cents: amount,
                    description: leg.description.clone(),
                })
            }
        };
        atm.cash_cents = atm
            .cash_cents
            .checked_add(delta)
            .ok_or(GuardViolation::AmountOutOfRange(amount))?;
        let accounts = staged.into_accounts();
        deadline.check()?;

        // Every guard passed; commit.
        let vault = accounts
            .get(&atm.account_id)
            .cloned()
            .ok_or(GuardViolation::MissingAccount(atm.account_id))?;
        state.accounts.extend(accounts);
        state.atms.insert(atm.id, atm.clone());
        let transaction = transfer.map(|request| Self::insert_transaction(&mut state, &request));
        let operation = CashOperation {
            atm_id: atm.id,
            amount_cents: amount,
            direction: movement.direction,
            user_account_id: movement.customer.map(|leg| leg.account_id),
            created_at: Utc::now(),
        };
        state.cash_log.push(operation.clone());

        Ok(CashReceipt {
            atm,
            vault,
            transaction,
            operation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CustomerLeg, StoreError};

    async fn funded_pair(store: &MemoryLedger, balance: u64) -> (Account, Account) {
        let owner = store.get_or_create_owner(1, Deadline::NONE).await.unwrap();
        let a = store.create_account(owner.id, Deadline::NONE).await.unwrap();
        let b = store.create_account(owner.id, Deadline::NONE).await.unwrap();
        store.seed_balance(a.id, balance);
        (a, b)
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_records() {
        let store = MemoryLedger::new();
        let (a, b) = funded_pair(&store, 1_000).await;

        let tx = store
            .transfer(
                TransferRequest {
                    sender_id: a.id,
                    receiver_id: b.id,
                    amount_cents: 300,
                    description: "rent".into(),
                },
                Deadline::NONE,
            )
            .await
            .unwrap();

        assert_eq!(tx.amount_cents, 300);
        assert_eq!(store.account(a.id).await.unwrap().unwrap().balance_cents, 700);
        assert_eq!(store.account(b.id).await.unwrap().unwrap().balance_cents, 300);
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn failed_transfer_leaves_nothing() {
        let store = MemoryLedger::new();
        let (a, b) = funded_pair(&store, 100).await;

        let err = store
            .transfer(
                TransferRequest {
                    sender_id: a.id,
                    receiver_id: b.id,
                    amount_cents: 101,
                    description: "too much".into(),
                },
                Deadline::NONE,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Guard(GuardViolation::InsufficientFunds { .. })
        ));
        assert_eq!(store.account(a.id).await.unwrap().unwrap().balance_cents, 100);
        assert_eq!(store.account(b.id).await.unwrap().unwrap().balance_cents, 0);
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn transfer_to_missing_receiver_rolls_back_debit() {
        let store = MemoryLedger::new();
        let (a, _) = funded_pair(&store, 100).await;

        let err = store
            .transfer(
                TransferRequest {
                    sender_id: a.id,
                    receiver_id: 9_999,
                    amount_cents: 50,
                    description: String::new(),
                },
                Deadline::NONE,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Guard(GuardViolation::MissingAccount(9_999))
        ));
        assert_eq!(store.account(a.id).await.unwrap().unwrap().balance_cents, 100);
    }

    #[tokio::test]
    async fn self_transfer_nets_to_zero() {
        let store = MemoryLedger::new();
        let (a, _) = funded_pair(&store, 100).await;

        store
            .transfer(
                TransferRequest {
                    sender_id: a.id,
                    receiver_id: a.id,
                    amount_cents: 100,
                    description: String::new(),
                },
                Deadline::NONE,
            )
            .await
            .unwrap();
        assert_eq!(store.account(a.id).await.unwrap().unwrap().balance_cents, 100);
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn owner_is_created_once_per_user() {
        let store = MemoryLedger::new();
        let first = store.get_or_create_owner(42, Deadline::NONE).await.unwrap();
        let second = store.get_or_create_owner(42, Deadline::NONE).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.owner_count(), 1);
    }

    #[tokio::test]
    async fn withdrawal_with_failing_customer_leg_changes_nothing() {
        let store = MemoryLedger::new();
        let system = store.get_or_create_owner(0, Deadline::NONE).await.unwrap();
        let atm = store
            .create_atm(
                NewAtm {
                    login: "atm-1".into(),
                    password_hash: vec![1],
                    vault_owner_id: system.id,
                },
                Deadline::NONE,
            )
            .await
            .unwrap();
        store.seed_balance(atm.account_id, 10_000);
        store.update_atm_cash(atm.id, 10_000, Deadline::NONE).await.unwrap();
        let (customer, _) = funded_pair(&store, 50).await;

        let err = store
            .apply_cash_movement(
                CashMovement {
                    atm_id: atm.id,
                    direction: CashDirection::Withdrawal,
                    amount_cents: 80,
                    customer: Some(CustomerLeg {
                        account_id: customer.id,
                        description: "ATM withdrawal".into(),
                    }),
                },
                Deadline::NONE,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Guard(GuardViolation::InsufficientFunds { .. })
        ));
        let atm_after = store.atm(atm.id).await.unwrap().unwrap();
        assert_eq!(atm_after.cash_cents, 10_000);
        let vault = store.account(atm.account_id).await.unwrap().unwrap();
        assert_eq!(vault.balance_cents, 10_000);
        assert!(store.cash_operations(atm.id).await.unwrap().is_empty());
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_aborts_before_commit() {
        let store = MemoryLedger::new();
        let (a, b) = funded_pair(&store, 100).await;
        let deadline = Deadline::at(tokio::time::Instant::now());
        tokio::time::advance(std::time::Duration::from_millis(1)).await;

        let err = store
            .transfer(
                TransferRequest {
                    sender_id: a.id,
                    receiver_id: b.id,
                    amount_cents: 10,
                    description: String::new(),
                },
                deadline,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout));
        assert_eq!(store.account(a.id).await.unwrap().unwrap().balance_cents, 100);
        assert_eq!(store.transaction_count(), 0);
    }
}
