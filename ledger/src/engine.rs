//! # Transaction Engine
//!
//! The business rules of the ledger. The engine decides *whether* a balance
//! may change: it checks status, sufficiency, ownership and ATM credentials,
//! then hands the change to the store as one atomic primitive. It never
//! writes storage any other way.
//!
//! ## Check Order
//!
//! Transfers are rejected in a fixed order so callers see a stable error for
//! a given state:
//!
//! 1. zero amount
//! 2. sender missing
//! 3. sender blocked
//! 4. sender cannot cover the amount
//! 5. requester does not own the sender
//! 6. receiver missing or blocked
//!
//! These are early, friendly rejections. The store re-checks status and
//! balance inside the atomic unit, which is what actually keeps balances
//! non-negative under concurrency.
//!
//! ## Deadlines
//!
//! Each call carries a [`RequestContext`]. Reads are raced against its
//! deadline. Mutating units are not: the deadline is passed down and the unit
//! refuses to commit once it has passed, and a unit that did commit is always
//! awaited to the end. A write is never reported as timed out after it took
//! effect.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{
    ATM_DEPOSIT_DESCRIPTION, ATM_WITHDRAWAL_DESCRIPTION, DEFAULT_HASH_COST,
    DEFAULT_REQUEST_TIMEOUT, MAX_ATM_LOGIN_LENGTH, SYSTEM_USER_ID,
};
use crate::credentials::{BcryptCredentials, CredentialError, CredentialVerifier};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{
    CashMovement, CashReceipt, CustomerLeg, Deadline, LedgerStore, NewAtm, StoreError,
    StoreResult, TransferRequest,
};
use crate::types::{
    Account, AccountId, Atm, CashDirection, HistoryPage, Requester, Transaction, UserId,
};

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Per-call context. Currently just the deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestContext {
    deadline: Deadline,
}

impl RequestContext {
    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Deadline::at(Instant::now() + timeout),
        }
    }

    /// A context with no deadline. For CLI tools and tests.
    pub fn unbounded() -> Self {
        Self {
            deadline: Deadline::NONE,
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// TransactionEngine
// ---------------------------------------------------------------------------

/// The ledger's public operations, generic over the storage backend and the
/// ATM credential scheme.
pub struct TransactionEngine<S, C = BcryptCredentials> {
    store: Arc<S>,
    verifier: Arc<C>,
    hash_cost: u32,
}

impl<S, C> Clone for TransactionEngine<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            verifier: Arc::clone(&self.verifier),
            hash_cost: self.hash_cost,
        }
    }
}

impl<S: LedgerStore, C: CredentialVerifier> TransactionEngine<S, C> {
    pub fn new(store: Arc<S>, verifier: C) -> Self {
        Self {
            store,
            verifier: Arc::new(verifier),
            hash_cost: DEFAULT_HASH_COST,
        }
    }

    /// Work factor used when provisioning ATM passwords.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // -- Accounts -----------------------------------------------------------

    /// Opens a new empty account for `user_id`, creating the owner record on
    /// the user's first account.
    pub async fn open_account(&self, ctx: &RequestContext, user_id: UserId) -> LedgerResult<Account> {
        let owner = self
            .committing(self.store.get_or_create_owner(user_id, ctx.deadline))
            .await?;
        let account = self
            .committing(self.store.create_account(owner.id, ctx.deadline))
            .await?;
        info!(
            account_id = account.id,
            owner_id = owner.id,
            user_id,
            "account opened"
        );
        Ok(account)
    }

    /// Every account the user owns, oldest first. A user who never opened an
    /// account has none.
    pub async fn list_accounts(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> LedgerResult<Vec<Account>> {
        let Some(owner) = self.bounded(ctx, self.store.owner_by_user(user_id)).await? else {
            return Ok(Vec::new());
        };
        let accounts = self
            .bounded(ctx, self.store.accounts_of_owner(owner.id))
            .await?;
        debug!(user_id, count = accounts.len(), "listed accounts");
        Ok(accounts)
    }

    /// Blocks an account. Blocking an already blocked account succeeds.
    pub async fn block_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        requester: Requester,
    ) -> LedgerResult<()> {
        let account = self.load_account(ctx, account_id).await?;
        self.ensure_owner(ctx, &account, requester).await?;

        let changed = self
            .committing(self.store.block_account(account_id, ctx.deadline))
            .await?;
        if changed {
            info!(account_id, %requester, "account blocked");
        } else {
            debug!(account_id, %requester, "account already blocked");
        }
        Ok(())
    }

    /// A newest-first page of transactions the account sent or received.
    pub async fn account_history(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        requester: Requester,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<HistoryPage> {
        let account = self.load_account(ctx, account_id).await?;
        self.ensure_owner(ctx, &account, requester).await?;
        self.bounded(ctx, self.store.history(account_id, limit, offset))
            .await
    }

    // -- Transfers ----------------------------------------------------------

    /// Moves `amount_cents` from sender to receiver and records it.
    pub async fn make_transaction(
        &self,
        ctx: &RequestContext,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount_cents: u64,
        requester: Requester,
        description: &str,
    ) -> LedgerResult<Transaction> {
        if amount_cents == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let result = self
            .checked_transfer(
                ctx,
                TransferRequest {
                    sender_id,
                    receiver_id,
                    amount_cents,
                    description: description.to_string(),
                },
                requester,
            )
            .await;

        match result {
            Ok(tx) => {
                info!(
                    tx_id = tx.id,
                    sender_id,
                    receiver_id,
                    amount_cents,
                    %requester,
                    "transfer committed"
                );
                Ok(tx)
            }
            Err(e) => {
                warn!(
                    sender_id,
                    receiver_id,
                    amount_cents,
                    %requester,
                    error = %e,
                    "transfer rejected"
                );
                Err(e)
            }
        }
    }

    async fn checked_transfer(
        &self,
        ctx: &RequestContext,
        request: TransferRequest,
        requester: Requester,
    ) -> LedgerResult<Transaction> {
        self.precheck_transfer(
            ctx,
            request.sender_id,
            request.receiver_id,
            request.amount_cents,
            0,
            requester,
        )
        .await?;
        self.committing(self.store.transfer(request, ctx.deadline))
            .await
    }

    /// Runs the fixed rejection sequence for a transfer. `incoming_cents` is
    /// credited to the sender inside the same atomic unit before the transfer
    /// (ATM deposits fund the vault first).
    async fn precheck_transfer(
        &self,
        ctx: &RequestContext,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount_cents: u64,
        incoming_cents: u64,
        requester: Requester,
    ) -> LedgerResult<()> {
        let sender = self.load_account(ctx, sender_id).await?;
        if sender.is_blocked() {
            return Err(LedgerError::BlockedAccount(sender_id));
        }
        let available = sender.balance_cents.saturating_add(incoming_cents);
        if available < amount_cents {
            return Err(LedgerError::NotEnoughMoney {
                account_id: sender_id,
                balance: sender.balance_cents,
                requested: amount_cents,
            });
        }
        self.ensure_owner(ctx, &sender, requester).await?;

        let receiver = self.load_account(ctx, receiver_id).await?;
        if receiver.is_blocked() {
            return Err(LedgerError::BlockedAccount(receiver_id));
        }
        Ok(())
    }

    // -- ATM ----------------------------------------------------------------

    /// Cash loaded into the ATM by the bank: vault and drawer both grow.
    pub async fn atm_supplement(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
        amount_cents: u64,
    ) -> LedgerResult<CashReceipt> {
        self.anonymous_cash(ctx, login, password, amount_cents, CashDirection::Deposit)
            .await
    }

    /// Cash taken out of the ATM by the bank: vault and drawer both shrink.
    pub async fn atm_withdrawal(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
        amount_cents: u64,
    ) -> LedgerResult<CashReceipt> {
        self.anonymous_cash(ctx, login, password, amount_cents, CashDirection::Withdrawal)
            .await
    }

    /// A customer deposits cash into `account_id`.
    ///
    /// The vault is credited, then pays the customer. The vault side is
    /// system-initiated, so `requester` is recorded but not checked against
    /// the receiving account.
    pub async fn atm_user_supplement(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
        amount_cents: u64,
        account_id: AccountId,
        requester: Requester,
    ) -> LedgerResult<CashReceipt> {
        if amount_cents == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let atm = self.authenticate(ctx, login, password).await?;
        self.precheck_transfer(
            ctx,
            atm.account_id,
            account_id,
            amount_cents,
            amount_cents,
            Requester::System,
        )
        .await?;

        let receipt = self
            .apply_cash(
                ctx,
                CashMovement {
                    atm_id: atm.id,
                    direction: CashDirection::Deposit,
                    amount_cents,
                    customer: Some(CustomerLeg {
                        account_id,
                        description: ATM_DEPOSIT_DESCRIPTION.to_string(),
                    }),
                },
            )
            .await?;
        info!(
            atm_id = atm.id,
            account_id,
            amount_cents,
            %requester,
            "atm customer deposit"
        );
        Ok(receipt)
    }

    /// A customer withdraws cash from `account_id`. The requester must own
    /// the account.
    pub async fn atm_user_withdrawal(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
        amount_cents: u64,
        account_id: AccountId,
        requester: Requester,
    ) -> LedgerResult<CashReceipt> {
        if amount_cents == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let atm = self.authenticate(ctx, login, password).await?;
        self.precheck_transfer(ctx, account_id, atm.account_id, amount_cents, 0, requester)
            .await?;

        let receipt = self
            .apply_cash(
                ctx,
                CashMovement {
                    atm_id: atm.id,
                    direction: CashDirection::Withdrawal,
                    amount_cents,
                    customer: Some(CustomerLeg {
                        account_id,
                        description: ATM_WITHDRAWAL_DESCRIPTION.to_string(),
                    }),
                },
            )
            .await?;
        info!(
            atm_id = atm.id,
            account_id,
            amount_cents,
            %requester,
            "atm customer withdrawal"
        );
        Ok(receipt)
    }

    /// Registers a new ATM with its own vault account, owned by the bank.
    pub async fn provision_atm(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
    ) -> LedgerResult<Atm> {
        if login.is_empty() || login.len() > MAX_ATM_LOGIN_LENGTH {
            return Err(LedgerError::InvalidRequest(format!(
                "atm login must be 1 to {MAX_ATM_LOGIN_LENGTH} bytes"
            )));
        }
        if password.is_empty() {
            return Err(LedgerError::InvalidRequest("atm password must not be empty".into()));
        }

        let verifier = Arc::clone(&self.verifier);
        let secret = password.to_owned();
        let cost = self.hash_cost;
        let password_hash = blocking(move || verifier.hash(&secret, cost)).await??;

        let system = self
            .committing(self.store.get_or_create_owner(SYSTEM_USER_ID, ctx.deadline))
            .await?;
        let atm = self
            .committing(self.store.create_atm(
                NewAtm {
                    login: login.to_string(),
                    password_hash,
                    vault_owner_id: system.id,
                },
                ctx.deadline,
            ))
            .await?;
        info!(atm_id = atm.id, login, vault_id = atm.account_id, "atm provisioned");
        Ok(atm)
    }

    async fn anonymous_cash(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
        amount_cents: u64,
        direction: CashDirection,
    ) -> LedgerResult<CashReceipt> {
        if amount_cents == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let atm = self.authenticate(ctx, login, password).await?;

        let vault = self.load_account(ctx, atm.account_id).await?;
        if vault.is_blocked() {
            return Err(LedgerError::BlockedAccount(vault.id));
        }
        if direction == CashDirection::Withdrawal && vault.balance_cents < amount_cents {
            return Err(LedgerError::NotEnoughMoney {
                account_id: vault.id,
                balance: vault.balance_cents,
                requested: amount_cents,
            });
        }

        let receipt = self
            .apply_cash(
                ctx,
                CashMovement {
                    atm_id: atm.id,
                    direction,
                    amount_cents,
                    customer: None,
                },
            )
            .await?;
        info!(
            atm_id = atm.id,
            %direction,
            amount_cents,
            cash_cents = receipt.atm.cash_cents,
            "atm cash operation"
        );
        Ok(receipt)
    }

    async fn apply_cash(
        &self,
        ctx: &RequestContext,
        movement: CashMovement,
    ) -> LedgerResult<CashReceipt> {
        let atm_id = movement.atm_id;
        let direction = movement.direction;
        self.committing(self.store.apply_cash_movement(movement, ctx.deadline))
            .await
            .map_err(|e| {
                warn!(atm_id, %direction, error = %e, "atm cash operation rejected");
                e
            })
    }

    /// Resolves the ATM by login and checks its password.
    async fn authenticate(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
    ) -> LedgerResult<Atm> {
        let atm = self
            .bounded(ctx, self.store.atm_by_login(login))
            .await?
            .ok_or_else(|| LedgerError::AtmNotFound(login.to_string()))?;

        let verifier = Arc::clone(&self.verifier);
        let secret = password.to_owned();
        let stored = atm.password_hash.clone();
        match blocking(move || verifier.compare(&secret, &stored)).await? {
            Ok(()) => Ok(atm),
            Err(CredentialError::Mismatch) => {
                warn!(atm_id = atm.id, "atm password rejected");
                Err(LedgerError::Unauthorized(atm.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    // -- Helpers ------------------------------------------------------------

    async fn load_account(&self, ctx: &RequestContext, id: AccountId) -> LedgerResult<Account> {
        self.bounded(ctx, self.store.account(id))
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn ensure_owner(
        &self,
        ctx: &RequestContext,
        account: &Account,
        requester: Requester,
    ) -> LedgerResult<()> {
        let Requester::User(user_id) = requester else {
            return Ok(());
        };
        let owner = self.bounded(ctx, self.store.owner(account.owner_id)).await?;
        match owner {
            Some(owner) if owner.user_id == user_id => Ok(()),
            _ => Err(LedgerError::AccessDenied(account.id)),
        }
    }

    /// Runs a mutating store unit to completion. The unit enforces the
    /// deadline itself, before it commits.
    async fn committing<T, F>(&self, call: F) -> LedgerResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        call.await.map_err(LedgerError::from)
    }

    /// Runs a read-only store call under the request deadline.
    async fn bounded<T, F>(&self, ctx: &RequestContext, call: F) -> LedgerResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let result = match ctx.deadline.instant() {
            Some(at) => tokio::time::timeout_at(at, call)
                .await
                .unwrap_or(Err(StoreError::Timeout)),
            None => call.await,
        };
        result.map_err(LedgerError::from)
    }
}

/// Runs CPU-heavy credential work off the async workers.
async fn blocking<T, F>(work: F) -> LedgerResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LedgerError::Internal(format!("credential task failed: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_HASH_COST;
    use crate::error::ErrorKind;
    use crate::store::MemoryLedger;
    use crate::types::{AccountStatus, TransactionStatus};

    // -- Helpers ------------------------------------------------------------

    type Engine = TransactionEngine<MemoryLedger>;

    fn engine() -> Engine {
        TransactionEngine::new(Arc::new(MemoryLedger::new()), BcryptCredentials)
            .with_hash_cost(MIN_HASH_COST)
    }

    fn ctx() -> RequestContext {
        RequestContext::unbounded()
    }

    async fn funded(engine: &Engine, user_id: UserId, balance: u64) -> Account {
        let account = engine.open_account(&ctx(), user_id).await.unwrap();
        assert!(engine.store().seed_balance(account.id, balance));
        engine.store().account(account.id).await.unwrap().unwrap()
    }

    async fn balance(engine: &Engine, id: AccountId) -> u64 {
        engine
            .store()
            .account(id)
            .await
            .unwrap()
            .unwrap()
            .balance_cents
    }

    async fn provisioned(engine: &Engine, vault_cents: u64) -> Atm {
        let atm = engine.provision_atm(&ctx(), "atm-1", "pin").await.unwrap();
        if vault_cents > 0 {
            engine
                .atm_supplement(&ctx(), "atm-1", "pin", vault_cents)
                .await
                .unwrap();
        }
        engine.store().atm(atm.id).await.unwrap().unwrap()
    }

    // -- Accounts -----------------------------------------------------------

    #[tokio::test]
    async fn open_account_twice_shares_one_owner() {
        let engine = engine();
        let a = engine.open_account(&ctx(), 42).await.unwrap();
        let b = engine.open_account(&ctx(), 42).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.owner_id, b.owner_id);
        assert_eq!(a.balance_cents, 0);
        assert_eq!(a.status, AccountStatus::Active);
        assert_eq!(engine.store().owner_count(), 1);
    }

    #[tokio::test]
    async fn list_accounts_returns_only_own_accounts() {
        let engine = engine();
        assert!(engine.list_accounts(&ctx(), 1).await.unwrap().is_empty());

        let a = engine.open_account(&ctx(), 1).await.unwrap();
        let b = engine.open_account(&ctx(), 1).await.unwrap();
        engine.open_account(&ctx(), 2).await.unwrap();

        let ids: Vec<_> = engine
            .list_accounts(&ctx(), 1)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn block_requires_ownership_unless_system() {
        let engine = engine();
        let account = engine.open_account(&ctx(), 1).await.unwrap();

        let err = engine
            .block_account(&ctx(), account.id, Requester::User(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(!engine.store().account(account.id).await.unwrap().unwrap().is_blocked());

        engine
            .block_account(&ctx(), account.id, Requester::System)
            .await
            .unwrap();
        assert!(engine.store().account(account.id).await.unwrap().unwrap().is_blocked());
    }

    #[tokio::test]
    async fn block_is_idempotent() {
        let engine = engine();
        let account = engine.open_account(&ctx(), 1).await.unwrap();
        engine
            .block_account(&ctx(), account.id, Requester::User(1))
            .await
            .unwrap();
        engine
            .block_account(&ctx(), account.id, Requester::User(1))
            .await
            .unwrap();
        assert!(engine.store().account(account.id).await.unwrap().unwrap().is_blocked());
    }

    #[tokio::test]
    async fn block_unknown_account_is_not_found() {
        let engine = engine();
        let err = engine
            .block_account(&ctx(), 404, Requester::System)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(404)));
    }

    #[tokio::test]
    async fn history_enforces_ownership() {
        let engine = engine();
        let a = funded(&engine, 1, 100).await;
        let b = funded(&engine, 2, 0).await;
        engine
            .make_transaction(&ctx(), a.id, b.id, 10, Requester::User(1), "x")
            .await
            .unwrap();

        let page = engine
            .account_history(&ctx(), a.id, Requester::User(1), 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        let err = engine
            .account_history(&ctx(), a.id, Requester::User(2), 10, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    // -- Transfers ----------------------------------------------------------

    #[tokio::test]
    async fn transfer_scenario_moves_funds_and_records_once() {
        let engine = engine();
        let a = funded(&engine, 1, 1_000).await;
        let b = funded(&engine, 2, 0).await;

        let tx = engine
            .make_transaction(&ctx(), a.id, b.id, 300, Requester::User(1), "test")
            .await
            .unwrap();

        assert_eq!(balance(&engine, a.id).await, 700);
        assert_eq!(balance(&engine, b.id).await, 300);
        assert_eq!(
            (tx.sender_id, tx.receiver_id, tx.amount_cents, tx.description.as_str()),
            (a.id, b.id, 300, "test")
        );
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(engine.store().transaction_count(), 1);
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let engine = engine();
        let a = funded(&engine, 1, 1_000).await;
        let b = funded(&engine, 2, 0).await;
        let err = engine
            .make_transaction(&ctx(), a.id, b.id, 0, Requester::User(1), "")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount));
    }

    #[tokio::test]
    async fn blocked_sender_is_rejected_before_funds_check() {
        let engine = engine();
        let a = funded(&engine, 1, 10).await;
        let b = funded(&engine, 2, 0).await;
        engine
            .block_account(&ctx(), a.id, Requester::System)
            .await
            .unwrap();

        // Both blocked and short on funds: blocked wins.
        let err = engine
            .make_transaction(&ctx(), a.id, b.id, 500, Requester::User(1), "")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BlockedAccount(id) if id == a.id));
        assert_eq!(balance(&engine, a.id).await, 10);
        assert_eq!(engine.store().transaction_count(), 0);
    }

    #[tokio::test]
    async fn insufficient_funds_is_rejected_before_ownership() {
        let engine = engine();
        let a = funded(&engine, 1, 10).await;
        let b = funded(&engine, 2, 0).await;

        let err = engine
            .make_transaction(&ctx(), a.id, b.id, 11, Requester::User(99), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnoughMoney);
    }

    #[tokio::test]
    async fn non_owner_cannot_send() {
        let engine = engine();
        let a = funded(&engine, 1, 100).await;
        let b = funded(&engine, 2, 0).await;

        for intruder in [2, 3, SYSTEM_USER_ID + 1_000] {
            let err = engine
                .make_transaction(&ctx(), a.id, b.id, 10, Requester::User(intruder), "")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AccessDenied, "user {intruder}");
        }
        assert_eq!(balance(&engine, a.id).await, 100);
    }

    #[tokio::test]
    async fn system_requester_skips_ownership() {
        let engine = engine();
        let a = funded(&engine, 1, 100).await;
        let b = funded(&engine, 2, 0).await;
        engine
            .make_transaction(&ctx(), a.id, b.id, 100, Requester::System, "fee")
            .await
            .unwrap();
        assert_eq!(balance(&engine, a.id).await, 0);
    }

    #[tokio::test]
    async fn missing_or_blocked_receiver_is_rejected() {
        let engine = engine();
        let a = funded(&engine, 1, 100).await;
        let b = funded(&engine, 2, 0).await;

        let err = engine
            .make_transaction(&ctx(), a.id, 999, 10, Requester::User(1), "")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(999)));

        engine
            .block_account(&ctx(), b.id, Requester::System)
            .await
            .unwrap();
        let err = engine
            .make_transaction(&ctx(), a.id, b.id, 10, Requester::User(1), "")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BlockedAccount(id) if id == b.id));
        assert_eq!(balance(&engine, a.id).await, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transfers_never_overdraw() {
        let engine = engine();
        let a = funded(&engine, 1, 500).await;
        let b = funded(&engine, 2, 0).await;
        let (sender, receiver) = (a.id, b.id);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .make_transaction(&ctx(), sender, receiver, 100, Requester::User(1), "")
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::NotEnoughMoney),
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(balance(&engine, a.id).await, 0);
        assert_eq!(balance(&engine, b.id).await, 500);
    }

    // -- ATM ----------------------------------------------------------------

    #[tokio::test]
    async fn provision_creates_system_owned_vault() {
        let engine = engine();
        let atm = engine.provision_atm(&ctx(), "atm-1", "pin").await.unwrap();
        assert_eq!(atm.cash_cents, 0);

        let vault = engine.store().account(atm.account_id).await.unwrap().unwrap();
        let owner = engine.store().owner(vault.owner_id).await.unwrap().unwrap();
        assert_eq!(owner.user_id, SYSTEM_USER_ID);
        assert_ne!(atm.password_hash, b"pin".to_vec());

        let err = engine
            .provision_atm(&ctx(), "atm-1", "other")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn provision_validates_input() {
        let engine = engine();
        let long_login = "x".repeat(MAX_ATM_LOGIN_LENGTH + 1);
        for (login, password) in [("", "pin"), (long_login.as_str(), "pin"), ("atm", "")] {
            let err = engine
                .provision_atm(&ctx(), login, password)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        }
    }

    #[tokio::test]
    async fn anonymous_supplement_and_withdrawal_move_vault_and_cash() {
        let engine = engine();
        let atm = provisioned(&engine, 0).await;

        let receipt = engine
            .atm_supplement(&ctx(), "atm-1", "pin", 10_000)
            .await
            .unwrap();
        assert_eq!(receipt.atm.cash_cents, 10_000);
        assert_eq!(receipt.vault.balance_cents, 10_000);
        assert!(receipt.transaction.is_none());

        let receipt = engine
            .atm_withdrawal(&ctx(), "atm-1", "pin", 4_000)
            .await
            .unwrap();
        assert_eq!(receipt.atm.cash_cents, 6_000);
        assert_eq!(receipt.vault.balance_cents, 6_000);

        let err = engine
            .atm_withdrawal(&ctx(), "atm-1", "pin", 6_001)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnoughMoney);

        let log = engine.store().cash_operations(atm.id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|op| op.user_account_id.is_none()));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized_and_changes_nothing() {
        let engine = engine();
        let atm = provisioned(&engine, 1_000).await;

        let err = engine
            .atm_withdrawal(&ctx(), "atm-1", "wrong", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(id) if id == atm.id));

        let after = engine.store().atm(atm.id).await.unwrap().unwrap();
        assert_eq!(after.cash_cents, 1_000);
        assert_eq!(balance(&engine, atm.account_id).await, 1_000);
        assert_eq!(engine.store().cash_operations(atm.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_atm_login_is_not_found() {
        let engine = engine();
        let err = engine
            .atm_supplement(&ctx(), "ghost", "pin", 100)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn customer_deposit_credits_account_through_vault() {
        let engine = engine();
        let atm = provisioned(&engine, 0).await;
        let customer = funded(&engine, 7, 0).await;

        let receipt = engine
            .atm_user_supplement(&ctx(), "atm-1", "pin", 2_500, customer.id, Requester::User(7))
            .await
            .unwrap();

        assert_eq!(balance(&engine, customer.id).await, 2_500);
        assert_eq!(receipt.atm.cash_cents, 2_500);
        assert_eq!(receipt.vault.balance_cents, 0);
        let tx = receipt.transaction.unwrap();
        assert_eq!(tx.description, ATM_DEPOSIT_DESCRIPTION);
        assert_eq!((tx.sender_id, tx.receiver_id), (atm.account_id, customer.id));
    }

    #[tokio::test]
    async fn customer_withdrawal_debits_owner_account() {
        let engine = engine();
        let atm = provisioned(&engine, 5_000).await;
        let customer = funded(&engine, 7, 1_000).await;

        let receipt = engine
            .atm_user_withdrawal(&ctx(), "atm-1", "pin", 400, customer.id, Requester::User(7))
            .await
            .unwrap();

        assert_eq!(balance(&engine, customer.id).await, 600);
        assert_eq!(receipt.atm.cash_cents, 4_600);
        assert_eq!(receipt.vault.balance_cents, 5_000);
        let tx = receipt.transaction.unwrap();
        assert_eq!(tx.description, ATM_WITHDRAWAL_DESCRIPTION);
        assert_eq!((tx.sender_id, tx.receiver_id), (customer.id, atm.account_id));
    }

    #[tokio::test]
    async fn failed_customer_withdrawal_leaves_atm_untouched() {
        let engine = engine();
        let atm = provisioned(&engine, 5_000).await;
        let customer = funded(&engine, 7, 100).await;

        let err = engine
            .atm_user_withdrawal(&ctx(), "atm-1", "pin", 500, customer.id, Requester::User(7))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnoughMoney);

        let err = engine
            .atm_user_withdrawal(&ctx(), "atm-1", "pin", 50, customer.id, Requester::User(8))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let after = engine.store().atm(atm.id).await.unwrap().unwrap();
        assert_eq!(after.cash_cents, 5_000);
        assert_eq!(balance(&engine, atm.account_id).await, 5_000);
        assert_eq!(balance(&engine, customer.id).await, 100);
        assert_eq!(engine.store().cash_operations(atm.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn customer_deposit_to_blocked_account_is_rejected() {
        let engine = engine();
        let atm = provisioned(&engine, 0).await;
        let customer = funded(&engine, 7, 0).await;
        engine
            .block_account(&ctx(), customer.id, Requester::System)
            .await
            .unwrap();

        let err = engine
            .atm_user_supplement(&ctx(), "atm-1", "pin", 100, customer.id, Requester::User(7))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BlockedAccount(id) if id == customer.id));
        assert_eq!(engine.store().atm(atm.id).await.unwrap().unwrap().cash_cents, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_context_times_out_without_changes() {
        let engine = engine();
        let a = funded(&engine, 1, 100).await;
        let b = funded(&engine, 2, 0).await;

        let expired = RequestContext::with_timeout(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(20)).await;

        let err = engine
            .make_transaction(&expired, a.id, b.id, 10, Requester::User(1), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_retryable());
        assert_eq!(balance(&engine, a.id).await, 100);
    }
}
