//! # Ledger Entities
//!
//! The records the ledger stores: owners, accounts, transaction records,
//! ATMs and the ATM cash log. All amounts are integer cents. Balances are
//! `u64`, so a negative balance is unrepresentable; the arithmetic helpers on
//! [`Account`] turn would-be underflow into a [`GuardViolation`] instead.
//!
//! Every type here is `Serialize + Deserialize` because the sled backend
//! persists them with bincode.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::GuardViolation;

/// External user identity, issued by the authentication service.
pub type UserId = u64;
/// Internal owner record id.
pub type OwnerId = u64;
/// Ledger account id.
pub type AccountId = u64;
/// ATM id.
pub type AtmId = u64;
/// Transaction record id, assigned by the store in creation order.
pub type TransactionId = u64;

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

/// Who is asking for an operation.
///
/// `System` covers administrative and ATM-initiated calls, which skip the
/// ownership check. Every customer-facing path must pass `User`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Requester {
    User(UserId),
    System,
}

impl Requester {
    /// Returns the user id for a user requester.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Requester::User(id) => Some(*id),
            Requester::System => None,
        }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::User(id) => write!(f, "user:{id}"),
            Requester::System => f.write_str("system"),
        }
    }
}

// ---------------------------------------------------------------------------
// Owners and Accounts
// ---------------------------------------------------------------------------

/// Binds one external user to their ledger accounts. Never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOwner {
    pub id: OwnerId,
    pub user_id: UserId,
}

/// Account status. The only transition is `Active -> Blocked`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Blocked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger balance owned by a customer or by an ATM (its vault account).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub balance_cents: u64,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A fresh, empty, active account.
    pub fn open(id: AccountId, owner_id: OwnerId) -> Self {
        Self {
            id,
            owner_id,
            balance_cents: 0,
            status: AccountStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status == AccountStatus::Blocked
    }

    /// Fails if the account may not take part in a balance change.
    pub(crate) fn ensure_active(&self) -> Result<(), GuardViolation> {
        if self.is_blocked() {
            return Err(GuardViolation::AccountBlocked(self.id));
        }
        Ok(())
    }

    /// Subtracts `amount`, refusing to go below zero.
    pub(crate) fn debit(&mut self, amount: u64) -> Result<(), GuardViolation> {
        self.balance_cents =
            self.balance_cents
                .checked_sub(amount)
                .ok_or(GuardViolation::InsufficientFunds {
                    account_id: self.id,
                    balance: self.balance_cents,
                    requested: amount,
                })?;
        Ok(())
    }

    /// Adds `amount`, refusing to overflow.
    pub(crate) fn credit(&mut self, amount: u64) -> Result<(), GuardViolation> {
        self.balance_cents = self
            .balance_cents
            .checked_add(amount)
            .ok_or(GuardViolation::Overflow(self.id))?;
        Ok(())
    }

    /// Applies a signed delta: positive credits, negative debits.
    pub(crate) fn adjust(&mut self, delta_cents: i64) -> Result<(), GuardViolation> {
        if delta_cents >= 0 {
            self.credit(delta_cents.unsigned_abs())
        } else {
            self.debit(delta_cents.unsigned_abs())
        }
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Settlement status of a transaction record.
///
/// Balances move when the record is created; the status only tracks whether
/// the settlement worker has processed the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Applied,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Applied => "APPLIED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One historical ledger entry: `amount_cents` moved from sender to receiver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount_cents: u64,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// True if the account is the sender or the receiver.
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.sender_id == account_id || self.receiver_id == account_id
    }
}

/// A newest-first slice of an account's history plus the unpaged total.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub items: Vec<Transaction>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// ATMs
// ---------------------------------------------------------------------------

/// A cash machine and its link into the ledger.
///
/// `cash_cents` is the physical cash in the drawer. `account_id` is the vault
/// account that mirrors it in the ledger.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atm {
    pub id: AtmId,
    pub login: String,
    pub account_id: AccountId,
    pub password_hash: Vec<u8>,
    pub cash_cents: i64,
    pub created_at: DateTime<Utc>,
}

// Keeps the password hash out of logs.
impl fmt::Debug for Atm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atm")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("account_id", &self.account_id)
            .field("cash_cents", &self.cash_cents)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Which way cash moved through an ATM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashDirection {
    /// Cash went into the drawer.
    Deposit,
    /// Cash left the drawer.
    Withdrawal,
}

impl CashDirection {
    /// The signed drawer/vault delta for `amount` moving in this direction.
    pub fn signed(&self, amount_cents: u64) -> Result<i64, GuardViolation> {
        let amount =
            i64::try_from(amount_cents).map_err(|_| GuardViolation::AmountOutOfRange(amount_cents))?;
        Ok(match self {
            CashDirection::Deposit => amount,
            CashDirection::Withdrawal => -amount,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CashDirection::Deposit => "DEPOSIT",
            CashDirection::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for CashDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit row for one completed ATM cash movement.
///
/// `user_account_id` is `None` for anonymous operations that only touch the
/// ATM's own vault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashOperation {
    pub atm_id: AtmId,
    pub amount_cents: u64,
    pub direction: CashDirection,
    pub user_account_id: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_account_is_empty_and_active() {
        let account = Account::open(7, 3);
        assert_eq!(account.id, 7);
        assert_eq!(account.owner_id, 3);
        assert_eq!(account.balance_cents, 0);
        assert_eq!(account.status, AccountStatus::Active);
        assert!(account.ensure_active().is_ok());
    }

    #[test]
    fn debit_refuses_to_go_negative() {
        let mut account = Account::open(1, 1);
        account.credit(100).unwrap();

        let err = account.debit(101).unwrap_err();
        assert_eq!(
            err,
            GuardViolation::InsufficientFunds {
                account_id: 1,
                balance: 100,
                requested: 101,
            }
        );
        assert_eq!(account.balance_cents, 100);

        account.debit(100).unwrap();
        assert_eq!(account.balance_cents, 0);
    }

    #[test]
    fn credit_refuses_to_overflow() {
        let mut account = Account::open(1, 1);
        account.balance_cents = u64::MAX - 1;
        assert_eq!(account.credit(2).unwrap_err(), GuardViolation::Overflow(1));
        assert_eq!(account.balance_cents, u64::MAX - 1);
    }

    #[test]
    fn adjust_applies_signed_deltas() {
        let mut account = Account::open(1, 1);
        account.adjust(500).unwrap();
        account.adjust(-200).unwrap();
        assert_eq!(account.balance_cents, 300);
        assert!(account.adjust(-301).is_err());
        assert_eq!(account.balance_cents, 300);
    }

    #[test]
    fn blocked_account_fails_guard() {
        let mut account = Account::open(9, 1);
        account.status = AccountStatus::Blocked;
        assert_eq!(
            account.ensure_active().unwrap_err(),
            GuardViolation::AccountBlocked(9)
        );
    }

    #[test]
    fn cash_direction_signs_amounts() {
        assert_eq!(CashDirection::Deposit.signed(250).unwrap(), 250);
        assert_eq!(CashDirection::Withdrawal.signed(250).unwrap(), -250);
        assert!(CashDirection::Deposit.signed(u64::MAX).is_err());
    }

    #[test]
    fn transaction_involves_both_sides() {
        let tx = Transaction {
            id: 1,
            sender_id: 10,
            receiver_id: 20,
            amount_cents: 5,
            description: "x".into(),
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
        };
        assert!(tx.involves(10));
        assert!(tx.involves(20));
        assert!(!tx.involves(30));
    }

    #[test]
    fn atm_debug_hides_password_hash() {
        let atm = Atm {
            id: 1,
            login: "atm-01".into(),
            account_id: 2,
            password_hash: b"secret-hash".to_vec(),
            cash_cents: 0,
            created_at: Utc::now(),
        };
        let rendered = format!("{atm:?}");
        assert!(rendered.contains("atm-01"));
        assert!(!rendered.contains("secret-hash"));
        assert!(!rendered.contains("password_hash"));
    }

    #[test]
    fn statuses_render_as_storage_strings() {
        assert_eq!(AccountStatus::Blocked.to_string(), "BLOCKED");
        assert_eq!(TransactionStatus::Pending.to_string(), "PENDING");
        assert_eq!(Requester::User(42).to_string(), "user:42");
        assert_eq!(Requester::System.user_id(), None);
    }
}
