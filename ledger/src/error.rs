//! # Ledger Errors
//!
//! Every engine operation returns [`LedgerResult`]. The variants are the
//! business outcomes callers branch on; storage faults collapse into
//! [`LedgerError::Storage`] and are never shown to end users verbatim.

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::store::{GuardViolation, StoreError};
use crate::types::{AccountId, AtmId};

/// Stable, payload-free classification of a [`LedgerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    BlockedAccount,
    NotEnoughMoney,
    AccessDenied,
    Unauthorized,
    InvalidAmount,
    InvalidRequest,
    Conflict,
    Storage,
}

impl ErrorKind {
    /// Machine-readable code used in API error bodies and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::BlockedAccount => "blocked_account",
            ErrorKind::NotEnoughMoney => "not_enough_money",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
        }
    }
}

/// What went wrong with a ledger operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("atm {0} not found")]
    AtmNotFound(String),

    #[error("account {0} is blocked")]
    BlockedAccount(AccountId),

    #[error("account {account_id} holds {balance} cents, {requested} requested")]
    NotEnoughMoney {
        account_id: AccountId,
        balance: u64,
        requested: u64,
    },

    #[error("requester may not act on account {0}")]
    AccessDenied(AccountId),

    #[error("invalid credentials for atm {0}")]
    Unauthorized(AtmId),

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),

    #[error("internal failure: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_) | LedgerError::AtmNotFound(_) => ErrorKind::NotFound,
            LedgerError::BlockedAccount(_) => ErrorKind::BlockedAccount,
            LedgerError::NotEnoughMoney { .. } => ErrorKind::NotEnoughMoney,
            LedgerError::AccessDenied(_) => ErrorKind::AccessDenied,
            LedgerError::Unauthorized(_) => ErrorKind::Unauthorized,
            LedgerError::InvalidAmount => ErrorKind::InvalidAmount,
            LedgerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Storage(_) | LedgerError::Internal(_) => ErrorKind::Storage,
        }
    }

    /// Text safe to show an end user. Storage details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::AccountNotFound(_) => "account not found".into(),
            LedgerError::AtmNotFound(_) => "atm not found".into(),
            LedgerError::BlockedAccount(_) => "account is blocked".into(),
            LedgerError::NotEnoughMoney { .. } => "not enough money".into(),
            LedgerError::AccessDenied(_) => "access denied".into(),
            LedgerError::Unauthorized(_) => "invalid atm credentials".into(),
            LedgerError::InvalidAmount => "amount must be positive".into(),
            LedgerError::InvalidRequest(reason) => reason.clone(),
            LedgerError::Conflict(reason) => reason.clone(),
            LedgerError::Storage(_) | LedgerError::Internal(_) => "internal error".into(),
        }
    }

    /// Only storage faults may succeed on a plain retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_) | LedgerError::Internal(_))
    }
}

impl From<GuardViolation> for LedgerError {
    fn from(violation: GuardViolation) -> Self {
        match violation {
            GuardViolation::MissingAccount(id) => LedgerError::AccountNotFound(id),
            GuardViolation::MissingAtm(id) => LedgerError::AtmNotFound(id.to_string()),
            GuardViolation::AccountBlocked(id) => LedgerError::BlockedAccount(id),
            GuardViolation::InsufficientFunds {
                account_id,
                balance,
                requested,
            } => LedgerError::NotEnoughMoney {
                account_id,
                balance,
                requested,
            },
            GuardViolation::DuplicateLogin(login) => {
                LedgerError::Conflict(format!("atm login {login:?} is already taken"))
            }
            GuardViolation::AmountOutOfRange(_) => LedgerError::InvalidAmount,
            v @ GuardViolation::Overflow(_) => LedgerError::Storage(StoreError::Guard(v)),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Guard(violation) => violation.into(),
            other => LedgerError::Storage(other),
        }
    }
}

impl From<CredentialError> for LedgerError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidCost(cost) => {
                LedgerError::InvalidRequest(format!("hash cost {cost} is out of range"))
            }
            other => LedgerError::Storage(StoreError::Corrupt(other.to_string())),
        }
    }
}
