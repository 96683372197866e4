//! # ATM Credentials
//!
//! ATMs authenticate with a login and a password. The ledger stores only a
//! bcrypt hash of the password and checks logins through the
//! [`CredentialVerifier`] trait so the scheme can be swapped without touching
//! the engine.
//!
//! ## Stored Format
//!
//! The standard modular-crypt bcrypt string:
//!
//! ```text
//! $2b$<cost>$<22 chars salt><31 chars digest>
//! ```
//!
//! The cost is embedded in the stored value, so raising the default cost
//! later does not invalidate existing hashes. Hashes written by other bcrypt
//! implementations (`$2a$`, `$2y$`) verify as well.

use thiserror::Error;

use crate::config::{MAX_HASH_COST, MIN_HASH_COST};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("password does not match")]
    Mismatch,

    #[error("malformed stored hash: {0}")]
    Malformed(String),

    #[error("hash cost {0} is out of range")]
    InvalidCost(u32),
}

/// Hashes and verifies ATM passwords.
///
/// Both operations are CPU-bound. Async callers should run them on
/// a blocking thread.
pub trait CredentialVerifier: Send + Sync + 'static {
    /// Produces a storable hash of `password` at work factor `cost`.
    fn hash(&self, password: &str, cost: u32) -> Result<Vec<u8>, CredentialError>;

    /// `Ok(())` when `password` matches `stored_hash`.
    fn compare(&self, password: &str, stored_hash: &[u8]) -> Result<(), CredentialError>;
}

/// bcrypt via the `bcrypt` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BcryptCredentials;

impl BcryptCredentials {
    fn check_cost(cost: u32) -> Result<(), CredentialError> {
        if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&cost) {
            return Err(CredentialError::InvalidCost(cost));
        }
        Ok(())
    }

    /// Reads the cost field so an oversized one is refused before any work.
    fn stored_cost(text: &str) -> Result<u32, CredentialError> {
        let mut parts = text.split('$');
        let (Some(""), Some(_version), Some(cost)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CredentialError::Malformed("not a bcrypt hash".into()));
        };
        cost.parse()
            .map_err(|_| CredentialError::Malformed(format!("bad cost {cost:?}")))
    }
}

impl CredentialVerifier for BcryptCredentials {
    fn hash(&self, password: &str, cost: u32) -> Result<Vec<u8>, CredentialError> {
        Self::check_cost(cost)?;
        let parts = bcrypt::hash_with_result(password, cost)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        Ok(parts.to_string().into_bytes())
    }

    fn compare(&self, password: &str, stored_hash: &[u8]) -> Result<(), CredentialError> {
        let text = std::str::from_utf8(stored_hash)
            .map_err(|_| CredentialError::Malformed("not utf-8".into()))?;
        Self::check_cost(Self::stored_cost(text)?)?;
        match bcrypt::verify(password, text) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CredentialError::Mismatch),
            Err(e) => Err(CredentialError::Malformed(e.to_string())),
        }
    }
}
