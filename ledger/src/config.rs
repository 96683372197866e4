//! # Ledger Constants
//!
//! Numbers and strings the rest of the ledger agrees on. Runtime knobs
//! (database path, listen addresses, timeouts chosen by the operator) live in
//! the node's configuration file; these are the defaults and hard limits.

use std::time::Duration;

use crate::types::UserId;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// External user id reserved for the bank itself.
///
/// ATM vault accounts are owned by this user. No customer can hold it because
/// user ids issued by the identity service start at 1.
pub const SYSTEM_USER_ID: UserId = 0;

// ---------------------------------------------------------------------------
// ATM
// ---------------------------------------------------------------------------

/// Description attached to the vault → customer transfer of an ATM deposit.
pub const ATM_DEPOSIT_DESCRIPTION: &str = "ATM deposit";

/// Description attached to the customer → vault transfer of an ATM withdrawal.
pub const ATM_WITHDRAWAL_DESCRIPTION: &str = "ATM withdrawal";

/// Longest accepted ATM login.
pub const MAX_ATM_LOGIN_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Longest accepted transfer description, in bytes. Longer descriptions are
/// truncated at a character boundary.
pub const MAX_DESCRIPTION_LENGTH: usize = 256;

/// Page size used by the history endpoint when the caller does not pick one.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Largest page the history endpoint will serve.
pub const MAX_HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Default bcrypt work factor: `2^10` key-expansion rounds.
pub const DEFAULT_HASH_COST: u32 = 10;

/// Lowest accepted work factor, and bcrypt's own floor.
pub const MIN_HASH_COST: u32 = 4;

/// Highest accepted work factor. A single login at this cost already takes
/// minutes.
pub const MAX_HASH_COST: u32 = 24;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Request deadline applied when the caller does not supply one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the settlement worker looks for pending transactions.
pub const DEFAULT_SETTLEMENT_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum number of pending transactions handed to the settlement hook per pass.
pub const DEFAULT_SETTLEMENT_BATCH: usize = 100;
