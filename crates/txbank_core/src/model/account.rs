//! Account domain model.
//!
//! # Responsibility
//! - Define the persisted account record (id + balance).
//! - Validate account identifiers before they reach storage.
//!
//! # Invariants
//! - `id` is non-empty, at most [`MAX_ACCOUNT_ID_LEN`] characters and uses
//!   only ASCII letters, digits, `_`, `-` and `.`.
//! - Balances are plain signed integers; no sign rule is enforced here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Longest accepted account identifier.
pub const MAX_ACCOUNT_ID_LEN: usize = 64;

static ACCOUNT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid account id regex"));

/// Caller-chosen primary key of an account.
pub type AccountId = String;

/// Account record as stored in the `accounts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: i64,
}

/// Validation failures for account input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountValidationError {
    EmptyId,
    IdTooLong { len: usize },
    InvalidIdCharacters(String),
}

impl Display for AccountValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "account id cannot be empty"),
            Self::IdTooLong { len } => write!(
                f,
                "account id is {len} characters long; at most {MAX_ACCOUNT_ID_LEN} allowed"
            ),
            Self::InvalidIdCharacters(id) => {
                write!(f, "account id `{id}` contains unsupported characters")
            }
        }
    }
}

impl Error for AccountValidationError {}

impl Account {
    pub fn new(id: impl Into<AccountId>, balance: i64) -> Self {
        Self {
            id: id.into(),
            balance,
        }
    }

    /// Checks identifier rules before persistence.
    pub fn validate(&self) -> Result<(), AccountValidationError> {
        validate_account_id(&self.id)
    }
}

/// Applies account identifier rules to a raw id.
pub fn validate_account_id(id: &str) -> Result<(), AccountValidationError> {
    if id.is_empty() {
        return Err(AccountValidationError::EmptyId);
    }
    let len = id.chars().count();
    if len > MAX_ACCOUNT_ID_LEN {
        return Err(AccountValidationError::IdTooLong { len });
    }
    if !ACCOUNT_ID_RE.is_match(id) {
        return Err(AccountValidationError::InvalidIdCharacters(id.to_string()));
    }
    Ok(())
}
