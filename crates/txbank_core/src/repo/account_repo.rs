//! Account repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide create/get/update/delete over the `accounts` table.
//! - Run on the caller's transaction when one is passed, on a scoped
//!   connection from the source otherwise.
//! - Translate SQLite failures into store-neutral errors.
//!
//! # Invariants
//! - Each operation executes exactly one parameterized statement.
//! - Write paths validate account input before SQL mutations.
//! - Read paths never return a partially decoded account.

use crate::db::{ConnectionSource, DbError, Tx};
use crate::error::ErrorKind;
use crate::model::account::{Account, AccountId, AccountValidationError};
use log::{debug, error};
use rusqlite::{ffi, params, Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

const INSERT_ACCOUNT_SQL: &str = "INSERT INTO accounts (account_id, balance) VALUES (?1, ?2);";
const SELECT_ACCOUNT_SQL: &str =
    "SELECT account_id, balance FROM accounts WHERE account_id = ?1;";
const UPDATE_BALANCE_SQL: &str = "UPDATE accounts SET balance = ?1 WHERE account_id = ?2;";
const DELETE_ACCOUNT_SQL: &str = "DELETE FROM accounts WHERE account_id = ?1;";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for account persistence operations.
#[derive(Debug)]
pub enum RepoError {
    NotFound(AccountId),
    /// Primary-key or unique constraint hit on insert.
    DuplicateKey {
        id: AccountId,
        source: rusqlite::Error,
    },
    InvalidAccount(AccountValidationError),
    Db(DbError),
    InvalidData(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::InvalidAccount(_) => ErrorKind::ValidationFailure,
            Self::Db(_) | Self::InvalidData(_) => ErrorKind::DataAccessFailure,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "account not found: {id}"),
            Self::DuplicateKey { id, .. } => write!(f, "account already exists: {id}"),
            Self::InvalidAccount(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted account data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound(_) => None,
            Self::DuplicateKey { source, .. } => Some(source),
            Self::InvalidAccount(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<AccountValidationError> for RepoError {
    fn from(value: AccountValidationError) -> Self {
        Self::InvalidAccount(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Maps a SQLite failure for account `id` onto the repository taxonomy.
///
/// Primary-key and unique violations become [`RepoError::DuplicateKey`];
/// everything else is a data-access failure.
pub fn translate_sqlite_error(err: rusqlite::Error, id: &str) -> RepoError {
    if is_unique_violation(&err) {
        return RepoError::DuplicateKey {
            id: id.to_string(),
            source: err,
        };
    }
    RepoError::Db(DbError::Sqlite(err))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        }
        _ => false,
    }
}

/// Repository interface for account CRUD operations.
///
/// Every method takes the caller's transaction, if any. `None` runs the
/// statement in autocommit mode on a connection acquired for that call.
pub trait AccountRepository {
    fn create(&self, tx: Option<&Tx>, account: &Account) -> RepoResult<()>;
    fn get_by_id(&self, tx: Option<&Tx>, id: &str) -> RepoResult<Account>;
    /// Fails with `NotFound` when no row was changed.
    fn update_balance(&self, tx: Option<&Tx>, id: &str, balance: i64) -> RepoResult<()>;
    /// Returns whether a row was removed. Deleting a missing id is not an error.
    fn delete(&self, tx: Option<&Tx>, id: &str) -> RepoResult<bool>;
}

impl<R: AccountRepository + ?Sized> AccountRepository for &R {
    fn create(&self, tx: Option<&Tx>, account: &Account) -> RepoResult<()> {
        (**self).create(tx, account)
    }

    fn get_by_id(&self, tx: Option<&Tx>, id: &str) -> RepoResult<Account> {
        (**self).get_by_id(tx, id)
    }

    fn update_balance(&self, tx: Option<&Tx>, id: &str, balance: i64) -> RepoResult<()> {
        (**self).update_balance(tx, id, balance)
    }

    fn delete(&self, tx: Option<&Tx>, id: &str) -> RepoResult<bool> {
        (**self).delete(tx, id)
    }
}

/// SQLite-backed account repository.
#[derive(Clone)]
pub struct SqliteAccountRepository {
    source: Arc<dyn ConnectionSource>,
}

impl SqliteAccountRepository {
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self { source }
    }

    /// Runs `op` on the transaction's connection, or on a connection
    /// acquired for this call and released when `op` returns.
    fn run<T>(
        &self,
        tx: Option<&Tx>,
        event: &'static str,
        id: &str,
        op: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let mode = if tx.is_some() { "tx" } else { "auto" };

        let result = match tx {
            Some(tx) => op(tx.connection()),
            None => self
                .source
                .acquire()
                .map_err(RepoError::from)
                .and_then(|conn| op(&conn)),
        };

        let tx_id = tx.map(|tx| tx.id().to_string()).unwrap_or_default();
        match &result {
            Ok(_) => debug!(
                "event={event} module=repo status=ok mode={mode} tx_id={tx_id} account_id={id} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(RepoError::NotFound(_)) => debug!(
                "event={event} module=repo status=not_found mode={mode} tx_id={tx_id} account_id={id} duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event={event} module=repo status=error mode={mode} tx_id={tx_id} account_id={id} error_kind={} error={err}",
                err.kind()
            ),
        }
        result
    }
}

impl AccountRepository for SqliteAccountRepository {
    fn create(&self, tx: Option<&Tx>, account: &Account) -> RepoResult<()> {
        account.validate()?;

        let id = account.id.as_str();
        self.run(tx, "account_create", id, |conn| {
            let translate = |err| translate_sqlite_error(err, id);
            let mut stmt = conn.prepare(INSERT_ACCOUNT_SQL).map_err(translate)?;
            stmt.execute(params![id, account.balance]).map_err(translate)?;
            Ok(())
        })
    }

    fn get_by_id(&self, tx: Option<&Tx>, id: &str) -> RepoResult<Account> {
        self.run(tx, "account_get", id, |conn| {
            let translate = |err| translate_sqlite_error(err, id);
            let mut stmt = conn.prepare(SELECT_ACCOUNT_SQL).map_err(translate)?;
            let mut rows = stmt.query(params![id]).map_err(translate)?;

            let account = match rows.next().map_err(translate)? {
                Some(row) => parse_account_row(row, id)?,
                None => return Err(RepoError::NotFound(id.to_string())),
            };
            Ok(account)
        })
    }

    fn update_balance(&self, tx: Option<&Tx>, id: &str, balance: i64) -> RepoResult<()> {
        self.run(tx, "account_update", id, |conn| {
            let translate = |err| translate_sqlite_error(err, id);
            let mut stmt = conn.prepare(UPDATE_BALANCE_SQL).map_err(translate)?;
            let changed = stmt.execute(params![balance, id]).map_err(translate)?;

            if changed == 0 {
                return Err(RepoError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn delete(&self, tx: Option<&Tx>, id: &str) -> RepoResult<bool> {
        self.run(tx, "account_delete", id, |conn| {
            let translate = |err| translate_sqlite_error(err, id);
            let mut stmt = conn.prepare(DELETE_ACCOUNT_SQL).map_err(translate)?;
            let changed = stmt.execute(params![id]).map_err(translate)?;
            Ok(changed > 0)
        })
    }
}

fn parse_account_row(row: &Row<'_>, requested_id: &str) -> RepoResult<Account> {
    let id: String = row
        .get("account_id")
        .map_err(|err| translate_sqlite_error(err, requested_id))?;
    let balance: i64 = row.get("balance").map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid balance for account `{requested_id}` in accounts.balance: {err}"
        ))
    })?;

    if id != requested_id {
        return Err(RepoError::InvalidData(format!(
            "row for `{requested_id}` carries account_id `{id}`"
        )));
    }

    Ok(Account { id, balance })
}
