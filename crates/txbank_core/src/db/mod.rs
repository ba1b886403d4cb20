//! SQLite storage bootstrap, connection sources and transaction control.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the account store.
//! - Hand out scoped connections, either freshly opened or pooled.
//! - Demarcate transactions and release their connections exactly once.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No connection is handed out before migrations succeed on its database.
//! - A connection is held by at most one transaction at a time.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod migrations;
mod open;
mod pool;
mod source;
pub mod tx;

pub use open::{
    open_db, open_db_in_memory, ConnectionFactory, DbLocation, DEFAULT_BUSY_TIMEOUT,
};
pub use pool::{ConnectionPool, PoolConfig, PoolStats};
pub use source::{ConnectionSource, DirectSource, ManagedConnection};
pub use tx::{TransactionManager, Tx, TxId};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// No pooled connection became available before the acquire deadline.
    PoolTimeout {
        waited: Duration,
        max_size: usize,
        source: r2d2::Error,
    },
    InvalidConfig(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::PoolTimeout { waited, max_size, .. } => write!(
                f,
                "no pooled connection available after {}ms (max_size={max_size})",
                waited.as_millis()
            ),
            Self::InvalidConfig(message) => write!(f, "invalid store configuration: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
            Self::PoolTimeout { source, .. } => Some(source),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
