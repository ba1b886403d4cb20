//! Account store and balance-transfer core.
//!
//! Repositories run on an explicit transaction handle when the caller has
//! one; services own transaction boundaries.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::StoreConfig;
pub use db::{
    ConnectionPool, ConnectionSource, DbError, DbLocation, DbResult, DirectSource,
    ManagedConnection, PoolConfig, PoolStats, TransactionManager, Tx, TxId,
};
pub use error::ErrorKind;
pub use logging::{
    default_log_level, init_logging, init_stderr_logging, logging_status, LogSink, LoggingError,
};
pub use model::account::{Account, AccountId, AccountValidationError};
pub use repo::account_repo::{AccountRepository, RepoError, RepoResult, SqliteAccountRepository};
pub use service::account_service::AccountService;
pub use service::transfer_service::{
    AcceptAll, RejectSentinel, TransferError, TransferFailure, TransferReceipt, TransferResult,
    TransferService, TransferState, TransferValidator, ValidationError, DEFAULT_SENTINEL_ID,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
