//! Transaction demarcation over connection sources.
//!
//! # Responsibility
//! - Begin a transaction on a connection owned exclusively by one [`Tx`].
//! - End it exactly once, by commit or by rollback.
//! - Offer `with_transaction` as the closure-scoped demarcation helper.
//!
//! # Invariants
//! - A `Tx` owns its connection; it cannot be shared by two callers.
//! - A `Tx` dropped without commit/rollback is rolled back.
//! - Cleanup failures are logged and never replace the primary error.

use super::source::{ConnectionSource, ManagedConnection};
use super::{DbError, DbResult};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Identifier attached to every transaction for log correlation.
pub type TxId = Uuid;

/// Open transaction handle.
///
/// Store operations receive `Option<&Tx>` and run on [`Tx::connection`]
/// when a handle is present.
pub struct Tx {
    id: TxId,
    started_at: Instant,
    conn: Option<ManagedConnection>,
}

impl Tx {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("transaction connection is only taken when finishing"),
        }
    }

    /// Serial of the underlying physical connection.
    pub fn connection_serial(&self) -> u64 {
        self.conn.as_ref().map_or(0, ManagedConnection::serial)
    }

    fn take_connection(&mut self) -> Option<ManagedConnection> {
        self.conn.take()
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        warn!(
            "event=tx_abandoned module=tx status=rollback tx_id={} duration_ms={}",
            self.id,
            self.started_at.elapsed().as_millis()
        );
        if let Err(err) = conn.execute_batch("ROLLBACK;") {
            error!(
                "event=tx_abandoned module=tx status=error tx_id={} error_code=rollback_failed error={}",
                self.id, err
            );
        }
    }
}

/// Begins, commits and rolls back transactions on connections drawn from a
/// [`ConnectionSource`].
#[derive(Clone)]
pub struct TransactionManager {
    source: Arc<dyn ConnectionSource>,
}

impl TransactionManager {
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self { source }
    }

    /// Acquires a connection and opens an immediate (write-locking)
    /// transaction on it.
    pub fn begin(&self) -> DbResult<Tx> {
        let conn = self.source.acquire()?;
        conn.execute_batch("BEGIN IMMEDIATE;")?;

        let tx = Tx {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            conn: Some(conn),
        };
        debug!(
            "event=tx_begin module=tx status=ok tx_id={} source={} serial={}",
            tx.id,
            self.source.kind(),
            tx.connection_serial()
        );
        Ok(tx)
    }

    /// Commits `tx` and releases its connection.
    ///
    /// When `COMMIT` itself fails the transaction is rolled back before the
    /// commit error is returned.
    pub fn commit(&self, mut tx: Tx) -> DbResult<()> {
        let Some(conn) = tx.take_connection() else {
            return Ok(());
        };

        match conn.execute_batch("COMMIT;") {
            Ok(()) => {
                info!(
                    "event=tx_commit module=tx status=ok tx_id={} duration_ms={}",
                    tx.id,
                    tx.started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=tx_commit module=tx status=error tx_id={} error_code=commit_failed error={}",
                    tx.id, err
                );
                if !conn.is_autocommit() {
                    rollback_quietly(&conn, tx.id);
                }
                Err(DbError::Sqlite(err))
            }
        }
    }

    /// Rolls back `tx` and releases its connection.
    pub fn rollback(&self, mut tx: Tx) -> DbResult<()> {
        let Some(conn) = tx.take_connection() else {
            return Ok(());
        };

        conn.execute_batch("ROLLBACK;")?;
        info!(
            "event=tx_rollback module=tx status=ok tx_id={} duration_ms={}",
            tx.id,
            tx.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Runs `work` inside a new transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back when it returns `Err`.
    /// A failing rollback is logged; the error from `work` is what the
    /// caller sees.
    pub fn with_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Tx) -> Result<T, E>,
        E: From<DbError>,
    {
        let tx = self.begin()?;
        match work(&tx) {
            Ok(value) => {
                self.commit(tx)?;
                Ok(value)
            }
            Err(err) => {
                let tx_id = tx.id();
                if let Err(rollback_err) = self.rollback(tx) {
                    error!(
                        "event=tx_rollback module=tx status=error tx_id={tx_id} error_code=rollback_failed error={rollback_err}"
                    );
                }
                Err(err)
            }
        }
    }
}

fn rollback_quietly(conn: &Connection, tx_id: TxId) {
    if let Err(err) = conn.execute_batch("ROLLBACK;") {
        error!(
            "event=tx_rollback module=tx status=error tx_id={tx_id} error_code=rollback_failed error={err}"
        );
    }
}
