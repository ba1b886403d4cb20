//! Connection sources and the scoped connection guard.
//!
//! # Responsibility
//! - Define the acquire contract shared by direct and pooled sources.
//! - Release every acquired connection on every exit path.
//!
//! # Invariants
//! - Release never panics and never propagates an error; failures are logged.
//! - A pooled connection is reset to autocommit, or discarded, before it
//!   becomes idle again.

use super::open::ConnectionFactory;
use super::pool::PooledSqlite;
use super::DbResult;
use log::{debug, error, warn};
use rusqlite::Connection;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Provider of scoped connections.
///
/// Release is tied to dropping the returned [`ManagedConnection`].
pub trait ConnectionSource: Send + Sync {
    fn acquire(&self) -> DbResult<ManagedConnection>;

    /// Short label used in log lines (`direct`, `pool`).
    fn kind(&self) -> &'static str;
}

enum Handle {
    Direct(Connection),
    Pooled(PooledSqlite),
}

/// Connection guard returned by [`ConnectionSource::acquire`].
///
/// Dropping the guard closes a direct connection or hands a pooled one back
/// to its pool.
pub struct ManagedConnection {
    handle: Option<Handle>,
    serial: u64,
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl ManagedConnection {
    fn direct(conn: Connection, serial: u64) -> Self {
        Self {
            handle: Some(Handle::Direct(conn)),
            serial,
        }
    }

    pub(super) fn pooled(conn: PooledSqlite) -> Self {
        let serial = conn.serial;
        Self {
            handle: Some(Handle::Pooled(conn)),
            serial,
        }
    }

    /// Process-unique number identifying the physical connection.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.handle, Some(Handle::Pooled(_)))
    }
}

pub(super) fn next_serial() -> u64 {
    NEXT_CONNECTION_SERIAL.fetch_add(1, Ordering::Relaxed)
}

impl Deref for ManagedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self.handle.as_ref() {
            Some(Handle::Direct(conn)) => conn,
            Some(Handle::Pooled(pooled)) => &pooled.conn,
            None => unreachable!("connection is only taken during drop"),
        }
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        match self.handle.take() {
            Some(Handle::Direct(conn)) => {
                if let Err((_, err)) = conn.close() {
                    error!(
                        "event=conn_release module=db status=error source=direct serial={} error_code=close_failed error={}",
                        self.serial, err
                    );
                } else {
                    debug!(
                        "event=conn_release module=db status=ok source=direct serial={}",
                        self.serial
                    );
                }
            }
            Some(Handle::Pooled(pooled)) => {
                reset_for_reuse(&pooled.conn, self.serial);
                debug!(
                    "event=conn_release module=db status=ok source=pool serial={}",
                    self.serial
                );
            }
            None => {}
        }
    }
}

/// Rolls back a transaction left open on a connection headed back to a pool.
///
/// If the rollback fails the pool discards the connection on return.
fn reset_for_reuse(conn: &Connection, serial: u64) {
    if conn.is_autocommit() {
        return;
    }

    warn!("event=conn_release module=db status=reset source=pool serial={serial} reason=open_transaction");
    if let Err(err) = conn.execute_batch("ROLLBACK;") {
        error!(
            "event=conn_release module=db status=error source=pool serial={serial} error_code=reset_failed error={err}"
        );
    }
}

/// Opens a new connection for every acquire, closing it on release.
pub struct DirectSource {
    factory: ConnectionFactory,
}

impl DirectSource {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self { factory }
    }
}

impl ConnectionSource for DirectSource {
    fn acquire(&self) -> DbResult<ManagedConnection> {
        let conn = self.factory.open()?;
        let serial = next_serial();
        debug!("event=conn_acquire module=db status=ok source=direct serial={serial}");
        Ok(ManagedConnection::direct(conn, serial))
    }

    fn kind(&self) -> &'static str {
        "direct"
    }
}
