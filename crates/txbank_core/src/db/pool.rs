//! Bounded connection pool backed by r2d2.
//!
//! # Responsibility
//! - Reuse connections across acquires.
//! - Bound the number of open connections and make waiters block.
//!
//! # Invariants
//! - Open connections never exceed `max_size`.
//! - Waiters give up with `DbError::PoolTimeout` after `acquire_timeout`;
//!   exhaustion is never a deadlock.
//! - A connection still inside a transaction is never handed out again.

use super::open::ConnectionFactory;
use super::source::{next_serial, ConnectionSource, ManagedConnection};
use super::{DbError, DbResult};
use log::{debug, warn};
use r2d2::{ManageConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Pool sizing and wait policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of simultaneously open connections.
    pub max_size: usize,
    /// How long `acquire` waits for a connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.max_size == 0 {
            return Err(DbError::InvalidConfig(
                "pool max_size must be at least 1".to_string(),
            ));
        }
        if u32::try_from(self.max_size).is_err() {
            return Err(DbError::InvalidConfig(format!(
                "pool max_size {} is too large",
                self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(DbError::InvalidConfig(
                "pool acquire_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// Physical connection tagged with a process-unique serial.
pub(super) struct SerialConnection {
    pub(super) serial: u64,
    pub(super) conn: Connection,
}

pub(super) type PooledSqlite = PooledConnection<AccountStoreManager>;

/// r2d2 manager numbering every connection it opens.
pub(super) struct AccountStoreManager {
    inner: SqliteConnectionManager,
}

impl ManageConnection for AccountStoreManager {
    type Connection = SerialConnection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<SerialConnection, rusqlite::Error> {
        let conn = self.inner.connect()?;
        let serial = next_serial();
        debug!("event=conn_open module=db status=ok source=pool serial={serial}");
        Ok(SerialConnection { serial, conn })
    }

    fn is_valid(&self, conn: &mut SerialConnection) -> Result<(), rusqlite::Error> {
        self.inner.is_valid(&mut conn.conn)
    }

    // Checked when a connection comes back; broken ones are closed.
    fn has_broken(&self, conn: &mut SerialConnection) -> bool {
        !conn.conn.is_autocommit()
    }
}

/// Connection pool handing out [`ManagedConnection`] guards.
pub struct ConnectionPool {
    pool: Pool<AccountStoreManager>,
    max_size: usize,
    // Keeps in-memory databases alive.
    _factory: ConnectionFactory,
}

impl ConnectionPool {
    pub fn new(factory: ConnectionFactory, config: PoolConfig) -> DbResult<Self> {
        config.validate()?;
        let max_size = u32::try_from(config.max_size).unwrap_or(u32::MAX);

        let manager = AccountStoreManager {
            inner: factory.manager(),
        };
        // Connections open on demand; none are pre-created.
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .connection_timeout(config.acquire_timeout)
            .build_unchecked(manager);

        Ok(Self {
            pool,
            max_size: config.max_size,
            _factory: factory,
        })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.pool.state();
        let open = state.connections as usize;
        let idle = state.idle_connections as usize;
        PoolStats {
            max_size: self.max_size,
            open,
            idle,
            in_use: open.saturating_sub(idle),
        }
    }
}

impl ConnectionSource for ConnectionPool {
    fn acquire(&self) -> DbResult<ManagedConnection> {
        let started_at = Instant::now();
        match self.pool.get() {
            Ok(conn) => {
                debug!(
                    "event=conn_acquire module=db status=ok source=pool serial={}",
                    conn.serial
                );
                Ok(ManagedConnection::pooled(conn))
            }
            Err(source) => {
                let waited = started_at.elapsed();
                warn!(
                    "event=conn_acquire module=db status=error source=pool error_code=pool_timeout waited_ms={} max_size={} error={source}",
                    waited.as_millis(),
                    self.max_size
                );
                Err(DbError::PoolTimeout {
                    waited,
                    max_size: self.max_size,
                    source,
                })
            }
        }
    }

    fn kind(&self) -> &'static str {
        "pool"
    }
}
