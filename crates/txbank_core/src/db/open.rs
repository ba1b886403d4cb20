//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by core behavior.
//! - Apply schema migrations once, when a factory is created.
//!
//! # Invariants
//! - Returned connections have `busy_timeout` configured.
//! - File databases run in WAL mode so readers never observe a writer's
//!   uncommitted pages.
//! - No factory exists for a database whose migrations failed.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Busy timeout used when callers do not configure one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the account store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// SQLite database file, created when missing.
    File(PathBuf),
    /// Private in-memory database shared by every connection of one factory.
    Memory,
}

impl DbLocation {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens bootstrapped connections against one database location.
///
/// In-memory databases only live while at least one connection is open, so
/// the factory keeps an anchor connection for its own lifetime.
pub struct ConnectionFactory {
    location: DbLocation,
    target: String,
    busy_timeout: Duration,
    _anchor: Option<Mutex<Connection>>,
}

impl ConnectionFactory {
    /// Creates the factory and prepares the schema once on a bootstrap
    /// connection.
    pub fn new(location: DbLocation, busy_timeout: Duration) -> DbResult<Self> {
        let target = match &location {
            DbLocation::File(path) => path.to_string_lossy().into_owned(),
            // Lock conflicts on memdb go through the busy handler.
            DbLocation::Memory => format!("file:/txbank-{}?vfs=memdb", Uuid::new_v4().simple()),
        };

        let mut factory = Self {
            location,
            target,
            busy_timeout,
            _anchor: None,
        };
        let mut conn = factory.open()?;
        prepare_schema(&mut conn, &factory.location)?;
        if factory.location == DbLocation::Memory {
            factory._anchor = Some(Mutex::new(conn));
        }
        Ok(factory)
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }

    /// Opens a new connection with `busy_timeout` configured.
    ///
    /// # Side effects
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(&self) -> DbResult<Connection> {
        let started_at = Instant::now();
        let mode = self.location.mode();
        info!("event=db_open module=db status=start mode={mode}");

        let opened = Connection::open(&self.target).and_then(|conn| {
            conn.busy_timeout(self.busy_timeout)?;
            Ok(conn)
        });
        match opened {
            Ok(conn) => {
                info!(
                    "event=db_open module=db status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(conn)
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// r2d2 manager opening connections the same way as [`Self::open`].
    pub(super) fn manager(&self) -> SqliteConnectionManager {
        let busy_timeout = self.busy_timeout;
        SqliteConnectionManager::file(&self.target)
            .with_init(move |conn| conn.busy_timeout(busy_timeout))
    }
}

/// Opens a single SQLite database file and applies all pending migrations.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    ConnectionFactory::new(
        DbLocation::File(path.as_ref().to_path_buf()),
        DEFAULT_BUSY_TIMEOUT,
    )?
    .open()
}

/// Opens a standalone in-memory database visible only to the returned
/// connection.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    prepare_schema(&mut conn, &DbLocation::Memory)?;
    Ok(conn)
}

/// Switches file databases to WAL and applies pending migrations.
fn prepare_schema(conn: &mut Connection, location: &DbLocation) -> DbResult<()> {
    if let DbLocation::File(_) = location {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
    }
    apply_migrations(conn)?;
    Ok(())
}
