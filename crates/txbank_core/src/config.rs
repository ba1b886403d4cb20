//! Store configuration and connection-source wiring.
//!
//! # Responsibility
//! - Describe where the store lives and how connections are provided.
//! - Build the matching `ConnectionSource` after validating the settings.
//!
//! # Invariants
//! - A built source has passed `validate()`.
//! - Direct and pooled sources built from the same `Memory` config are
//!   separate databases; share one source to share data.

use crate::db::{
    ConnectionFactory, ConnectionPool, ConnectionSource, DbError, DbLocation, DbResult,
    DirectSource, PoolConfig, TransactionManager, DEFAULT_BUSY_TIMEOUT,
};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Settings for opening the account store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub location: DbLocation,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// `None` opens a new connection per acquire.
    pub pool: Option<PoolConfig>,
}

impl StoreConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            pool: None,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            pool: None,
        }
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn pooled(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.busy_timeout.is_zero() {
            return Err(DbError::InvalidConfig(
                "busy_timeout must be non-zero".to_string(),
            ));
        }
        if let DbLocation::File(path) = &self.location {
            if path.as_os_str().is_empty() {
                return Err(DbError::InvalidConfig(
                    "database path cannot be empty".to_string(),
                ));
            }
        }
        if let Some(pool) = &self.pool {
            pool.validate()?;
        }
        Ok(())
    }

    /// Validates the settings and builds the connection source.
    pub fn build_source(&self) -> DbResult<Arc<dyn ConnectionSource>> {
        self.validate()?;
        let factory = ConnectionFactory::new(self.location.clone(), self.busy_timeout)?;

        let source: Arc<dyn ConnectionSource> = match self.pool {
            Some(pool) => Arc::new(ConnectionPool::new(factory, pool)?),
            None => Arc::new(DirectSource::new(factory)),
        };
        info!(
            "event=store_open module=config status=ok source={} pool_max={}",
            source.kind(),
            self.pool.map_or(0, |pool| pool.max_size)
        );
        Ok(source)
    }

    /// Builds the source and a transaction manager sharing it.
    pub fn build(&self) -> DbResult<(Arc<dyn ConnectionSource>, TransactionManager)> {
        let source = self.build_source()?;
        let tx_manager = TransactionManager::new(Arc::clone(&source));
        Ok((source, tx_manager))
    }
}
