use backon::{BlockingRetryable, ExponentialBuilder};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// How long a statement waits on a locked database before giving up.
pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of extra attempts when the database is busy at open time.
pub const DEFAULT_CONNECT_RETRIES: usize = 3;

/// The target database of a run.
///
/// `Database` does not hold a connection. Each caller acquires one with
/// [`Database::connect`] and the store is released when that connection is
/// dropped, on success and error paths alike.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    connect_retries: usize,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connect_retries: DEFAULT_CONNECT_RETRIES,
        }
    }

    /// Set the number of retries used when the database is busy or locked.
    #[must_use]
    pub fn with_connect_retries(mut self, retries: usize) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection to the database.
    ///
    /// Transient busy/locked failures are retried with exponential backoff.
    /// Anything that still fails is reported as `LedgerUnavailable`.
    pub fn connect(&self) -> Result<Connection> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.connect_retries);

        (|| self.try_connect())
            .retry(backoff)
            .sleep(std::thread::sleep)
            .when(is_transient)
            .notify(|err, dur| {
                log::warn!(
                    "Database {} not ready ({}), retrying in {:?}",
                    self.path.display(),
                    err,
                    dur
                );
            })
            .call()
            .map_err(|e| {
                Error::ledger_unavailable(format!("cannot open {}", self.path.display()), e)
            })
    }

    fn try_connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Readers must not wait on a run that is inside a migration.
        // In-memory databases stay in "memory" mode.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        log::trace!("Journal mode for {} is {}", self.path.display(), mode);
        // Opening is lazy; touch the schema so unreadable files fail here.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(conn)
    }

    /// Open an existing database without creating or changing anything.
    ///
    /// Returns `None` when the database file does not exist yet.
    pub fn connect_read_only(&self) -> Result<Option<Connection>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let open = || -> rusqlite::Result<Connection> {
            let conn = Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(conn)
        };
        open().map(Some).map_err(|e| {
            Error::ledger_unavailable(format!("cannot open {} read-only", self.path.display()), e)
        })
    }

    /// A private in-memory database.
    ///
    /// Every connection gets its own empty database, so this is only useful
    /// for work that happens on a single connection, such as a dry run.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }
}

/// Whether `table` exists, without creating it.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
