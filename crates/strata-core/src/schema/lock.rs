use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::time::Duration;

use super::db::{table_exists, BUSY_TIMEOUT};
use crate::error::{Error, Result};

/// How long `acquire` waits for another writer before reporting a
/// concurrent run.
const LOCK_WAIT: Duration = Duration::from_millis(250);

/// Table holding the single advisory run-lock row.
pub const LOCK_TABLE: &str = "strata_run_lock";

/// Who holds the run lock, as stored in the lock table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Advisory lock that keeps two runs from applying against the same
/// database at once.
///
/// The lock is a single row in [`LOCK_TABLE`]. Acquiring inserts it, and
/// dropping the guard deletes it. A crashed run can leave the row behind;
/// [`RunLock::force_release`] clears it.
#[derive(Debug)]
pub struct RunLock<'c> {
    conn: &'c Connection,
    holder: String,
}

impl<'c> RunLock<'c> {
    /// Take the lock or fail fast with `ConcurrentRunDetected`.
    ///
    /// `conn` must be in autocommit mode so the lock row is visible to
    /// other connections immediately.
    pub fn acquire(conn: &'c Connection, holder: impl Into<String>) -> Result<Self> {
        let holder = holder.into();

        // A run inside a migration holds the write lock for the whole
        // transaction; do not wait for it.
        conn.busy_timeout(LOCK_WAIT)?;
        let inserted = create_table(conn).and_then(|()| {
            conn.execute(
                &format!("INSERT INTO {LOCK_TABLE} (id, holder, acquired_at) VALUES (1, ?1, ?2)"),
                rusqlite::params![holder, Utc::now().to_rfc3339()],
            )
        });
        conn.busy_timeout(BUSY_TIMEOUT)?;

        match inserted {
            Ok(_) => {
                log::debug!("Acquired run lock as {holder}");
                Ok(Self { conn, holder })
            }
            Err(e) if is_contention(&e) => Err(Self::held_by_other(conn)),
            Err(e) => Err(Error::ledger_unavailable("cannot take run lock", e)),
        }
    }

    /// `ConcurrentRunDetected` naming the current holder when it can be read.
    pub fn held_by_other(conn: &Connection) -> Error {
        match Self::current(conn) {
            Ok(Some(current)) => Error::ConcurrentRunDetected {
                holder: current.holder,
                since: current.acquired_at.to_rfc3339(),
            },
            _ => Error::ConcurrentRunDetected {
                holder: "unknown".to_string(),
                since: "unknown".to_string(),
            },
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Read the current lock holder, if any. Never writes.
    pub fn current(conn: &Connection) -> Result<Option<LockHolder>> {
        if !table_exists(conn, LOCK_TABLE)? {
            return Ok(None);
        }
        let row: Option<(String, String)> = conn
            .query_row(
                &format!("SELECT holder, acquired_at FROM {LOCK_TABLE} WHERE id = 1"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(holder, acquired_at)| {
            let acquired_at = DateTime::parse_from_rfc3339(&acquired_at)
                .map_err(|e| Error::InvalidData(format!("run lock acquired_at: {e}")))?
                .with_timezone(&Utc);
            Ok(LockHolder {
                holder,
                acquired_at,
            })
        })
        .transpose()
    }

    /// Remove the lock row regardless of who holds it.
    ///
    /// Returns whether a lock was present.
    pub fn force_release(conn: &Connection) -> Result<bool> {
        if !table_exists(conn, LOCK_TABLE)? {
            return Ok(false);
        }
        let removed = conn.execute(&format!("DELETE FROM {LOCK_TABLE} WHERE id = 1"), [])?;
        Ok(removed > 0)
    }
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        let released = self.conn.execute(
            &format!("DELETE FROM {LOCK_TABLE} WHERE id = 1 AND holder = ?1"),
            [&self.holder],
        );
        match released {
            Ok(_) => log::debug!("Released run lock held by {}", self.holder),
            Err(e) => log::warn!(
                "Failed to release run lock held by {}: {}; run `strata unlock` to clear it",
                self.holder,
                e
            ),
        }
    }
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn create_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        );"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Database;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("lock.db"));
        let first_conn = db.connect().unwrap();
        let second_conn = db.connect().unwrap();

        let lock = RunLock::acquire(&first_conn, "run-a").unwrap();
        assert_eq!(lock.holder(), "run-a");

        let err = RunLock::acquire(&second_conn, "run-b").unwrap_err();
        match err {
            Error::ConcurrentRunDetected { holder, .. } => assert_eq!(holder, "run-a"),
            other => panic!("expected ConcurrentRunDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("lock.db"));
        let conn = db.connect().unwrap();

        {
            let _lock = RunLock::acquire(&conn, "run-a").unwrap();
            assert!(RunLock::current(&conn).unwrap().is_some());
        }

        assert!(RunLock::current(&conn).unwrap().is_none());
        let _again = RunLock::acquire(&conn, "run-b").unwrap();
    }

    #[test]
    fn test_busy_writer_is_reported_without_waiting() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("lock.db"));
        let first_conn = db.connect().unwrap();
        let second_conn = db.connect().unwrap();

        let lock = RunLock::acquire(&first_conn, "run-a").unwrap();
        first_conn
            .execute_batch("BEGIN IMMEDIATE; CREATE TABLE in_flight (x INTEGER);")
            .unwrap();

        let started = std::time::Instant::now();
        let err = RunLock::acquire(&second_conn, "run-b").unwrap_err();
        assert!(started.elapsed() < BUSY_TIMEOUT, "{:?}", started.elapsed());
        match err {
            Error::ConcurrentRunDetected { holder, .. } => assert_eq!(holder, "run-a"),
            other => panic!("expected ConcurrentRunDetected, got {other:?}"),
        }

        first_conn.execute_batch("ROLLBACK;").unwrap();
        drop(lock);
    }

    #[test]
    fn test_current_does_not_create_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(RunLock::current(&conn).unwrap().is_none());
        assert!(!table_exists(&conn, LOCK_TABLE).unwrap());
    }

    #[test]
    fn test_force_release_clears_stale_lock() {
        let conn = Connection::open_in_memory().unwrap();
        let lock = RunLock::acquire(&conn, "crashed").unwrap();
        std::mem::forget(lock);

        assert_eq!(
            RunLock::current(&conn).unwrap().map(|h| h.holder),
            Some("crashed".to_string())
        );
        assert!(RunLock::force_release(&conn).unwrap());
        assert!(!RunLock::force_release(&conn).unwrap());
    }
}
