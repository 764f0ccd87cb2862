use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use std::collections::BTreeMap;

use super::db::table_exists;
use crate::error::{Error, Result};
use crate::model::{LedgerEntry, Outcome, Version};

/// Default name of the schema history table.
pub const DEFAULT_HISTORY_TABLE: &str = "strata_schema_history";

/// The schema history: which versions were applied, when, and with which
/// checksum.
///
/// The ledger only appends. Rows are never updated or deleted.
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    table: String,
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self {
            table: DEFAULT_HISTORY_TABLE.to_string(),
        }
    }
}

struct RawEntry {
    version: String,
    description: String,
    script: String,
    checksum: String,
    applied_at: String,
    execution_ms: i64,
}

impl HistoryLedger {
    /// Use a custom history table name.
    ///
    /// The name is interpolated into SQL, so only plain identifiers are
    /// accepted.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let mut chars = table.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::InvalidData(format!(
                "history table name {table:?} is not a plain SQL identifier"
            )));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the history table if it does not exist yet.
    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                script TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                execution_ms INTEGER NOT NULL,
                success INTEGER NOT NULL DEFAULT 1
            );",
            table = self.table
        ))
        .map_err(|e| {
            Error::ledger_unavailable(format!("cannot create history table {}", self.table), e)
        })
    }

    /// Load every applied version, creating the history table on first use.
    pub fn load_applied(&self, conn: &Connection) -> Result<BTreeMap<Version, LedgerEntry>> {
        self.ensure(conn)?;
        self.read_rows(conn)
    }

    /// Load every applied version without writing to the database.
    ///
    /// A missing history table reads as an empty history.
    pub fn read_applied(&self, conn: &Connection) -> Result<BTreeMap<Version, LedgerEntry>> {
        let exists = table_exists(conn, &self.table).map_err(|e| {
            Error::ledger_unavailable(format!("cannot inspect history table {}", self.table), e)
        })?;
        if !exists {
            return Ok(BTreeMap::new());
        }
        self.read_rows(conn)
    }

    fn read_rows(&self, conn: &Connection) -> Result<BTreeMap<Version, LedgerEntry>> {
        let raw = self.query_raw(conn).map_err(|e| {
            Error::ledger_unavailable(format!("cannot read history table {}", self.table), e)
        })?;

        let mut applied = BTreeMap::new();
        for row in raw {
            let entry = Self::parse_row(row)?;
            let version = entry.version.clone();
            if applied.insert(version.clone(), entry).is_some() {
                return Err(Error::DuplicateLedgerEntry { version });
            }
        }

        Ok(applied)
    }

    fn query_raw(&self, conn: &Connection) -> rusqlite::Result<Vec<RawEntry>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT version, description, script, checksum, applied_at, execution_ms
             FROM {}
             WHERE success = 1",
            self.table
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawEntry {
                    version: row.get(0)?,
                    description: row.get(1)?,
                    script: row.get(2)?,
                    checksum: row.get(3)?,
                    applied_at: row.get(4)?,
                    execution_ms: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn parse_row(row: RawEntry) -> Result<LedgerEntry> {
        let version = Version::parse(&row.version).map_err(|e| {
            Error::InvalidData(format!("history row {:?}: {e}", row.version))
        })?;
        let applied_at = DateTime::parse_from_rfc3339(&row.applied_at)
            .map_err(|e| Error::InvalidData(format!("history row {version}: applied_at: {e}")))?
            .with_timezone(&Utc);

        Ok(LedgerEntry {
            version,
            description: row.description,
            script: row.script,
            checksum: row.checksum,
            applied_at,
            execution_ms: u64::try_from(row.execution_ms).unwrap_or(0),
            outcome: Outcome::Success,
        })
    }

    /// Append one entry.
    ///
    /// Call this on the transaction that executed the migration so the
    /// schema change and its record commit or roll back together.
    pub fn record_applied(&self, conn: &Connection, entry: &LedgerEntry) -> Result<()> {
        let result = conn.execute(
            &format!(
                "INSERT INTO {} (version, description, script, checksum, applied_at, execution_ms, success)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                self.table
            ),
            rusqlite::params![
                entry.version.to_string(),
                entry.description,
                entry.script,
                entry.checksum,
                entry.applied_at.to_rfc3339(),
                i64::try_from(entry.execution_ms).unwrap_or(i64::MAX),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                Err(Error::DuplicateLedgerEntry {
                    version: entry.version.clone(),
                })
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    /// Number of recorded versions.
    pub fn count(&self, conn: &Connection) -> Result<usize> {
        self.ensure(conn)?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE success = 1", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MigrationFile, MigrationName};
    use chrono::Utc;
    use std::path::{Path, PathBuf};

    fn migration(name: &str, body: &str) -> MigrationFile {
        let parsed = MigrationName::parse(name, Path::new(name)).unwrap();
        MigrationFile::new(parsed, name.to_string(), PathBuf::from(name), body.to_string())
    }

    #[test]
    fn test_load_applied_creates_table_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = HistoryLedger::default();

        assert!(ledger.load_applied(&conn).unwrap().is_empty());
        assert!(ledger.load_applied(&conn).unwrap().is_empty());
        assert_eq!(ledger.count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_record_and_load_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = HistoryLedger::default();
        ledger.ensure(&conn).unwrap();

        let file = migration("V10__later.sql", "SELECT 1;");
        let entry = LedgerEntry::for_migration(&file, Utc::now(), 12);
        ledger.record_applied(&conn, &entry).unwrap();
        let file = migration("V2__earlier.sql", "SELECT 2;");
        ledger
            .record_applied(&conn, &LedgerEntry::for_migration(&file, Utc::now(), 3))
            .unwrap();

        let applied = ledger.load_applied(&conn).unwrap();
        let versions: Vec<String> = applied.keys().map(ToString::to_string).collect();
        assert_eq!(versions, vec!["2", "10"]);

        let loaded = &applied[&Version::parse("10").unwrap()];
        assert_eq!(loaded.checksum, entry.checksum);
        assert_eq!(loaded.script, "V10__later.sql");
        assert_eq!(loaded.execution_ms, 12);
        assert_eq!(loaded.outcome, Outcome::Success);
    }

    #[test]
    fn test_record_twice_is_duplicate_version() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = HistoryLedger::default();
        ledger.ensure(&conn).unwrap();

        let entry = LedgerEntry::for_migration(&migration("V1__init.sql", "SELECT 1;"), Utc::now(), 1);
        ledger.record_applied(&conn, &entry).unwrap();
        let err = ledger.record_applied(&conn, &entry).unwrap_err();

        assert!(matches!(err, Error::DuplicateLedgerEntry { .. }), "{err:?}");
        assert_eq!(ledger.count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_record_inside_rolled_back_transaction_leaves_no_row() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ledger = HistoryLedger::default();
        ledger.ensure(&conn).unwrap();

        let entry = LedgerEntry::for_migration(&migration("V1__init.sql", "SELECT 1;"), Utc::now(), 1);
        let tx = conn.transaction().unwrap();
        ledger.record_applied(&tx, &entry).unwrap();
        tx.rollback().unwrap();

        assert_eq!(ledger.count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_read_applied_never_creates_the_table() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = HistoryLedger::default();

        assert!(ledger.read_applied(&conn).unwrap().is_empty());
        assert!(!table_exists(&conn, ledger.table()).unwrap());

        ledger.ensure(&conn).unwrap();
        let entry = LedgerEntry::for_migration(&migration("V1__init.sql", "SELECT 1;"), Utc::now(), 1);
        ledger.record_applied(&conn, &entry).unwrap();
        assert_eq!(ledger.read_applied(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_custom_table_name_validation() {
        assert!(HistoryLedger::new("flyway_schema_history").is_ok());
        assert!(HistoryLedger::new("_history2").is_ok());
        assert!(HistoryLedger::new("").is_err());
        assert!(HistoryLedger::new("2history").is_err());
        assert!(HistoryLedger::new("history; DROP TABLE users").is_err());
    }
}
