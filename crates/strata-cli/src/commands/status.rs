use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use strata_apply::{status_rows, Config, Discoverer, MigrationState};
use strata_core::schema::RunLock;

use super::Outcome;

/// Report applied, pending, drifted and missing migrations.
///
/// Opens the database read-only; a missing file or history table reads as
/// an empty history.
pub fn show_status(config: &Config, dir: Option<PathBuf>) -> Result<Outcome> {
    let discoverer = Discoverer::new(dir.unwrap_or_else(|| config.migrations_dir.clone()));
    let db = config.database()?;
    let ledger = config.history_ledger()?;

    let set = discoverer.discover()?;
    let (history, lock) = match db.connect_read_only()? {
        Some(conn) => (ledger.read_applied(&conn)?, RunLock::current(&conn)?),
        None => (BTreeMap::new(), None),
    };
    let rows = status_rows(&set, &history);

    println!("\nStrata Status\n");
    println!("  Database: {}", db.path().display());
    println!("  History table: {}", ledger.table());
    println!("  Migrations: {}", discoverer.dir().display());

    match lock {
        Some(lock) => println!(
            "  Run lock: held by {} since {}",
            lock.holder,
            lock.acquired_at.to_rfc3339()
        ),
        None => println!("  Run lock: free"),
    }

    if rows.is_empty() {
        println!("\n  No migrations found");
        return Ok(Outcome::Done);
    }

    println!();
    println!("  {:<12} {:<9} {:<26} DESCRIPTION", "VERSION", "STATE", "APPLIED AT");
    for row in &rows {
        let applied_at = row
            .applied_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        println!(
            "  {:<12} {:<9} {:<26} {}",
            row.version.to_string(),
            row.state.to_string(),
            applied_at,
            row.description
        );
    }

    let count = |state: MigrationState| rows.iter().filter(|r| r.state == state).count();
    println!(
        "\n  {} applied, {} pending, {} drifted, {} missing",
        count(MigrationState::Applied),
        count(MigrationState::Pending),
        count(MigrationState::Drifted),
        count(MigrationState::Missing)
    );

    if count(MigrationState::Drifted) > 0 {
        println!("\n  Drifted migrations were edited after they were applied; `strata apply` will refuse to run");
    } else if count(MigrationState::Pending) > 0 {
        println!("\n  Run `strata apply` to apply pending migrations");
    }

    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use strata_core::schema::{table_exists, Database, HistoryLedger};
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> Config {
        Config {
            database_path: temp_dir.path().join("app.db"),
            migrations_dir: temp_dir.path().join("migrations"),
            ..Config::default()
        }
    }

    #[test]
    fn test_status_does_not_create_database() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        fs::create_dir_all(&config.migrations_dir).unwrap();
        fs::write(config.migrations_dir.join("V1__t.sql"), "CREATE TABLE t (x INTEGER);").unwrap();

        assert_eq!(show_status(&config, None).unwrap(), Outcome::Done);
        assert!(!config.database_path.exists());
    }

    #[test]
    fn test_status_does_not_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        fs::create_dir_all(&config.migrations_dir).unwrap();
        let conn = Database::new(&config.database_path).connect().unwrap();
        conn.execute_batch("CREATE TABLE app (x INTEGER);").unwrap();

        assert_eq!(show_status(&config, None).unwrap(), Outcome::Done);

        assert!(!table_exists(&conn, HistoryLedger::default().table()).unwrap());
        assert!(!table_exists(&conn, "strata_run_lock").unwrap());
    }
}
