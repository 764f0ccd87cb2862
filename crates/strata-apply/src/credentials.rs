//! Already-resolved connection parameters.
//!
//! Secrets are fetched by whatever invokes strata (a pipeline step, a secret
//! manager agent) and handed over as a JSON document of the form
//! `{"engine", "host", "port", "dbname", "username", "password"}`. Strata
//! only reads the fields; it never retrieves secrets itself.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use strata_core::schema::Database;
use strata_core::{Error, Result};

const SUPPORTED_ENGINES: &[&str] = &["sqlite", "sqlite3"];

#[derive(Clone, Deserialize)]
pub struct ConnectionSecret {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub dbname: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_engine() -> String {
    "sqlite".to_string()
}

impl fmt::Debug for ConnectionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSecret")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConnectionSecret {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Path of the database file described by this secret.
    ///
    /// For SQLite `dbname` is the file path. Network fields have no meaning
    /// for a file database and are ignored.
    pub fn database_path(&self) -> Result<PathBuf> {
        let engine = self.engine.to_ascii_lowercase();
        if !SUPPORTED_ENGINES.contains(&engine.as_str()) {
            return Err(Error::InvalidData(format!(
                "database engine {:?} is not supported (expected one of: {})",
                self.engine,
                SUPPORTED_ENGINES.join(", ")
            )));
        }
        if self.dbname.trim().is_empty() {
            return Err(Error::InvalidData("credentials have an empty dbname".to_string()));
        }
        if self.host.is_some() || self.port.is_some() || self.username.is_some() {
            log::debug!("Ignoring network fields in credentials for a SQLite target");
        }
        Ok(PathBuf::from(&self.dbname))
    }

    pub fn database(&self) -> Result<Database> {
        Ok(Database::new(self.database_path()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_redacted_in_debug() {
        let secret = ConnectionSecret::from_json(
            r#"{"host": "db.internal", "port": 5432, "dbname": "app.db",
                "username": "migrator", "password": "hunter2"}"#,
        )
        .unwrap();

        let debug = format!("{secret:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_sqlite_secret_resolves_to_path() {
        let secret = ConnectionSecret::from_json(r#"{"dbname": "/var/lib/app/app.db"}"#).unwrap();
        assert_eq!(secret.engine, "sqlite");
        assert_eq!(
            secret.database_path().unwrap(),
            PathBuf::from("/var/lib/app/app.db")
        );
    }

    #[test]
    fn test_unsupported_engine_is_rejected() {
        let secret = ConnectionSecret::from_json(
            r#"{"engine": "postgres", "host": "h", "port": 5432, "dbname": "app"}"#,
        )
        .unwrap();
        assert!(matches!(secret.database_path(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_missing_dbname_is_a_parse_error() {
        let err = ConnectionSecret::from_json(r#"{"engine": "sqlite"}"#).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
