use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use strata_core::schema::{Database, HistoryLedger, DEFAULT_CONNECT_RETRIES, DEFAULT_HISTORY_TABLE};

use crate::credentials::ConnectionSecret;

/// Configuration for strata.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (STRATA_* prefix)
/// 3. Config file (~/.config/strata/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the target SQLite database.
    ///
    /// Can be set via:
    /// - CLI: --db /path/to/db
    /// - ENV: STRATA_DATABASE_PATH
    /// - Config: database_path = "/path/to/db"
    /// - Default: ~/.local/share/strata/strata.db
    pub database_path: PathBuf,

    /// JSON credentials file; when set, its `dbname` wins over `database_path`.
    pub credentials_file: Option<PathBuf>,

    /// Directory holding the `V<version>__<description>.sql` files.
    pub migrations_dir: PathBuf,

    /// Build manifest the discovered files must match.
    pub manifest_path: Option<PathBuf>,

    /// Name of the schema history table.
    pub history_table: String,

    /// Retries when the database is busy at open time.
    pub connect_retries: usize,

    /// Run budget in seconds. Unset means no limit.
    pub timeout_secs: Option<u64>,

    /// Allow pending versions older than the latest applied one.
    pub out_of_order: bool,

    /// Append per-migration events as JSON lines to this file.
    pub events_path: Option<PathBuf>,

    pub logging: LoggingConfig,
}

/// Logger settings, applied by the CLI at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
    pub coloured: bool,
    pub report_caller: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            coloured: true,
            report_caller: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            credentials_file: None,
            migrations_dir: PathBuf::from("migrations"),
            manifest_path: None,
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            connect_retries: DEFAULT_CONNECT_RETRIES,
            timeout_secs: None,
            out_of_order: false,
            events_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Keys accepted by `strata config get` and `strata config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "database_path",
    "credentials_file",
    "migrations_dir",
    "manifest_path",
    "history_table",
    "connect_retries",
    "timeout_secs",
    "out_of_order",
    "events_path",
];

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/strata/config.toml
    /// Reads environment variables with STRATA_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("strata");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;

        Ok(config)
    }

    /// Load configuration with custom database path.
    ///
    /// This is used when the --db CLI flag is provided.
    pub fn load_with_db_path(db_path: PathBuf) -> Result<Self> {
        let mut config = Self::load()?;
        config.database_path = db_path;
        Ok(config)
    }

    /// The target database: from the credentials file if one is configured,
    /// otherwise `database_path`.
    pub fn database(&self) -> Result<Database> {
        let db = match &self.credentials_file {
            Some(path) => ConnectionSecret::load(path)
                .and_then(|secret| secret.database())
                .with_context(|| format!("Failed to read credentials from {}", path.display()))?,
            None => Database::new(&self.database_path),
        };
        Ok(db.with_connect_retries(self.connect_retries))
    }

    pub fn history_ledger(&self) -> Result<HistoryLedger> {
        HistoryLedger::new(&self.history_table).context("Invalid history_table setting")
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Render a single setting for `strata config get`.
    pub fn get(&self, key: &str) -> Option<String> {
        fn path_or_unset(path: Option<&PathBuf>) -> String {
            path.map(|p| p.display().to_string())
                .unwrap_or_else(|| String::from("<not set>"))
        }

        let value = match key {
            "database_path" => self.database_path.display().to_string(),
            "credentials_file" => path_or_unset(self.credentials_file.as_ref()),
            "migrations_dir" => self.migrations_dir.display().to_string(),
            "manifest_path" => path_or_unset(self.manifest_path.as_ref()),
            "history_table" => self.history_table.clone(),
            "connect_retries" => self.connect_retries.to_string(),
            "timeout_secs" => self
                .timeout_secs
                .map(|t| t.to_string())
                .unwrap_or_else(|| String::from("<not set>")),
            "out_of_order" => self.out_of_order.to_string(),
            "events_path" => path_or_unset(self.events_path.as_ref()),
            _ => return None,
        };
        Some(value)
    }
}

/// Get the default database path.
///
/// Returns: ~/.local/share/strata/strata.db (or platform equivalent)
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("strata")
        .join("strata.db")
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/strata/config.toml
/// - macOS: ~/Library/Application Support/strata/config.toml
/// - Windows: %APPDATA%\strata\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("strata")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Strata Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (STRATA_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Path to the target SQLite database
#
# Can also be set via:
# - CLI: strata --db /custom/path.db apply
# - Environment: STRATA_DATABASE_PATH=/custom/path.db
#
# Default: Platform-specific data directory
#database_path = "/path/to/app.db"

# JSON credentials handed over by the deployment pipeline
# ({"engine": "sqlite", "dbname": "/path/to/app.db", ...}).
# When set, its dbname takes precedence over database_path.
#credentials_file = "/run/secrets/db.json"

# Directory containing V<version>__<description>.sql files
migrations_dir = "migrations"

# Build manifest listing the expected migration files
#manifest_path = "migrations/manifest.json"

# Name of the schema history table
history_table = "strata_schema_history"

# Retries when the database is busy while connecting
connect_retries = 3

# Stop the run after this many seconds (in-flight migration is rolled back)
#timeout_secs = 300

# Apply pending versions that are older than the latest applied version
out_of_order = false

# Append per-migration events as JSON lines
#events_path = "/var/log/strata/events.jsonl"

[logging]
# One of: trace, debug, info, warn, error
level = "info"
coloured = true
report_caller = false
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.database_path.as_os_str().is_empty());
        assert!(config.credentials_file.is_none());
        assert_eq!(config.history_table, DEFAULT_HISTORY_TABLE);
        assert_eq!(config.connect_retries, DEFAULT_CONNECT_RETRIES);
        assert!(!config.out_of_order);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_load() {
        // Should not fail even if config file doesn't exist
        let result = Config::load();
        assert!(result.is_ok());
    }

    #[test]
    fn test_config_with_custom_db_path() {
        let custom_path = PathBuf::from("/tmp/test.db");
        let config = Config::load_with_db_path(custom_path.clone());
        assert!(config.is_ok());
        assert_eq!(config.unwrap().database_path, custom_path);
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(config.history_table, DEFAULT_HISTORY_TABLE);
        assert_eq!(config.logging.level, "info");
        assert!(config.timeout_secs.is_none());
        assert!(config.manifest_path.is_none());
    }

    #[test]
    fn test_get_known_and_unknown_keys() {
        let config = Config::default();
        for key in CONFIG_KEYS {
            assert!(config.get(key).is_some(), "{key} should be readable");
        }
        assert_eq!(config.get("timeout_secs").as_deref(), Some("<not set>"));
        assert!(config.get("api_token").is_none());
    }

    #[test]
    fn test_credentials_file_overrides_database_path() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let secret = temp_dir.path().join("db.json");
        std::fs::write(&secret, r#"{"engine": "sqlite", "dbname": "/srv/app.db"}"#).unwrap();

        let config = Config {
            credentials_file: Some(secret),
            ..Config::default()
        };
        assert_eq!(
            config.database().unwrap().path(),
            std::path::Path::new("/srv/app.db")
        );
    }

    #[test]
    fn test_invalid_history_table_is_rejected() {
        let config = Config {
            history_table: "bad name".to_string(),
            ..Config::default()
        };
        assert!(config.history_ledger().is_err());
    }
}
