use anyhow::{bail, Context, Result};
use std::path::Path;
use strata_apply::config::{self, CONFIG_KEYS};
use strata_apply::Config;
use toml_edit::{value, DocumentMut};

use super::Outcome;

/// Show the current effective configuration.
pub fn show_config(config: &Config) -> Result<Outcome> {
    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config::config_file_path().display());

    let exists = config::config_file_path().exists();
    println!("File exists: {}\n", if exists { "yes" } else { "no (using defaults)" });

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{}", rendered);

    println!("Priority: CLI args > ENV vars (STRATA_*) > Config file > Defaults");

    Ok(Outcome::Done)
}

/// Get a specific config value.
pub fn get_config(config: &Config, key: Option<String>) -> Result<Outcome> {
    if let Some(key) = key {
        match config.get(&key) {
            Some(value) => println!("{}", value),
            None => bail!(
                "Unknown config key: {}\n\nValid keys: {}",
                key,
                CONFIG_KEYS.join(", ")
            ),
        }
    } else {
        // No key provided, show entire config file contents
        let config_path = config::config_file_path();

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            print!("{}", contents);
        } else {
            println!("Config file does not exist: {}", config_path.display());
            println!("\nRun 'strata config init' to create it.");
        }
    }

    Ok(Outcome::Done)
}

/// Set a config value.
pub fn set_config(key: &str, raw: &str) -> Result<Outcome> {
    let config_path = config::config_file_path();

    // Ensure config file exists
    config::ensure_config_file()?;

    set_in_file(&config_path, key, raw)?;

    println!("✓ Updated {} = {}", key, raw);
    println!("  in {}", config_path.display());

    Ok(Outcome::Done)
}

fn set_in_file(path: &Path, key: &str, raw: &str) -> Result<()> {
    let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
    let updated = set_in_document(&contents, key, raw)?;
    std::fs::write(path, updated).context("Failed to write config file")?;
    Ok(())
}

/// Update one top-level key, keeping comments and layout.
fn set_in_document(contents: &str, key: &str, raw: &str) -> Result<String> {
    let mut doc: DocumentMut = contents.parse().context("Config file is not valid TOML")?;

    let item = match key {
        "connect_retries" | "timeout_secs" => {
            let n: i64 = raw
                .parse()
                .with_context(|| format!("{} must be a whole number, got {:?}", key, raw))?;
            if n < 0 {
                bail!("{} must not be negative", key);
            }
            value(n)
        }
        "out_of_order" => {
            let b: bool = raw
                .parse()
                .with_context(|| format!("{} must be true or false, got {:?}", key, raw))?;
            value(b)
        }
        "history_table" => {
            strata_core::schema::HistoryLedger::new(raw)?;
            value(raw)
        }
        k if CONFIG_KEYS.contains(&k) => value(raw),
        _ => bail!(
            "Unknown config key: {}\n\nValid keys: {}",
            key,
            CONFIG_KEYS.join(", ")
        ),
    };

    doc[key] = item;
    Ok(doc.to_string())
}

/// Show the config file path.
pub fn show_path() -> Result<Outcome> {
    let config_path = config::config_file_path();
    println!("{}", config_path.display());
    Ok(Outcome::Done)
}

/// Show example configuration.
pub fn show_example() -> Result<Outcome> {
    print!("{}", config::example_config());
    Ok(Outcome::Done)
}

/// Initialize config file with defaults.
pub fn init_config() -> Result<Outcome> {
    let created = config::ensure_config_file()?;
    let config_path = config::config_file_path();

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to configure strata.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(Outcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_keeps_comments_and_types() {
        let updated = set_in_document(config::example_config(), "timeout_secs", "120").unwrap();
        assert!(updated.contains("# Strata Configuration File"));

        let parsed: Config = toml::from_str(&updated).unwrap();
        assert_eq!(parsed.timeout_secs, Some(120));
    }

    #[test]
    fn test_set_string_and_bool() {
        let updated = set_in_document("", "migrations_dir", "db/migrations").unwrap();
        let updated = set_in_document(&updated, "out_of_order", "true").unwrap();

        let parsed: Config = toml::from_str(&updated).unwrap();
        assert_eq!(parsed.migrations_dir, std::path::PathBuf::from("db/migrations"));
        assert!(parsed.out_of_order);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        assert!(set_in_document("", "connect_retries", "many").is_err());
        assert!(set_in_document("", "history_table", "drop table").is_err());
        assert!(set_in_document("", "api_token", "x").is_err());
    }

    #[test]
    fn test_set_in_file_round_trip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, config::example_config()).unwrap();

        set_in_file(&path, "database_path", "/srv/app.db").unwrap();

        let parsed: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.database_path, std::path::PathBuf::from("/srv/app.db"));
    }
}
