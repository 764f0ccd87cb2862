use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;
use strata_apply::{Applier, Config, Discoverer, Fanout, JsonLinesSink, LogSink, Manifest, RunReport};

use super::Outcome;

#[derive(Debug, clap::Args)]
pub struct ApplyArgs {
    /// Directory containing migration files
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Build manifest the directory must match
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// JSON file with already-resolved connection parameters
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Stop the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Append per-migration events as JSON lines to this file
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Apply pending versions older than the latest applied one
    #[arg(long)]
    pub out_of_order: bool,
}

impl ApplyArgs {
    /// Fold the flags into the loaded configuration.
    fn apply_to(self, config: &mut Config) {
        if let Some(dir) = self.dir {
            config.migrations_dir = dir;
        }
        if let Some(manifest) = self.manifest {
            config.manifest_path = Some(manifest);
        }
        if let Some(credentials) = self.credentials {
            config.credentials_file = Some(credentials);
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(events) = self.events {
            config.events_path = Some(events);
        }
        if self.out_of_order {
            config.out_of_order = true;
        }
    }
}

pub fn run_apply(mut config: Config, args: ApplyArgs) -> Result<Outcome> {
    args.apply_to(&mut config);

    let db = config.database()?;
    if let Some(parent) = db.path().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let mut applier = Applier::new(db, Discoverer::new(&config.migrations_dir))
        .with_ledger(config.history_ledger()?)
        .allow_out_of_order(config.out_of_order)
        .with_sink(event_sink(&config)?);

    if let Some(path) = &config.manifest_path {
        let manifest = Manifest::load(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        applier = applier.with_manifest(manifest);
    }
    if let Some(budget) = config.timeout() {
        applier = applier.with_budget(budget);
    }

    let report = applier.run();
    print_report(&report);

    Ok(if report.is_idle() {
        Outcome::Done
    } else {
        Outcome::Halted
    })
}

fn event_sink(config: &Config) -> Result<Fanout> {
    let mut sink = Fanout::new().with(LogSink);
    if let Some(path) = &config.events_path {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open events file {}", path.display()))?;
        sink = sink.with(JsonLinesSink::new(file));
    }
    Ok(sink)
}

fn print_report(report: &RunReport) {
    if let Some(build_id) = &report.build_id {
        println!("Build: {}", build_id);
    }

    for applied in &report.applied {
        println!(
            "  ✓ {} {} ({})",
            applied.version,
            applied.description,
            format_duration(applied.duration)
        );
    }

    match report.error() {
        None if report.applied.is_empty() => {
            println!(
                "Schema is up to date ({} migrations applied)",
                report.already_applied
            );
        }
        None => {
            println!(
                "\n✓ Applied {} migrations in {}",
                report.applied.len(),
                format_duration(report.duration)
            );
        }
        Some(e) => {
            if !report.applied.is_empty() {
                println!("\nApplied {} migrations before halting", report.applied.len());
            }
            eprintln!("{}", halt_message(e));
        }
    }
}

fn halt_message(e: &strata_core::Error) -> String {
    let mut message = match e.version() {
        Some(version) => format!("✗ Halted at version {}: {}: {}", version, e.kind(), e),
        None => format!("✗ Halted: {}: {}", e.kind(), e),
    };
    if e.is_preflight() {
        message.push_str("\n  Nothing was applied; the database was not changed");
    }
    message
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() > 0 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        let args = ApplyArgs {
            dir: Some(PathBuf::from("db/migrations")),
            manifest: None,
            credentials: None,
            timeout: Some(30),
            events: None,
            out_of_order: true,
        };

        args.apply_to(&mut config);

        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert!(config.out_of_order);
        assert!(config.manifest_path.is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
    }

    #[test]
    fn test_halted_run_maps_to_halted_outcome() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let migrations = temp_dir.path().join("migrations");
        std::fs::create_dir_all(&migrations).unwrap();
        std::fs::write(migrations.join("V1__bad.sql"), "CREATE TABLE (;").unwrap();

        let config = Config {
            database_path: temp_dir.path().join("target.db"),
            migrations_dir: migrations,
            ..Config::default()
        };
        let args = ApplyArgs {
            dir: None,
            manifest: None,
            credentials: None,
            timeout: None,
            events: Some(temp_dir.path().join("events.jsonl")),
            out_of_order: false,
        };

        assert_eq!(run_apply(config, args).unwrap(), Outcome::Halted);

        let events = std::fs::read_to_string(temp_dir.path().join("events.jsonl")).unwrap();
        let outcomes: Vec<serde_json::Value> = events
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1]["outcome"], "failed");
    }

    #[test]
    fn test_halt_message_says_when_nothing_changed() {
        let drift = strata_core::Error::DriftDetected {
            version: strata_core::model::Version::parse("4").unwrap(),
            path: PathBuf::from("V4__users.sql"),
            recorded: "aaa".to_string(),
            current: "bbb".to_string(),
        };
        let message = halt_message(&drift);
        assert!(message.starts_with("✗ Halted at version 4: DriftDetected"), "{message}");
        assert!(message.contains("Nothing was applied"));

        let timeout = strata_core::Error::Timeout { version: None };
        assert!(!halt_message(&timeout).contains("Nothing was applied"));
    }
}
