//! Pre-deployment validation of a migration directory.
//!
//! Validation never touches the target database. The offline part checks
//! names, ordering and the manifest. The dry run then applies every
//! migration, in order and one transaction each, to a throwaway in-memory
//! database.

use strata_core::schema::Database;
use strata_core::Result;

use crate::applier::{Applier, RunReport};
use crate::discover::{Discoverer, MigrationSet};
use crate::manifest::Manifest;
use crate::observe::EventSink;

#[derive(Debug)]
pub struct ValidationReport {
    pub set: MigrationSet,
    pub build_id: Option<String>,
    /// Present when the dry run was requested.
    pub dry_run: Option<RunReport>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.dry_run.as_ref().map_or(true, RunReport::is_idle)
    }
}

/// Run the offline checks only.
pub fn check_offline(discoverer: &Discoverer, manifest: Option<&Manifest>) -> Result<MigrationSet> {
    let set = discoverer.discover()?;
    if let Some(manifest) = manifest {
        manifest.verify(&set)?;
    }
    Ok(set)
}

/// Validate a migration directory.
///
/// Offline failures are returned as errors. A failing dry run is reported
/// in [`ValidationReport::dry_run`] so the caller sees which version broke.
pub fn validate(
    discoverer: &Discoverer,
    manifest: Option<&Manifest>,
    dry_run: bool,
    sink: impl EventSink + 'static,
) -> Result<ValidationReport> {
    let set = check_offline(discoverer, manifest)?;
    log::info!("{} migrations pass offline checks", set.len());

    let dry_run = dry_run.then(|| {
        log::info!("Dry-running migrations against a scratch database");
        let mut applier = Applier::new(Database::in_memory(), discoverer.clone()).with_sink(sink);
        if let Some(manifest) = manifest {
            applier = applier.with_manifest(manifest.clone());
        }
        applier.run()
    });

    Ok(ValidationReport {
        set,
        build_id: manifest.map(|m| m.build_id.clone()),
        dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::MemorySink;
    use std::fs;
    use strata_core::Error;
    use tempfile::TempDir;

    #[test]
    fn test_dry_run_applies_everything_in_scratch_database() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("V1__t.sql"), "CREATE TABLE t (x INTEGER);").unwrap();
        fs::write(temp_dir.path().join("V2__idx.sql"), "CREATE INDEX t_x ON t (x);").unwrap();

        let sink = MemorySink::new();
        let report = validate(&Discoverer::new(temp_dir.path()), None, true, sink.clone()).unwrap();

        assert!(report.is_valid());
        assert_eq!(report.set.len(), 2);
        assert_eq!(report.dry_run.unwrap().applied.len(), 2);
        assert_eq!(sink.events().len(), 4);
    }

    #[test]
    fn test_dry_run_reports_failing_version() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("V1__t.sql"), "CREATE TABLE t (x INTEGER);").unwrap();
        fs::write(temp_dir.path().join("V2__bad.sql"), "ALTER TABLE missing ADD y INTEGER;").unwrap();

        let report = validate(&Discoverer::new(temp_dir.path()), None, true, MemorySink::new()).unwrap();

        assert!(!report.is_valid());
        let dry_run = report.dry_run.unwrap();
        match dry_run.error() {
            Some(Error::ExecutionFailed { version, .. }) => assert_eq!(version.to_string(), "2"),
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_offline_only_skips_execution() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("V1__bad.sql"), "NOT SQL AT ALL").unwrap();

        let report = validate(&Discoverer::new(temp_dir.path()), None, false, MemorySink::new()).unwrap();
        assert!(report.is_valid());
        assert!(report.dry_run.is_none());
    }

    #[test]
    fn test_manifest_mismatch_fails_offline() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("V1__t.sql"), "CREATE TABLE t (x INTEGER);").unwrap();
        let manifest = Manifest {
            build_id: "b-7".to_string(),
            files: vec![],
        };

        let err = validate(
            &Discoverer::new(temp_dir.path()),
            Some(&manifest),
            true,
            MemorySink::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ManifestMismatch { .. }), "{err:?}");
    }
}
