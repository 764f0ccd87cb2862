//! Compare discovered migrations against the schema history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use strata_core::model::{LedgerEntry, MigrationFile, Version};
use strata_core::{Error, Result};

use crate::discover::MigrationSet;

/// What a run has to do.
#[derive(Debug)]
pub struct Plan<'a> {
    /// Versions to apply, ascending.
    pub pending: Vec<&'a MigrationFile>,
    /// Versions present on disk and already recorded with a matching checksum.
    pub applied: usize,
    /// Recorded versions with no file on disk.
    pub missing: Vec<Version>,
}

/// Diagnose a migration set against the recorded history.
///
/// Fails with `DriftDetected` when any applied file changed, and with
/// `OutOfOrder` when a pending version sorts below the latest applied one
/// and `allow_out_of_order` is off. Both checks run before anything is
/// executed.
pub fn diagnose<'a>(
    set: &'a MigrationSet,
    history: &BTreeMap<Version, LedgerEntry>,
    allow_out_of_order: bool,
) -> Result<Plan<'a>> {
    let mut pending = Vec::new();
    let mut applied = 0;

    for file in set {
        match history.get(file.version()) {
            Some(entry) if entry.checksum != file.checksum() => {
                return Err(Error::DriftDetected {
                    version: file.version().clone(),
                    path: file.path().to_path_buf(),
                    recorded: entry.checksum.clone(),
                    current: file.checksum().to_string(),
                });
            }
            Some(_) => applied += 1,
            None => pending.push(file),
        }
    }

    let missing: Vec<Version> = history
        .keys()
        .filter(|version| set.get(version).is_none())
        .cloned()
        .collect();
    for version in &missing {
        log::warn!("Version {version} is recorded as applied but has no migration file");
    }

    if let (Some(latest), Some(first)) = (history.keys().next_back(), pending.first()) {
        if first.version() < latest {
            if allow_out_of_order {
                log::warn!(
                    "Applying version {} after already applied version {}",
                    first.version(),
                    latest
                );
            } else {
                return Err(Error::OutOfOrder {
                    version: first.version().clone(),
                    latest_applied: latest.clone(),
                });
            }
        }
    }

    Ok(Plan {
        pending,
        applied,
        missing,
    })
}

/// State of one version for `strata status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Applied,
    Pending,
    Drifted,
    Missing,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Applied => "applied",
            Self::Pending => "pending",
            Self::Drifted => "drifted",
            Self::Missing => "missing",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub version: Version,
    pub description: String,
    pub state: MigrationState,
    pub applied_at: Option<DateTime<Utc>>,
}

/// One row per version known on disk or in the history, ascending.
///
/// Unlike [`diagnose`] this never fails: drift is reported, not raised.
pub fn status_rows(set: &MigrationSet, history: &BTreeMap<Version, LedgerEntry>) -> Vec<StatusRow> {
    let mut rows: BTreeMap<Version, StatusRow> = BTreeMap::new();

    for file in set {
        let entry = history.get(file.version());
        let state = match entry {
            Some(entry) if entry.checksum == file.checksum() => MigrationState::Applied,
            Some(_) => MigrationState::Drifted,
            None => MigrationState::Pending,
        };
        rows.insert(
            file.version().clone(),
            StatusRow {
                version: file.version().clone(),
                description: file.description().to_string(),
                state,
                applied_at: entry.map(|e| e.applied_at),
            },
        );
    }

    for (version, entry) in history {
        rows.entry(version.clone()).or_insert_with(|| StatusRow {
            version: version.clone(),
            description: entry.description.clone(),
            state: MigrationState::Missing,
            applied_at: Some(entry.applied_at),
        });
    }

    rows.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use strata_core::model::MigrationName;

    fn file(name: &str, body: &str) -> MigrationFile {
        let parsed = MigrationName::parse(name, Path::new(name)).unwrap();
        MigrationFile::new(parsed, name.to_string(), PathBuf::from(name), body.to_string())
    }

    fn set(files: Vec<MigrationFile>) -> MigrationSet {
        MigrationSet::from_files(files).unwrap()
    }

    fn history(files: &[&MigrationFile]) -> BTreeMap<Version, LedgerEntry> {
        files
            .iter()
            .map(|f| (f.version().clone(), LedgerEntry::for_migration(f, Utc::now(), 1)))
            .collect()
    }

    #[test]
    fn test_pending_are_unrecorded_versions_in_order() {
        let one = file("V1__a.sql", "SELECT 1;");
        let recorded = history(&[&one]);
        let set = set(vec![
            file("V10__c.sql", "SELECT 10;"),
            one,
            file("V2__b.sql", "SELECT 2;"),
        ]);

        let plan = diagnose(&set, &recorded, false).unwrap();
        let pending: Vec<String> = plan.pending.iter().map(|f| f.version().to_string()).collect();
        assert_eq!(pending, vec!["2", "10"]);
        assert_eq!(plan.applied, 1);
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_drift_halts_diagnosis() {
        let original = file("V2__b.sql", "SELECT 2;");
        let recorded = history(&[&file("V1__a.sql", "SELECT 1;"), &original]);
        let set = set(vec![
            file("V1__a.sql", "SELECT 1;"),
            file("V2__b.sql", "SELECT 'edited';"),
            file("V3__c.sql", "SELECT 3;"),
        ]);

        match diagnose(&set, &recorded, false).unwrap_err() {
            Error::DriftDetected {
                version, recorded, ..
            } => {
                assert_eq!(version.to_string(), "2");
                assert_eq!(recorded, original.checksum());
            }
            other => panic!("expected DriftDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_order_pending_is_rejected_unless_allowed() {
        let recorded = history(&[&file("V1__a.sql", "SELECT 1;"), &file("V3__c.sql", "SELECT 3;")]);
        let set = set(vec![
            file("V1__a.sql", "SELECT 1;"),
            file("V2__late.sql", "SELECT 2;"),
            file("V3__c.sql", "SELECT 3;"),
        ]);

        let err = diagnose(&set, &recorded, false).unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }), "{err:?}");

        let plan = diagnose(&set, &recorded, true).unwrap();
        assert_eq!(plan.pending.len(), 1);
    }

    #[test]
    fn test_missing_files_are_reported_not_fatal() {
        let gone = file("V1__gone.sql", "SELECT 1;");
        let recorded = history(&[&gone]);
        let set = set(vec![file("V2__b.sql", "SELECT 2;")]);

        let plan = diagnose(&set, &recorded, false).unwrap();
        assert_eq!(plan.missing, vec![Version::parse("1").unwrap()]);
        assert_eq!(plan.pending.len(), 1);
    }

    #[test]
    fn test_status_rows_cover_every_state() {
        let applied = file("V1__a.sql", "SELECT 1;");
        let drifted = file("V2__b.sql", "SELECT 2;");
        let gone = file("V3__gone.sql", "SELECT 3;");
        let recorded = history(&[&applied, &drifted, &gone]);
        let set = set(vec![
            applied.clone(),
            file("V2__b.sql", "SELECT 'edited';"),
            file("V4__d.sql", "SELECT 4;"),
        ]);

        let states: Vec<(String, MigrationState)> = status_rows(&set, &recorded)
            .into_iter()
            .map(|row| (row.version.to_string(), row.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("1".to_string(), MigrationState::Applied),
                ("2".to_string(), MigrationState::Drifted),
                ("3".to_string(), MigrationState::Missing),
                ("4".to_string(), MigrationState::Pending),
            ]
        );
    }
}
