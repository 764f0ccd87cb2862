//! Build manifest shipped next to the migration files.
//!
//! The build stage that packages the migrations lists the file names it
//! validated and stamps them with a build identifier. The applier refuses to
//! run a directory whose contents differ from that list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use strata_core::{Error, Result};

use crate::discover::MigrationSet;

/// Conventional manifest file name inside a migrations directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub build_id: String,
    pub files: Vec<String>,
}

impl Manifest {
    /// Describe a discovered set.
    pub fn for_set(build_id: impl Into<String>, set: &MigrationSet) -> Self {
        Self {
            build_id: build_id.into(),
            files: set.file_names().into_iter().map(String::from).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&contents)?;
        if manifest.build_id.trim().is_empty() {
            return Err(Error::InvalidData(format!(
                "manifest {} has an empty build_id",
                path.display()
            )));
        }
        Ok(manifest)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }

    /// Check that the discovered files are exactly the listed ones.
    pub fn verify(&self, set: &MigrationSet) -> Result<()> {
        let listed: BTreeSet<&str> = self.files.iter().map(String::as_str).collect();
        let found: BTreeSet<&str> = set.file_names().into_iter().collect();

        let missing: Vec<String> = listed.difference(&found).map(|s| (*s).to_string()).collect();
        let unexpected: Vec<String> = found.difference(&listed).map(|s| (*s).to_string()).collect();

        if missing.is_empty() && unexpected.is_empty() {
            log::debug!(
                "Manifest {} matches {} discovered files",
                self.build_id,
                set.len()
            );
            return Ok(());
        }

        Err(Error::ManifestMismatch {
            build_id: self.build_id.clone(),
            missing,
            unexpected,
        })
    }
}
