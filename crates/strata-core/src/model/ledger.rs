use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MigrationFile, Version};

/// Outcome stored with a ledger row.
///
/// Failed attempts are never written, so the only recorded outcome is
/// success; a failed migration stays pending and is retried on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
}

/// One applied migration as recorded in the schema history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: Version,
    pub description: String,
    pub script: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_ms: u64,
    pub outcome: Outcome,
}

impl LedgerEntry {
    /// Build the entry for a migration that just executed successfully.
    pub fn for_migration(file: &MigrationFile, applied_at: DateTime<Utc>, execution_ms: u64) -> Self {
        Self {
            version: file.version().clone(),
            description: file.description().to_string(),
            script: file.file_name().to_string(),
            checksum: file.checksum().to_string(),
            applied_at,
            execution_ms,
            outcome: Outcome::Success,
        }
    }
}
