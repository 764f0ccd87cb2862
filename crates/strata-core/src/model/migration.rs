use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::Version;
use crate::error::{Error, Result};

/// Prefix every migration file name starts with.
pub const VERSION_PREFIX: &str = "V";

/// Separates the version from the description.
pub const DESCRIPTION_DELIMITER: &str = "__";

/// Suffix of every migration file name.
pub const SQL_SUFFIX: &str = ".sql";

/// Version and description parsed from a file name such as
/// `V2__add_users.sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationName {
    pub version: Version,
    pub description: String,
}

impl MigrationName {
    /// Parse a migration file name (not a full path).
    ///
    /// `path` is only used for error reporting.
    pub fn parse(file_name: &str, path: &Path) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedName {
            path: path.to_path_buf(),
            reason,
        };

        let stem = file_name
            .strip_suffix(SQL_SUFFIX)
            .ok_or_else(|| malformed(format!("expected the {SQL_SUFFIX} suffix")))?;
        let rest = stem
            .strip_prefix(VERSION_PREFIX)
            .ok_or_else(|| malformed(format!("expected the {VERSION_PREFIX} version prefix")))?;
        let (version, description) = rest.split_once(DESCRIPTION_DELIMITER).ok_or_else(|| {
            malformed(format!(
                "expected {VERSION_PREFIX}<version>{DESCRIPTION_DELIMITER}<description>{SQL_SUFFIX}"
            ))
        })?;

        let version = Version::parse(version).map_err(|e| malformed(e.to_string()))?;

        if description.trim_matches('_').is_empty() {
            return Err(malformed("description is empty".to_string()));
        }

        Ok(Self {
            version,
            description: description.replace('_', " "),
        })
    }

    /// Whether a file name looks like it was meant to be a migration.
    ///
    /// Used to reject near misses such as `V3__x.sq` instead of ignoring
    /// them.
    pub fn looks_like_migration(file_name: &str) -> bool {
        if file_name.ends_with(SQL_SUFFIX) {
            return true;
        }
        file_name
            .strip_prefix(VERSION_PREFIX)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_digit())
    }
}

/// One versioned SQL change set read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    version: Version,
    description: String,
    file_name: String,
    path: PathBuf,
    body: String,
    checksum: String,
}

impl MigrationFile {
    pub fn new(name: MigrationName, file_name: String, path: PathBuf, body: String) -> Self {
        let checksum = checksum(&body);
        Self {
            version: name.version,
            description: name.description,
            file_name,
            path,
            body,
            checksum,
        }
    }

    /// Read and parse a migration from `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::MalformedName {
                path: path.to_path_buf(),
                reason: "file name is not valid UTF-8".to_string(),
            })?
            .to_string();
        let name = MigrationName::parse(&file_name, path)?;
        let body = std::fs::read_to_string(path)?;
        Ok(Self::new(name, file_name, path.to_path_buf(), body))
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// Lowercase hex SHA-256 of a migration body.
pub fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}
