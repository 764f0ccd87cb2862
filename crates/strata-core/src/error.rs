use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::Version;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed migration name {}: {reason}", path.display())]
    MalformedName { path: PathBuf, reason: String },

    #[error("duplicate version {version}: {} and {}", first.display(), second.display())]
    DuplicateVersion {
        version: Version,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("version {version} is already recorded in the schema history")]
    DuplicateLedgerEntry { version: Version },

    #[error(
        "checksum drift for version {version}: recorded {recorded}, file {} hashes to {current}",
        path.display()
    )]
    DriftDetected {
        version: Version,
        path: PathBuf,
        recorded: String,
        current: String,
    },

    #[error("pending version {version} is older than applied version {latest_applied}")]
    OutOfOrder {
        version: Version,
        latest_applied: Version,
    },

    #[error("manifest {build_id} does not match discovered files (missing: [{}], unexpected: [{}])",
        missing.join(", "), unexpected.join(", "))]
    ManifestMismatch {
        build_id: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("schema history unavailable: {reason}")]
    LedgerUnavailable {
        reason: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("migration {version} failed: {source}")]
    ExecutionFailed {
        version: Version,
        #[source]
        source: rusqlite::Error,
    },

    #[error("another run holds the migration lock (holder {holder}, since {since})")]
    ConcurrentRunDetected { holder: String, since: String },

    #[error("run budget exhausted{}", version.as_ref().map(|v| format!(" at version {v}")).unwrap_or_default())]
    Timeout { version: Option<Version> },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Coarse classification of an [`Error`], printed by the CLI on halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedName,
    DuplicateVersion,
    DriftDetected,
    OutOfOrder,
    ManifestMismatch,
    LedgerUnavailable,
    ExecutionFailed,
    ConcurrentRunDetected,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedName => "MalformedName",
            Self::DuplicateVersion => "DuplicateVersion",
            Self::DriftDetected => "DriftDetected",
            Self::OutOfOrder => "OutOfOrder",
            Self::ManifestMismatch => "ManifestMismatch",
            Self::LedgerUnavailable => "LedgerUnavailable",
            Self::ExecutionFailed => "ExecutionFailed",
            Self::ConcurrentRunDetected => "ConcurrentRunDetected",
            Self::Timeout => "Timeout",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedName { .. } => ErrorKind::MalformedName,
            Self::DuplicateVersion { .. } | Self::DuplicateLedgerEntry { .. } => {
                ErrorKind::DuplicateVersion
            }
            Self::DriftDetected { .. } => ErrorKind::DriftDetected,
            Self::OutOfOrder { .. } => ErrorKind::OutOfOrder,
            Self::ManifestMismatch { .. } => ErrorKind::ManifestMismatch,
            Self::LedgerUnavailable { .. } => ErrorKind::LedgerUnavailable,
            Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            Self::ConcurrentRunDetected { .. } => ErrorKind::ConcurrentRunDetected,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) | Self::InvalidData(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// The migration version this error is about, when there is one.
    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::DuplicateVersion { version, .. }
            | Self::DuplicateLedgerEntry { version }
            | Self::DriftDetected { version, .. }
            | Self::OutOfOrder { version, .. }
            | Self::ExecutionFailed { version, .. } => Some(version),
            Self::Timeout { version } => version.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` for the checks that run before any mutation.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::MalformedName { .. }
                | Self::DuplicateVersion { .. }
                | Self::DriftDetected { .. }
                | Self::OutOfOrder { .. }
                | Self::ManifestMismatch { .. }
        )
    }

    pub(crate) fn ledger_unavailable(reason: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::LedgerUnavailable {
            reason: reason.into(),
            source: Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
