//! Migration run stages for strata.
//!
//! Discovers versioned SQL files, diagnoses them against the schema
//! history, and applies what is pending in order, one transaction per
//! migration, under an advisory run lock.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod applier;
pub mod config;
pub mod credentials;
pub mod deadline;
pub mod discover;
pub mod manifest;
pub mod observe;
pub mod plan;
pub mod validate;

pub use applier::{AppliedMigration, Applier, RunReport, RunState, Terminal};
pub use config::Config;
pub use credentials::ConnectionSecret;
pub use discover::{Discoverer, MigrationSet};
pub use manifest::{Manifest, MANIFEST_FILE_NAME};
pub use observe::{EventOutcome, EventSink, Fanout, JsonLinesSink, LogSink, MemorySink, MigrationEvent};
pub use plan::{diagnose, status_rows, MigrationState, Plan, StatusRow};
pub use validate::{validate, ValidationReport};
