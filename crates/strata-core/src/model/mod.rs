//! Migration domain model.

pub mod ledger;
pub mod migration;
pub mod version;

pub use ledger::{LedgerEntry, Outcome};
pub use migration::{checksum, MigrationFile, MigrationName};
pub use version::Version;
