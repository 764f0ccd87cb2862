pub mod db;
pub mod ledger;
pub mod lock;

pub use db::{table_exists, Database, DEFAULT_CONNECT_RETRIES};
pub use ledger::{HistoryLedger, DEFAULT_HISTORY_TABLE};
pub use lock::{LockHolder, RunLock, LOCK_TABLE};
