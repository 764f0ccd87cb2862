//! The migration run: discover, diagnose, apply.

use chrono::Utc;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::{ffi, Connection, ErrorCode};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::model::{LedgerEntry, MigrationFile, Version};
use strata_core::schema::{Database, HistoryLedger, RunLock};
use strata_core::{Error, Result};

use crate::deadline::{Deadline, Watchdog};
use crate::discover::Discoverer;
use crate::manifest::Manifest;
use crate::observe::{EventSink, LogSink, MigrationEvent};
use crate::plan::diagnose;

/// Where a run is.
///
/// `Idle → Discovering → Diagnosing → Applying(v) → Committed(v) |
/// RolledBack(v) → … → Idle | Halted`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Discovering,
    Diagnosing,
    Applying(Version),
    Committed(Version),
    RolledBack(Version),
    Halted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Discovering => f.write_str("discovering"),
            Self::Diagnosing => f.write_str("diagnosing"),
            Self::Applying(v) => write!(f, "applying({v})"),
            Self::Committed(v) => write!(f, "committed({v})"),
            Self::RolledBack(v) => write!(f, "rolled-back({v})"),
            Self::Halted => f.write_str("halted"),
        }
    }
}

/// A migration committed during this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: Version,
    pub description: String,
    pub duration: Duration,
}

/// How a run ended.
#[derive(Debug)]
pub enum Terminal {
    /// Clean run, possibly with nothing to do.
    Idle,
    /// Stopped at the first failure. Earlier commits are kept.
    Halted(Error),
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub build_id: Option<String>,
    pub applied: Vec<AppliedMigration>,
    /// Versions that were already recorded before this run.
    pub already_applied: usize,
    pub duration: Duration,
    pub terminal: Terminal,
}

impl RunReport {
    pub fn is_idle(&self) -> bool {
        matches!(self.terminal, Terminal::Idle)
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.terminal {
            Terminal::Idle => None,
            Terminal::Halted(e) => Some(e),
        }
    }
}

/// Applies pending migrations to one database, one transaction each.
#[derive(Debug)]
pub struct Applier {
    db: Database,
    discoverer: Discoverer,
    ledger: HistoryLedger,
    manifest: Option<Manifest>,
    allow_out_of_order: bool,
    budget: Option<Duration>,
    sink: Box<dyn EventSink>,
    run_id: String,
    state: RunState,
    transitions: Vec<RunState>,
}

impl Applier {
    pub fn new(db: Database, discoverer: Discoverer) -> Self {
        Self {
            db,
            discoverer,
            ledger: HistoryLedger::default(),
            manifest: None,
            allow_out_of_order: false,
            budget: None,
            sink: Box::new(LogSink),
            run_id: uuid::Uuid::new_v4().to_string(),
            state: RunState::Idle,
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: HistoryLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Require the discovered files to match a build manifest.
    #[must_use]
    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    #[must_use]
    pub fn allow_out_of_order(mut self, allow: bool) -> Self {
        self.allow_out_of_order = allow;
        self
    }

    /// Halt with `Timeout` once the run has taken longer than `budget`.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Identifier written into the run lock.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Every state entered by the last run, in order.
    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    /// Execute one run to a terminal state.
    pub fn run(&mut self) -> RunReport {
        let started = Instant::now();
        let deadline = self.budget.map(Deadline::after);
        self.transitions.clear();

        let mut report = RunReport {
            run_id: self.run_id.clone(),
            build_id: self.manifest.as_ref().map(|m| m.build_id.clone()),
            applied: Vec::new(),
            already_applied: 0,
            duration: Duration::ZERO,
            terminal: Terminal::Idle,
        };

        log::info!(
            "Starting migration run {} against {}",
            self.run_id,
            self.db.path().display()
        );

        match self.execute(deadline.as_ref(), &mut report) {
            Ok(()) => {
                self.transition(RunState::Idle);
                log::info!(
                    "Migration run {} finished: {} applied, {} already applied",
                    self.run_id,
                    report.applied.len(),
                    report.already_applied
                );
            }
            Err(e) => {
                self.transition(RunState::Halted);
                log::error!("Migration run {} halted: {}: {}", self.run_id, e.kind(), e);
                report.terminal = Terminal::Halted(e);
            }
        }

        report.duration = started.elapsed();
        report
    }

    fn execute(&mut self, deadline: Option<&Deadline>, report: &mut RunReport) -> Result<()> {
        self.transition(RunState::Discovering);
        let set = self.discoverer.discover()?;
        if let Some(manifest) = &self.manifest {
            manifest.verify(&set)?;
        }

        let conn = self.db.connect()?;
        check_deadline(deadline, None)?;

        // A run that is inside a migration keeps its lock row committed, so
        // another run is visible here before any write is attempted.
        if RunLock::current(&conn)?.is_some() {
            return Err(RunLock::held_by_other(&conn));
        }
        let history = self.ledger.load_applied(&conn)?;

        self.transition(RunState::Diagnosing);
        let plan = diagnose(&set, &history, self.allow_out_of_order)?;
        report.already_applied = plan.applied;
        if plan.pending.is_empty() {
            log::info!("Schema is up to date ({} migrations applied)", plan.applied);
            return Ok(());
        }

        let _lock = RunLock::acquire(&conn, self.run_id.as_str())?;
        check_deadline(deadline, None)?;

        // Another run may have finished between the first read and the lock.
        let history = self.ledger.load_applied(&conn)?;
        let plan = diagnose(&set, &history, self.allow_out_of_order)?;
        report.already_applied = plan.applied;
        log::info!("{} pending migrations", plan.pending.len());

        for file in plan.pending {
            let applied = self.apply_one(&conn, file, deadline)?;
            report.applied.push(applied);
        }

        Ok(())
    }

    fn apply_one(
        &mut self,
        conn: &Connection,
        file: &MigrationFile,
        deadline: Option<&Deadline>,
    ) -> Result<AppliedMigration> {
        let version = file.version().clone();
        check_deadline(deadline, Some(&version))?;

        self.transition(RunState::Applying(version.clone()));
        self.sink.emit(&MigrationEvent::started(file));
        log::info!("Applying {} ({})", version, file.file_name());

        let started = Instant::now();
        let result = self.apply_in_transaction(conn, file, deadline);
        let duration = started.elapsed();

        match result {
            Ok(()) => {
                self.transition(RunState::Committed(version.clone()));
                self.sink.emit(&MigrationEvent::succeeded(file, duration));
                log::info!("Committed {} in {:?}", version, duration);
                Ok(AppliedMigration {
                    version,
                    description: file.description().to_string(),
                    duration,
                })
            }
            Err(e) => {
                self.transition(RunState::RolledBack(version.clone()));
                self.sink.emit(&MigrationEvent::failed(file, duration, &e));
                log::error!("Rolled back {}: {}", version, e);
                Err(e)
            }
        }
    }

    fn apply_in_transaction(
        &self,
        conn: &Connection,
        file: &MigrationFile,
        deadline: Option<&Deadline>,
    ) -> Result<()> {
        let version = file.version();
        let started = Instant::now();

        // Dropping `tx` without committing rolls it back.
        let tx = conn.unchecked_transaction()?;

        let guard = TransactionControlGuard::install(conn);
        let watchdog = deadline.map(|d| Watchdog::arm(conn.get_interrupt_handle(), d.remaining()));
        let executed = tx.execute_batch(file.body());
        let timed_out = watchdog.map(Watchdog::disarm).unwrap_or(false);
        let tripped = guard.tripped();
        drop(guard);

        let failed = |source| Error::ExecutionFailed {
            version: version.clone(),
            source,
        };
        match executed {
            Err(_) if tripped => {
                return Err(failed(body_error(
                    ffi::SQLITE_AUTH,
                    "transaction control (BEGIN, COMMIT, END, ROLLBACK) is not allowed in a migration",
                )));
            }
            Err(e) if timed_out || e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) => {
                return Err(Error::Timeout {
                    version: Some(version.clone()),
                });
            }
            Err(source) => return Err(failed(source)),
            Ok(()) if timed_out => {
                return Err(Error::Timeout {
                    version: Some(version.clone()),
                });
            }
            Ok(()) => {}
        }

        // The ledger row must land in the same transaction as the body.
        if conn.is_autocommit() {
            return Err(failed(body_error(
                ffi::SQLITE_ERROR,
                "migration body ended the enclosing transaction",
            )));
        }

        let execution_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let entry = LedgerEntry::for_migration(file, Utc::now(), execution_ms);
        self.ledger.record_applied(&tx, &entry)?;

        tx.commit().map_err(|source| Error::ExecutionFailed {
            version: version.clone(),
            source,
        })
    }

    fn transition(&mut self, next: RunState) {
        log::debug!("Run {}: {} -> {}", self.run_id, self.state, next);
        self.state = next.clone();
        self.transitions.push(next);
    }
}

fn check_deadline(deadline: Option<&Deadline>, version: Option<&Version>) -> Result<()> {
    if deadline.is_some_and(Deadline::expired) {
        return Err(Error::Timeout {
            version: version.cloned(),
        });
    }
    Ok(())
}

fn body_error(code: std::os::raw::c_int, message: &str) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some(message.to_string()))
}

/// Denies `BEGIN`, `COMMIT`, `END` and `ROLLBACK` on a connection while
/// alive. Savepoints stay allowed.
///
/// The authorizer runs when a statement is prepared, so a denied statement
/// never executes.
struct TransactionControlGuard<'c> {
    conn: &'c Connection,
    tripped: Arc<AtomicBool>,
}

impl<'c> TransactionControlGuard<'c> {
    fn install(conn: &'c Connection) -> Self {
        let tripped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&tripped);
        conn.authorizer(Some(move |ctx: AuthContext<'_>| match ctx.action {
            AuthAction::Transaction { .. } => {
                flag.store(true, Ordering::SeqCst);
                Authorization::Deny
            }
            _ => Authorization::Allow,
        }));
        Self { conn, tripped }
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

impl Drop for TransactionControlGuard<'_> {
    fn drop(&mut self) {
        self.conn
            .authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
    }
}
