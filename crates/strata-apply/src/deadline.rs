//! Run budget enforcement.

use rusqlite::InterruptHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Point in time after which a run must stop.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Interrupts the statement running on a connection once a duration elapses.
///
/// The interrupted statement fails with `SQLITE_INTERRUPT`, and the caller
/// rolls back its transaction. Disarming before the duration elapses stops
/// the watchdog without touching the connection.
#[derive(Debug)]
pub struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    fired: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn arm(interrupt: InterruptHandle, after: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let thread = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(after) {
                flag.store(true, Ordering::SeqCst);
                interrupt.interrupt();
            }
        });

        Self {
            cancel: Some(cancel),
            fired,
            thread: Some(thread),
        }
    }

    /// Stop the watchdog and report whether it fired.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the thread with `Disconnected`.
        self.cancel.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
