use anyhow::Result;
use strata_apply::Config;
use strata_core::schema::RunLock;

use super::Outcome;

/// Clear the run lock. Only safe when no run is in progress.
pub fn run_unlock(config: &Config) -> Result<Outcome> {
    let conn = config.database()?.connect()?;

    match RunLock::current(&conn)? {
        Some(lock) => {
            log::warn!(
                "Removing run lock held by {} since {}",
                lock.holder,
                lock.acquired_at.to_rfc3339()
            );
            RunLock::force_release(&conn)?;
            println!("✓ Released run lock held by {}", lock.holder);
        }
        None => println!("No run lock is held"),
    }

    Ok(Outcome::Done)
}
