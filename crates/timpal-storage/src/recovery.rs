//! Startup crash recovery.
//!
//! The node runs the integrity check before touching the ledger. A failed
//! check triggers restoration from the most recent snapshot that itself
//! passes the check; with no usable snapshot the node refuses to start.

use timpal_core::error::TimpalError;
use tracing::{error, info, warn};

use crate::ChainStore;

/// Outcome of [`CrashRecovery::check_and_recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Store was healthy; nothing done.
    Clean,
    /// Store was damaged and restored from the named snapshot.
    Restored(String),
}

pub struct CrashRecovery<'a> {
    store: &'a ChainStore,
}

impl<'a> CrashRecovery<'a> {
    pub fn new(store: &'a ChainStore) -> Self {
        Self { store }
    }

    /// Run the integrity check; on failure, walk snapshots newest-first
    /// until one restores to a healthy state.
    pub fn check_and_recover(&self) -> Result<RecoveryOutcome, TimpalError> {
        let report = self.store.verify_integrity();
        if report.healthy {
            return Ok(RecoveryOutcome::Clean);
        }
        warn!(issues = ?report.issues_found, "storage integrity check failed, attempting recovery");

        for name in self.store.list_snapshots()? {
            self.store.restore_snapshot(&name)?;
            let after = self.store.verify_integrity();
            if after.healthy {
                info!(snapshot = %name, "recovered from snapshot");
                return Ok(RecoveryOutcome::Restored(name));
            }
            warn!(snapshot = %name, issues = ?after.issues_found, "snapshot did not restore a healthy state");
        }

        error!("no usable snapshot, refusing to start");
        Err(TimpalError::IntegrityFailure(report.issues_found.join("; ")))
    }
}
