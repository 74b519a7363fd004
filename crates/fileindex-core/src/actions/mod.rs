//! Operations built on top of the catalog, the set algebra and indexing.

pub mod backup;
pub mod compare;
pub mod duplicates;
pub mod list;
pub mod orphans;
pub mod remove;
pub mod sync;
pub mod transfer;
pub mod verify;

pub use backup::{Backup, BackupOptions, BackupOutcome, ChangeSummary};
pub use compare::{compare_runs, RunComparison};
pub use duplicates::{find_duplicates, DuplicateGroup, DuplicateReport};
pub use list::{describe_run, list_runs, RunSummary};
pub use orphans::{files_without_copy, OrphanDirection};
pub use remove::remove_run;
pub use sync::{SyncOptions, SyncOutcome, Synchronizer};
pub use verify::{verify_dir, Difference, VerifyReport};

use tracing::warn;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::error::{Error, Result};

/// Share of changed files in percent, 0 for an empty total.
pub fn changed_percent(changed: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else {
        changed * 100 / total
    }
}

/// Refuses to continue when too many files changed, unless `force` is set.
pub(crate) fn check_change_threshold(
    config: &AppConfig,
    changed: usize,
    total: usize,
    force: bool,
) -> Result<()> {
    let percent = changed_percent(changed, total);
    if percent >= config.max_changed_files_warning_percent as usize
        && changed > config.min_allowed_changes
    {
        if force {
            warn!(
                "{}% of the files changed ({} of {}); continuing as forced",
                percent, changed, total
            );
            return Ok(());
        }
        return Err(Error::Precondition(format!(
            "{}% of the files changed ({} of {}); rerun with force to proceed",
            percent, changed, total
        )));
    }
    Ok(())
}

/// Ends a transaction begun by an action. Cancellation keeps what was written.
pub(crate) fn end_transaction<T>(catalog: &Catalog, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            catalog.commit()?;
            Ok(value)
        }
        Err(Error::Cancelled) => {
            catalog.commit()?;
            Err(Error::Cancelled)
        }
        Err(e) => {
            catalog.rollback()?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(percent: u32, min: usize) -> AppConfig {
        AppConfig {
            max_changed_files_warning_percent: percent,
            min_allowed_changes: min,
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_changed_percent() {
        assert_eq!(changed_percent(0, 0), 0);
        assert_eq!(changed_percent(1, 3), 33);
        assert_eq!(changed_percent(5, 5), 100);
    }

    #[test]
    fn test_change_threshold() {
        let config = config(5, 10);
        // few changes in absolute terms pass regardless of the share
        assert!(check_change_threshold(&config, 10, 10, false).is_ok());
        assert!(matches!(
            check_change_threshold(&config, 11, 100, false),
            Err(Error::Precondition(_))
        ));
        assert!(check_change_threshold(&config, 11, 100, true).is_ok());
        assert!(check_change_threshold(&config, 11, 1000, false).is_ok());
    }
}
