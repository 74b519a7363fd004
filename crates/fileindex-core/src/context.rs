use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Cooperative cancellation flag shared by every worker of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Live counters of an indexing run, polled by observers.
#[derive(Debug, Default)]
pub struct IndexStats {
    pub total_files: AtomicU64,
    pub total_bytes: AtomicU64,
    pub processed_files: AtomicU64,
    pub processed_bytes: AtomicU64,
    pub fast_mode_hits: AtomicU64,
    pub fast_mode_misses: AtomicU64,
    pub hardlinks_found: AtomicU64,
    pub db_time_micros: AtomicU64,
    current_file: Mutex<Option<PathBuf>>,
    failed_reads: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_files: u64,
    pub total_bytes: u64,
    pub processed_files: u64,
    pub processed_bytes: u64,
    pub fast_mode_hits: u64,
    pub fast_mode_misses: u64,
    pub hardlinks_found: u64,
    pub db_time: Duration,
    pub current_file: Option<PathBuf>,
    pub failed_reads: usize,
}

impl IndexStats {
    pub fn add_processed(&self, bytes: u64) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.processed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_db_time(&self, elapsed: Duration) {
        self.db_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn set_current_file(&self, path: Option<PathBuf>) {
        *self.current_file.lock() = path;
    }

    pub fn record_failure(&self, message: String) {
        self.failed_reads.lock().push(message);
    }

    pub fn failed_reads(&self) -> Vec<String> {
        self.failed_reads.lock().clone()
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_files,
            &self.total_bytes,
            &self.processed_files,
            &self.processed_bytes,
            &self.fast_mode_hits,
            &self.fast_mode_misses,
            &self.hardlinks_found,
            &self.db_time_micros,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.current_file.lock() = None;
        self.failed_reads.lock().clear();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_files: self.total_files.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            processed_files: self.processed_files.load(Ordering::Relaxed),
            processed_bytes: self.processed_bytes.load(Ordering::Relaxed),
            fast_mode_hits: self.fast_mode_hits.load(Ordering::Relaxed),
            fast_mode_misses: self.fast_mode_misses.load(Ordering::Relaxed),
            hardlinks_found: self.hardlinks_found.load(Ordering::Relaxed),
            db_time: Duration::from_micros(self.db_time_micros.load(Ordering::Relaxed)),
            current_file: self.current_file.lock().clone(),
            failed_reads: self.failed_reads.lock().len(),
        }
    }
}

/// Passed explicitly into every long running operation.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub cancel: CancelToken,
    pub stats: Arc<IndexStats>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let ctx = RunContext::new();
        let other = ctx.clone();
        assert!(ctx.check_cancelled().is_ok());
        other.cancel.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_stats_snapshot_and_reset() {
        let stats = IndexStats::default();
        stats.add_processed(100);
        stats.add_processed(50);
        stats.record_failure("broken.bin".to_string());
        let snap = stats.snapshot();
        assert_eq!(snap.processed_files, 2);
        assert_eq!(snap.processed_bytes, 150);
        assert_eq!(snap.failed_reads, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
