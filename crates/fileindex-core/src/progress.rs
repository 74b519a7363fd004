/// Phase events of indexing and the orchestrators built on it.
///
/// Fine-grained counters live in [`crate::context::IndexStats`] and are polled;
/// this trait only signals phase boundaries. All methods default to no-ops.
pub trait ProgressReporter: Send + Sync {
    fn on_survey_start(&self, _root: &str) {}
    fn on_survey_complete(&self, _total_files: u64, _total_bytes: u64) {}
    fn on_index_start(&self, _run_id: i64) {}
    fn on_directory(&self, _path: &str) {}
    fn on_index_complete(&self, _files: u64, _duration_secs: f64) {}
    fn on_transfer_start(&self, _total_files: usize) {}
    fn on_transfer_progress(&self, _done: usize, _total: usize) {}
    fn on_transfer_complete(&self, _copied: usize, _linked: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
