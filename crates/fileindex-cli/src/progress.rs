use fileindex_core::{IndexStats, ProgressReporter};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICK_CHARS)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(style("{spinner:.cyan} {msg}"));
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// CLI progress reporter using indicatif progress bars.
///
/// Byte counts come from the shared [`IndexStats`]; the reporter events only
/// mark phase boundaries and trigger a refresh.
pub struct CliReporter {
    stats: Arc<IndexStats>,
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new(stats: Arc<IndexStats>) -> Self {
        Self {
            stats,
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_survey_start(&self, root: &str) {
        self.set_bar(spinner(format!("Surveying {}...", root)));
    }

    fn on_survey_complete(&self, total_files: u64, total_bytes: u64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Survey complete: {} files, {}",
            total_files,
            HumanBytes(total_bytes)
        );
    }

    fn on_index_start(&self, run_id: i64) {
        let pb = ProgressBar::new(self.stats.snapshot().total_bytes);
        pb.set_style(style(
            "  {spinner:.cyan} Indexing [{bar:30.cyan/dim}] {bytes}/{total_bytes} ({eta} remaining) {msg}",
        ));
        pb.set_message(format!("run {}", run_id));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_directory(&self, path: &str) {
        let snapshot = self.stats.snapshot();
        self.with_bar(|pb| {
            pb.set_position(snapshot.processed_bytes);
            pb.set_message(path.to_string());
        });
    }

    fn on_index_complete(&self, files: u64, duration_secs: f64) {
        self.finish_bar();
        let snapshot = self.stats.snapshot();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Index complete: {} files in {:.2}s ({} unchanged, {} hashed)",
            files, duration_secs, snapshot.fast_mode_hits, snapshot.fast_mode_misses
        );
    }

    fn on_transfer_start(&self, total_files: usize) {
        let pb = ProgressBar::new(total_files as u64);
        pb.set_style(style(
            "  {spinner:.cyan} Copying [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
        ));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_transfer_progress(&self, done: usize, total: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        });
    }

    fn on_transfer_complete(&self, copied: usize, linked: usize) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Transfer complete: {} copied, {} linked",
            copied, linked
        );
    }
}
