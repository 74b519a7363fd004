//! Indexing of one directory tree into a new [`IndexRun`] snapshot.
//!
//! The tree is surveyed first, then walked on the calling thread while a fixed
//! pool of workers hashes files and writes locations. The run is inserted with
//! `failure_occurred` set and only cleared once the walk completed cleanly.

pub mod locks;
mod pipeline;
pub mod prior;
pub mod throttle;

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::archive::{ArchiveExpander, NoArchives};
use crate::catalog::{Catalog, IndexRun};
use crate::config::AppConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::media::{MediaInspector, NoMedia};
use crate::platform;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::scanner::{ExcludeFilter, IncludeFilter, Scanner};

use pipeline::Pipeline;
use prior::PriorLayer;

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Directories relative to the root to restrict the walk to.
    pub include_paths: Vec<String>,
    /// Directory whose newest run serves as the prior layer instead of the root's.
    pub last_index_dir: Option<PathBuf>,
    pub medium_description: Option<String>,
    pub medium_serial: Option<String>,
    pub readonly_medium: bool,
}

#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub index_run: Arc<IndexRun>,
    pub indexed_files: u64,
    pub indexed_bytes: u64,
    pub failures: Vec<String>,
    pub fast_mode_hits: u64,
    pub hardlinks: u64,
    /// Exclude entries that never matched anything.
    pub unmatched_excludes: Vec<String>,
    pub elapsed: Duration,
}

pub struct Indexer<'a> {
    catalog: &'a Catalog,
    config: &'a AppConfig,
    archives: &'a dyn ArchiveExpander,
    media: &'a dyn MediaInspector,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Indexer<'a> {
    pub fn new(catalog: &'a Catalog, config: &'a AppConfig) -> Self {
        Self {
            catalog,
            config,
            archives: &NoArchives,
            media: &NoMedia,
            reporter: &SilentReporter,
        }
    }

    pub fn with_archives(mut self, archives: &'a dyn ArchiveExpander) -> Self {
        self.archives = archives;
        self
    }

    pub fn with_media(mut self, media: &'a dyn MediaInspector) -> Self {
        self.media = media;
        self
    }

    pub fn with_reporter(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Indexes `root` as a new run. On cancellation the partial run is
    /// committed (still marked failed) and `Error::Cancelled` is returned.
    pub fn index(&self, root: &Path, options: &IndexOptions, ctx: &RunContext) -> Result<IndexOutcome> {
        let started = Instant::now();
        if !root.is_dir() {
            return Err(Error::Precondition(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        ctx.stats.reset();

        let case_sensitive = platform::detect_case_sensitive(root);
        let exclude = ExcludeFilter::new(
            &self.config.excluded_files,
            &self.config.excluded_paths,
            case_sensitive,
        );
        let include = IncludeFilter::new(&options.include_paths, case_sensitive);
        let scanner = Scanner::new(root, &exclude, &include, self.config);

        self.reporter.on_survey_start(&root.to_string_lossy());
        let survey = scanner.survey(&ctx.cancel)?;
        ctx.stats.total_files.store(survey.files, Ordering::Relaxed);
        ctx.stats.total_bytes.store(survey.bytes, Ordering::Relaxed);
        self.reporter.on_survey_complete(survey.files, survey.bytes);

        let prior_dir = options.last_index_dir.as_deref().unwrap_or(root);
        let prior = PriorLayer::load(self.catalog, prior_dir, case_sensitive)?;

        let run = self.create_run(root, options, case_sensitive)?;
        info!("Index run {} started for {}", run.id, run.root());
        self.reporter.on_index_start(run.id);

        let pipeline = Pipeline::new(
            self.catalog,
            self.config,
            self.archives,
            self.media,
            self.reporter,
            ctx,
            run.clone(),
            prior,
        )?;
        self.catalog.begin()?;
        pipeline.run(&scanner, self.config.worker_count());

        if let Some(fatal) = pipeline.take_fatal() {
            self.catalog.rollback()?;
            return Err(fatal);
        }

        let usable_space = platform::disk_space(root).ok().map(|(_, usable)| usable as i64);
        let cancelled = ctx.cancel.is_cancelled();
        let failure_occurred = cancelled || pipeline.failure_count() > 0;
        let run = self
            .catalog
            .finalize_index_run(run.id, failure_occurred, usable_space)?;
        self.catalog.commit()?;
        self.catalog.path_cache().clear();

        let unmatched_excludes = exclude.unmatched_entries();
        if !unmatched_excludes.is_empty() {
            info!("Exclude entries without effect: {:?}", unmatched_excludes);
        }
        if cancelled {
            warn!("Index run {} cancelled; partial results committed", run.id);
            return Err(Error::Cancelled);
        }

        let stats = ctx.stats.snapshot();
        let elapsed = started.elapsed();
        info!(
            "Index run {} finished: {} files, {} bytes, {} fast mode hits, {} failures in {:.1}s (db {:.1}s)",
            run.id,
            stats.processed_files,
            stats.processed_bytes,
            stats.fast_mode_hits,
            stats.failed_reads,
            elapsed.as_secs_f64(),
            stats.db_time.as_secs_f64()
        );
        self.reporter
            .on_index_complete(stats.processed_files, elapsed.as_secs_f64());
        Ok(IndexOutcome {
            index_run: run,
            indexed_files: stats.processed_files,
            indexed_bytes: stats.processed_bytes,
            failures: ctx.stats.failed_reads(),
            fast_mode_hits: stats.fast_mode_hits,
            hardlinks: stats.hardlinks_found,
            unmatched_excludes,
            elapsed,
        })
    }

    fn create_run(
        &self,
        root: &Path,
        options: &IndexOptions,
        case_sensitive: bool,
    ) -> Result<Arc<IndexRun>> {
        let path = platform::path_without_prefix(root);
        let root_path = self.catalog.get_or_insert_file_path(&path)?;
        let total_space = platform::disk_space(root).ok().map(|(total, _)| total as i64);
        self.catalog.insert_index_run(IndexRun {
            id: 0,
            file_path_id: root_path.id,
            path,
            path_prefix: platform::path_prefix(root),
            medium_description: options.medium_description.clone(),
            medium_serial: options.medium_serial.clone(),
            medium_case_sensitive: case_sensitive,
            run_date: Utc::now().timestamp_millis(),
            readonly_medium: options.readonly_medium,
            is_backup: false,
            include_paths: serde_json::to_string(&options.include_paths)?,
            excluded_paths: serde_json::to_string(&self.config.excluded_paths)?,
            excluded_files: serde_json::to_string(&self.config.excluded_files)?,
            only_read_first_mb: self.config.hash_only_first_mb,
            total_space,
            usable_space: None,
            failure_occurred: true,
        })
    }
}
