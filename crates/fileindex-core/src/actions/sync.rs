//! One-way mirroring of a source directory into a target directory.

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

use super::transfer::{self, target_file};
use super::check_change_threshold;
use super::verify::verify_dir;
use crate::catalog::{Catalog, IndexRun, LocatedFile};
use crate::config::AppConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::index::{IndexOptions, Indexer};
use crate::matching::{MatchMode, Matcher, PairFilter};
use crate::platform;
use crate::progress::{ProgressReporter, SilentReporter};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub index_source: bool,
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub new_files: usize,
    pub changed_files: usize,
    pub deleted_files: usize,
    pub copied_bytes: u64,
    /// Run of the re-indexed target. None for a dry run.
    pub target_run: Option<Arc<IndexRun>>,
    pub failures: Vec<String>,
}

pub struct Synchronizer<'a> {
    catalog: &'a Catalog,
    config: &'a AppConfig,
    reporter: &'a dyn ProgressReporter,
}

enum Action<'f> {
    Replace(&'f LocatedFile, &'f LocatedFile),
    Delete(&'f LocatedFile),
    Create(&'f LocatedFile),
}

impl<'a> Synchronizer<'a> {
    pub fn new(catalog: &'a Catalog, config: &'a AppConfig) -> Self {
        Self {
            catalog,
            config,
            reporter: &SilentReporter,
        }
    }

    pub fn with_reporter(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    fn indexer(&self) -> Indexer<'a> {
        Indexer::new(self.catalog, self.config).with_reporter(self.reporter)
    }

    pub fn run(
        &self,
        source: &Path,
        target: &Path,
        options: &SyncOptions,
        ctx: &RunContext,
    ) -> Result<SyncOutcome> {
        if !options.dry_run {
            fs::create_dir_all(target)?;
        }
        let source = platform::absolute(source);
        let target = platform::absolute(target);
        if !source.is_dir() {
            return Err(Error::Precondition(format!(
                "{} is not a directory",
                source.display()
            )));
        }
        if options.index_source && !options.dry_run {
            self.indexer().index(&source, &IndexOptions::default(), ctx)?;
        }
        let source_run = self.catalog.newest_run_path(&source, true)?.ok_or_else(|| {
            Error::Precondition(format!("{} has no complete index run", source.display()))
        })?;
        let source_files = self.catalog.load_located_files(&source_run, false)?;

        self.prepare_target(&target, options.dry_run, ctx)?;
        let target_files = self
            .catalog
            .load_located_files_for_dir(&target, true, false)?;

        use MatchMode::*;
        let location = Matcher::new(RelPath2 | Filename);
        let new = location.subtract(&source_files, &target_files, false)?;
        let changed = PairFilter::ModifiedSecNeq
            .or(PairFilter::FileSizeNeq)
            .or(PairFilter::HashNeq)
            .apply(&location.intersect(&source_files, &target_files, false)?);
        let deleted = location.subtract(&target_files, &source_files, false)?;

        let total = Matcher::new(Hash | FileSize | RelPath2 | Filename)
            .union(&source_files, &target_files, true)?
            .len();
        info!(
            "Sync {} -> {}: {} new, {} changed, {} deleted of {} files",
            source.display(),
            target.display(),
            new.len(),
            changed.len(),
            deleted.len(),
            total
        );
        check_change_threshold(
            self.config,
            changed.len() + deleted.len(),
            total,
            options.force,
        )?;

        let mut outcome = SyncOutcome {
            new_files: new.len(),
            changed_files: changed.len(),
            deleted_files: deleted.len(),
            ..SyncOutcome::default()
        };
        if options.dry_run {
            return Ok(outcome);
        }

        let actions: Vec<Action<'_>> = changed
            .iter()
            .map(|(s, t)| Action::Replace(s, t))
            .chain(deleted.iter().map(Action::Delete))
            .chain(new.iter().map(Action::Create))
            .collect();
        ctx.stats.reset();
        ctx.stats.total_files.store(actions.len() as u64, Ordering::Relaxed);
        self.reporter.on_transfer_start(actions.len());

        let mut failures = Vec::new();
        for (i, action) in actions.iter().enumerate() {
            ctx.check_cancelled()?;
            let result = match action {
                Action::Replace(source, target) => {
                    transfer::copy_file(&source.file_path(), &target.file_path(), true)
                }
                Action::Delete(file) => transfer::remove_file(&file.file_path()).map(|()| 0),
                Action::Create(file) => transfer::copy_file(
                    &file.file_path(),
                    &target_file(&target, file.rel_path(), file.filename()),
                    false,
                ),
            };
            match result {
                Ok(bytes) => {
                    outcome.copied_bytes += bytes;
                    ctx.stats.add_processed(bytes);
                }
                Err(e) if e.is_per_item() => {
                    warn!("Sync step failed: {}", e);
                    failures.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
            self.reporter.on_transfer_progress(i + 1, actions.len());
        }
        self.reporter.on_transfer_complete(changed.len() + new.len(), 0);

        let reindexed = self.indexer().index(&target, &IndexOptions::default(), ctx)?;
        failures.extend(reindexed.failures);
        outcome.target_run = Some(reindexed.index_run);
        outcome.failures = failures;
        info!(
            "Sync finished: {} bytes copied, {} failures",
            outcome.copied_bytes,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    /// Makes sure the catalog reflects the target before comparing against it.
    fn prepare_target(&self, target: &Path, dry_run: bool, ctx: &RunContext) -> Result<()> {
        if self.catalog.newest_run_path(target, true)?.is_none() {
            if dry_run {
                info!("Dry run: {} has no index and is treated as empty", target.display());
                return Ok(());
            }
            self.indexer().index(target, &IndexOptions::default(), ctx)?;
            return Ok(());
        }
        let report = verify_dir(self.catalog, self.config, target, true, ctx)?;
        if report.is_clean() {
            return Ok(());
        }
        if dry_run {
            warn!(
                "Dry run: {} differs from its index in {} files",
                target.display(),
                report.differences.len()
            );
            return Ok(());
        }
        info!(
            "{} changed since its last index ({} differences); re-indexing",
            target.display(),
            report.differences.len()
        );
        self.indexer().index(target, &IndexOptions::default(), ctx)?;
        Ok(())
    }
}
