//! Incremental backups into timestamped directories below a target.
//!
//! Every backup is a complete tree. Files already present in an earlier backup
//! (same hash, size and modification second) become hardlinks to that copy, so
//! only new content takes space on the target.

use ahash::AHashMap;
use chrono::{Local, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::transfer::{self, target_file};
use super::{changed_percent, check_change_threshold, end_transaction};
use crate::catalog::{Catalog, FileLocation, IndexRun, LocatedFile, RunPath};
use crate::config::AppConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::index::{IndexOptions, Indexer};
use crate::matching::{left, right, without_empty_files, MatchMode, Matcher};
use crate::platform;
use crate::progress::{ProgressReporter, SilentReporter};

/// Name of the directory created for each backup.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S_%3f";

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Index the source before backing it up.
    pub index_source: bool,
    /// Proceed even when the change threshold is exceeded.
    pub force: bool,
    /// Plan only. Neither files nor the catalog are touched.
    pub dry_run: bool,
    pub medium_description: Option<String>,
}

/// Source files classified against the newest complete backup.
#[derive(Debug, Clone, Default)]
pub struct ChangeSummary {
    pub unchanged: Vec<LocatedFile>,
    pub new: Vec<LocatedFile>,
    pub changed: Vec<LocatedFile>,
    pub renamed: Vec<LocatedFile>,
    pub moved: Vec<LocatedFile>,
    pub renamed_and_moved: Vec<LocatedFile>,
    /// Files of the previous backup without a counterpart in the source.
    pub deleted: Vec<LocatedFile>,
}

impl ChangeSummary {
    /// Classifies `current` against `previous`. Each stage removes its matches
    /// (by directory and filename) from both sides before the next one runs.
    pub fn compute(current: &[LocatedFile], previous: &[LocatedFile]) -> Result<Self> {
        use MatchMode::*;
        let location = Matcher::new(RelPath2 | Filename);
        let mut current = current.to_vec();
        let mut previous = previous.to_vec();
        let mut summary = ChangeSummary::default();

        let stage = |matcher: Matcher,
                     multimap: bool,
                     current: &mut Vec<LocatedFile>,
                     previous: &mut Vec<LocatedFile>|
         -> Result<Vec<LocatedFile>> {
            let pairs = matcher.intersect(current, previous, multimap)?;
            let matched = location.unique(&left(&pairs), false)?;
            *current = location.subtract(current, &left(&pairs), true)?;
            *previous = location.subtract(previous, &right(&pairs), true)?;
            Ok(matched)
        };

        summary.unchanged = stage(
            Matcher::new(RelPath2 | Filename | FileSize | Hash),
            false,
            &mut current,
            &mut previous,
        )?;
        summary.changed = stage(Matcher::new(RelPath2 | Filename), false, &mut current, &mut previous)?;
        summary.renamed = stage(
            Matcher::new(RelPath2 | FileSize | Hash),
            true,
            &mut current,
            &mut previous,
        )?;
        summary.moved = stage(
            Matcher::new(Filename | FileSize | Hash),
            true,
            &mut current,
            &mut previous,
        )?;
        summary.renamed_and_moved =
            stage(Matcher::new(FileSize | Hash), true, &mut current, &mut previous)?;
        summary.new = current;
        summary.deleted = previous;
        Ok(summary)
    }

    /// Files that count against the change threshold.
    pub fn changed_count(&self) -> usize {
        self.changed.len()
            + self.renamed.len()
            + self.moved.len()
            + self.renamed_and_moved.len()
            + self.deleted.len()
    }

    /// Source files plus deleted ones.
    pub fn total(&self) -> usize {
        self.unchanged.len()
            + self.new.len()
            + self.changed.len()
            + self.renamed.len()
            + self.moved.len()
            + self.renamed_and_moved.len()
            + self.deleted.len()
    }

    pub fn changed_percent(&self) -> usize {
        changed_percent(self.changed_count(), self.total())
    }
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    /// None for a dry run.
    pub index_run: Option<Arc<IndexRun>>,
    pub backup_dir: PathBuf,
    pub summary: ChangeSummary,
    pub copied_files: usize,
    pub linked_files: usize,
    pub copied_bytes: u64,
    /// Bytes of content not yet present in any backup.
    pub needed_bytes: u64,
    pub failures: Vec<String>,
}

enum Step {
    Link {
        source: LocatedFile,
        existing: LocatedFile,
    },
    Copy {
        source: LocatedFile,
    },
}

impl Step {
    fn source(&self) -> &LocatedFile {
        match self {
            Step::Link { source, .. } | Step::Copy { source } => source,
        }
    }
}

struct FirstCopy {
    path: PathBuf,
    location_id: i64,
    inode: Option<i64>,
}

#[derive(Default)]
struct Tally {
    copied: usize,
    linked: usize,
    bytes: u64,
    failures: usize,
}

pub struct Backup<'a> {
    catalog: &'a Catalog,
    config: &'a AppConfig,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Backup<'a> {
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

    fn content_matcher() -> Matcher {
        Matcher::new(MatchMode::Hash | MatchMode::FileSize | MatchMode::ModifiedSec)
    }

    pub fn run(
        &self,
        source: &Path,
        target: &Path,
        options: &BackupOptions,
        ctx: &RunContext,
    ) -> Result<BackupOutcome> {
        let source = platform::absolute(source);
        if !source.is_dir() {
            return Err(Error::Precondition(format!(
                "{} is not a directory",
                source.display()
            )));
        }
        if !options.dry_run {
            fs::create_dir_all(target)?;
        }
        let target = platform::absolute(target);
        if !options.dry_run {
            transfer::check_target_supports_links(&target)?;
        }

        if options.index_source {
            if options.dry_run {
                info!("Dry run: {} is not re-indexed", source.display());
            } else {
                Indexer::new(self.catalog, self.config)
                    .with_reporter(self.reporter)
                    .index(&source, &IndexOptions::default(), ctx)?;
            }
        }

        let source_run = self.catalog.newest_run_path(&source, true)?.ok_or_else(|| {
            Error::Precondition(format!("{} has no complete index run", source.display()))
        })?;
        let source_files = self.catalog.load_located_files(&source_run, false)?;

        let backups: Vec<RunPath> = self
            .catalog
            .run_paths(&target, false)?
            .into_iter()
            .filter(|rp| rp.run.is_backup)
            .collect();
        let all_existing = self.existing_files(&backups)?;
        let previous = match backups.iter().find(|rp| !rp.run.failure_occurred) {
            Some(rp) => self.catalog.load_located_files(rp, false)?,
            None => Vec::new(),
        };

        let summary = ChangeSummary::compute(&source_files, &previous)?;
        info!(
            "Backup of {}: {} unchanged, {} new, {} changed, {} renamed, {} moved, {} renamed and moved, {} deleted",
            source.display(),
            summary.unchanged.len(),
            summary.new.len(),
            summary.changed.len(),
            summary.renamed.len(),
            summary.moved.len(),
            summary.renamed_and_moved.len(),
            summary.deleted.len()
        );
        check_change_threshold(
            self.config,
            summary.changed_count(),
            summary.total(),
            options.force,
        )?;

        let content = Self::content_matcher();
        let existing_unique = content.unique(&all_existing, false)?;
        let needed_bytes: u64 = content
            .subtract(&content.unique(&source_files, false)?, &existing_unique, false)?
            .iter()
            .map(|f| f.size() as u64)
            .sum();
        self.check_free_space(&target, needed_bytes)?;

        let steps = Self::plan(&content, &source_files, &existing_unique)?;
        let planned_links = steps
            .iter()
            .filter(|s| matches!(s, Step::Link { .. }))
            .count();
        debug!(
            "Backup plan: {} links to earlier backups, {} copies, {} bytes needed",
            planned_links,
            steps.len() - planned_links,
            needed_bytes
        );

        if options.dry_run {
            return Ok(BackupOutcome {
                index_run: None,
                backup_dir: target,
                summary,
                copied_files: steps.len() - planned_links,
                linked_files: planned_links,
                copied_bytes: 0,
                needed_bytes,
                failures: Vec::new(),
            });
        }

        let backup_dir = target.join(Local::now().format(TIMESTAMP_FORMAT).to_string());
        if backup_dir.exists() {
            return Err(Error::Precondition(format!(
                "{} already exists",
                backup_dir.display()
            )));
        }
        fs::create_dir(&backup_dir)?;
        let run = self.create_run(&backup_dir, &source_run.run, options)?;
        info!("Backup run {} started into {}", run.id, backup_dir.display());

        ctx.stats.reset();
        ctx.stats.total_files.store(steps.len() as u64, Ordering::Relaxed);
        ctx.stats.total_bytes.store(needed_bytes, Ordering::Relaxed);
        self.reporter.on_transfer_start(steps.len());

        let mut tally = Tally::default();
        self.catalog.begin()?;
        let result = self
            .execute(&run, &backup_dir, &steps, &content, ctx, &mut tally)
            .and_then(|()| {
                let usable = platform::disk_space(&backup_dir)
                    .ok()
                    .map(|(_, usable)| usable as i64);
                self.catalog
                    .finalize_index_run(run.id, tally.failures > 0, usable)
            });
        let run = end_transaction(self.catalog, result)?;
        self.catalog.path_cache().clear();
        self.reporter.on_transfer_complete(tally.copied, tally.linked);
        info!(
            "Backup run {} finished: {} copied ({} bytes), {} linked, {} failures",
            run.id, tally.copied, tally.bytes, tally.linked, tally.failures
        );

        Ok(BackupOutcome {
            index_run: Some(run),
            backup_dir,
            summary,
            copied_files: tally.copied,
            linked_files: tally.linked,
            copied_bytes: tally.bytes,
            needed_bytes,
            failures: ctx.stats.failed_reads(),
        })
    }

    /// Non-empty files of all backups, newest backup first on collisions.
    fn existing_files(&self, backups: &[RunPath]) -> Result<Vec<LocatedFile>> {
        use MatchMode::*;
        let matcher = Matcher::new(RelPath2 | Filename | Hash | FileSize | ModifiedMillis);
        let mut all = Vec::new();
        for run_path in backups {
            let files = without_empty_files(&self.catalog.load_located_files(run_path, false)?);
            all = matcher.union(&all, &files, true)?;
        }
        debug!("{} files in {} earlier backups", all.len(), backups.len());
        Ok(all)
    }

    fn check_free_space(&self, target: &Path, needed: u64) -> Result<()> {
        let probe = transfer::existing_ancestor(target).unwrap_or(target);
        let (total, usable) = platform::disk_space(probe)?;
        let remaining = usable as i128 - needed as i128;
        let min_percent = (total / 100) as i128 * self.config.min_disk_free_space_percent as i128;
        let min_bytes = self.config.min_disk_free_space_mb as i128 * 1024 * 1024;
        if remaining < min_percent || remaining < min_bytes {
            return Err(Error::Precondition(format!(
                "not enough space on {}: {} bytes needed, {} usable",
                probe.display(),
                needed,
                usable
            )));
        }
        Ok(())
    }

    fn plan(
        content: &Matcher,
        source_files: &[LocatedFile],
        existing_unique: &[LocatedFile],
    ) -> Result<Vec<Step>> {
        let pairs = content.intersect(source_files, existing_unique, true)?;
        let mut links: AHashMap<i64, LocatedFile> = pairs
            .into_iter()
            .map(|(source, existing)| (source.id(), existing))
            .collect();
        let mut steps: Vec<Step> = source_files
            .iter()
            .map(|source| match links.remove(&source.id()) {
                Some(existing) => Step::Link {
                    source: source.clone(),
                    existing,
                },
                None => Step::Copy {
                    source: source.clone(),
                },
            })
            .collect();
        steps.sort_by_cached_key(|s| s.source().rel_file_path());
        Ok(steps)
    }

    fn create_run(
        &self,
        backup_dir: &Path,
        source_run: &IndexRun,
        options: &BackupOptions,
    ) -> Result<Arc<IndexRun>> {
        let path = platform::path_without_prefix(backup_dir);
        let root_path = self.catalog.get_or_insert_file_path(&path)?;
        self.catalog.insert_index_run(IndexRun {
            id: 0,
            file_path_id: root_path.id,
            path,
            path_prefix: platform::path_prefix(backup_dir),
            medium_description: options.medium_description.clone(),
            medium_serial: None,
            medium_case_sensitive: platform::detect_case_sensitive(backup_dir),
            run_date: Utc::now().timestamp_millis(),
            readonly_medium: false,
            is_backup: true,
            include_paths: source_run.include_paths.clone(),
            excluded_paths: source_run.excluded_paths.clone(),
            excluded_files: source_run.excluded_files.clone(),
            only_read_first_mb: source_run.only_read_first_mb,
            total_space: platform::disk_space(backup_dir)
                .ok()
                .map(|(total, _)| total as i64),
            usable_space: None,
            failure_occurred: true,
        })
    }

    fn execute(
        &self,
        run: &IndexRun,
        backup_dir: &Path,
        steps: &[Step],
        content: &Matcher,
        ctx: &RunContext,
        tally: &mut Tally,
    ) -> Result<()> {
        let mut next_inode = self.catalog.max_reference_inode()?;
        // existing location id -> reference inode assigned during this backup
        let mut assigned: AHashMap<i64, i64> = AHashMap::new();
        let mut first_copies: AHashMap<String, FirstCopy> = AHashMap::new();

        for (i, step) in steps.iter().enumerate() {
            ctx.check_cancelled()?;
            let source = step.source();
            let path = target_file(backup_dir, source.rel_path(), source.filename());
            ctx.stats.set_current_file(Some(path.clone()));

            let outcome = match step {
                Step::Link { existing, .. } => (|| -> Result<()> {
                    transfer::hard_link(&existing.file_path(), &path)?;
                    let inode = match existing
                        .location
                        .reference_inode
                        .or_else(|| assigned.get(&existing.id()).copied())
                    {
                        Some(inode) => inode,
                        None => {
                            next_inode += 1;
                            self.catalog.set_reference_inode(existing.id(), next_inode)?;
                            assigned.insert(existing.id(), next_inode);
                            next_inode
                        }
                    };
                    self.catalog.insert_location(FileLocation {
                        id: 0,
                        index_run_id: run.id,
                        file_content_id: existing.location.file_content_id,
                        file_path_id: source.location.file_path_id,
                        filename: source.filename().to_string(),
                        extension: source.location.extension.clone(),
                        reference_inode: Some(inode),
                        created: existing.location.created,
                        modified: existing.location.modified,
                        hidden: existing.location.hidden,
                        in_archive: false,
                    })?;
                    tally.linked += 1;
                    ctx.stats.add_processed(0);
                    Ok(())
                })(),
                Step::Copy { .. } => (|| -> Result<()> {
                    let key = (!source.is_empty_file()).then(|| content.key(source));
                    if let Some(first) = key.as_ref().and_then(|k| first_copies.get_mut(k)) {
                        transfer::hard_link(&first.path, &path)?;
                        let inode = match first.inode {
                            Some(inode) => inode,
                            None => {
                                next_inode += 1;
                                self.catalog
                                    .set_reference_inode(first.location_id, next_inode)?;
                                first.inode = Some(next_inode);
                                next_inode
                            }
                        };
                        self.insert_copy(run, source, Some(inode))?;
                        tally.linked += 1;
                        ctx.stats.add_processed(0);
                        return Ok(());
                    }
                    let bytes = transfer::copy_file(&source.file_path(), &path, false)?;
                    let location = self.insert_copy(run, source, None)?;
                    if let Some(key) = key {
                        first_copies.insert(
                            key,
                            FirstCopy {
                                path: path.clone(),
                                location_id: location.id,
                                inode: None,
                            },
                        );
                    }
                    tally.copied += 1;
                    tally.bytes += bytes;
                    ctx.stats.add_processed(bytes);
                    Ok(())
                })(),
            };

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_per_item() => {
                    warn!("Backup of {} failed: {}", source.rel_file_path(), e);
                    ctx.stats.record_failure(e.to_string());
                    tally.failures += 1;
                }
                Err(e) => return Err(e),
            }
            self.reporter.on_transfer_progress(i + 1, steps.len());
        }
        ctx.stats.set_current_file(None);
        Ok(())
    }

    fn insert_copy(
        &self,
        run: &IndexRun,
        source: &LocatedFile,
        reference_inode: Option<i64>,
    ) -> Result<Arc<FileLocation>> {
        self.catalog.insert_location(FileLocation {
            id: 0,
            index_run_id: run.id,
            file_content_id: source.location.file_content_id,
            file_path_id: source.location.file_path_id,
            filename: source.filename().to_string(),
            extension: source.location.extension.clone(),
            reference_inode,
            created: source.location.created,
            modified: source.location.modified,
            hidden: source.location.hidden,
            in_archive: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::test_support::*;

    fn file(id: i64, rel_path: &str, name: &str, hash: &str, size: i64) -> LocatedFile {
        located(id, rel_path, name, Some((hash, size)))
    }

    fn names(files: &[LocatedFile]) -> Vec<String> {
        let mut names: Vec<String> = files.iter().map(|f| f.rel_file_path()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_change_summary_stages() {
        let previous = vec![
            file(1, "/", "same.txt", "h1", 10),
            file(2, "/", "edited.txt", "h2", 20),
            file(3, "/", "old_name.txt", "h3", 30),
            file(4, "/a/", "moved.txt", "h4", 40),
            file(5, "/a/", "both.txt", "h5", 50),
            file(6, "/", "gone.txt", "h6", 60),
        ];
        let current = vec![
            file(11, "/", "same.txt", "h1", 10),
            file(12, "/", "edited.txt", "h2x", 21),
            file(13, "/", "new_name.txt", "h3", 30),
            file(14, "/b/", "moved.txt", "h4", 40),
            file(15, "/b/", "renamed.txt", "h5", 50),
            file(16, "/", "fresh.txt", "h7", 70),
        ];
        let summary = ChangeSummary::compute(&current, &previous).unwrap();
        assert_eq!(names(&summary.unchanged), vec!["/same.txt"]);
        assert_eq!(names(&summary.changed), vec!["/edited.txt"]);
        assert_eq!(names(&summary.renamed), vec!["/new_name.txt"]);
        assert_eq!(names(&summary.moved), vec!["/b/moved.txt"]);
        assert_eq!(names(&summary.renamed_and_moved), vec!["/b/renamed.txt"]);
        assert_eq!(names(&summary.new), vec!["/fresh.txt"]);
        assert_eq!(names(&summary.deleted), vec!["/gone.txt"]);
        assert_eq!(summary.changed_count(), 5);
        assert_eq!(summary.total(), 7);
        assert_eq!(summary.changed_percent(), 71);
    }

    #[test]
    fn test_first_backup_is_all_new() {
        let current = vec![file(1, "/", "a", "h1", 1), file(2, "/", "b", "h2", 2)];
        let summary = ChangeSummary::compute(&current, &[]).unwrap();
        assert_eq!(summary.new.len(), 2);
        assert_eq!(summary.changed_count(), 0);
        assert_eq!(summary.changed_percent(), 0);
    }

    #[test]
    fn test_plan_links_known_content() {
        let content = Backup::content_matcher();
        let existing = vec![file(1, "/", "a", "h1", 10)];
        let source = vec![file(12, "/", "b", "h2", 20), file(11, "/", "a", "h1", 10)];
        let steps = Backup::plan(&content, &source, &existing).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(&steps[0], Step::Link { source, existing } if source.id() == 11 && existing.id() == 1));
        assert!(matches!(&steps[1], Step::Copy { source } if source.id() == 12));
    }
}
