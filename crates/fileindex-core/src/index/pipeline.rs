use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::locks::SizeLocks;
use super::prior::{fold_case, located_file_key, PriorLayer};
use super::throttle::ReadThrottle;
use crate::archive::{split_entry_name, ArchiveEntry, ArchiveExpander, ArchiveVisitor};
use crate::catalog::{Catalog, FileContent, FileLocation, IndexRun, LocatedFile};
use crate::checksum::{Checksum, ChecksumReader};
use crate::config::AppConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::media::{MediaInspector, MAX_INSPECTED_SIZE};
use crate::platform;
use crate::progress::ProgressReporter;
use crate::scanner::walk::file_extension;
use crate::scanner::{ScannedFile, Scanner};

const QUEUE_CAPACITY: usize = 10;

struct FileJob {
    file: ScannedFile,
    path_id: i64,
    rel_dir: Arc<str>,
    is_archive: bool,
    _done: Option<WaitGroup>,
}

/// A location of this run, remembered for hardlink detection.
#[derive(Debug, Clone)]
struct SeenFile {
    path: PathBuf,
    location_id: i64,
    content_id: i64,
    reference_inode: Option<i64>,
}

/// Same-object partners of a file, found by (size, modified) and file identity.
struct Link {
    content_id: i64,
    reference_inode: Option<i64>,
    in_run: Vec<SeenFile>,
    prior: Vec<Arc<FileLocation>>,
}

pub(crate) struct Pipeline<'a> {
    pub catalog: &'a Catalog,
    pub config: &'a AppConfig,
    pub archives: &'a dyn ArchiveExpander,
    pub media: &'a dyn MediaInspector,
    pub reporter: &'a dyn ProgressReporter,
    pub ctx: &'a RunContext,
    pub run: Arc<IndexRun>,
    pub root_without_prefix: String,
    pub case_sensitive: bool,
    pub prior: PriorLayer,
    throttle: ReadThrottle,
    locks: SizeLocks,
    seen: DashMap<(u64, i64), Vec<SeenFile>, ahash::RandomState>,
    next_inode: AtomicI64,
    failures: AtomicU64,
    fatal: Mutex<Option<Error>>,
    abort: AtomicBool,
}

impl<'a> Pipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: &'a Catalog,
        config: &'a AppConfig,
        archives: &'a dyn ArchiveExpander,
        media: &'a dyn MediaInspector,
        reporter: &'a dyn ProgressReporter,
        ctx: &'a RunContext,
        run: Arc<IndexRun>,
        prior: PriorLayer,
    ) -> Result<Self> {
        Ok(Self {
            catalog,
            config,
            archives,
            media,
            reporter,
            ctx,
            root_without_prefix: run.path.clone(),
            case_sensitive: run.medium_case_sensitive,
            run,
            prior,
            throttle: ReadThrottle::new(config.effective_read_config()),
            locks: SizeLocks::new(),
            seen: DashMap::with_hasher(ahash::RandomState::new()),
            next_inode: AtomicI64::new(catalog.max_reference_inode()?),
            failures: AtomicU64::new(0),
            fatal: Mutex::new(None),
            abort: AtomicBool::new(false),
        })
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn stopped(&self) -> bool {
        self.ctx.cancel.is_cancelled() || self.abort.load(Ordering::Relaxed)
    }

    fn record_failure(&self, error: &Error) {
        error!("{}", error);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.ctx.stats.record_failure(error.to_string());
    }

    fn handle_error(&self, error: Error) {
        match error {
            Error::Cancelled => {}
            e if e.is_per_item() => self.record_failure(&e),
            e => {
                error!("Indexing aborted: {}", e);
                let mut fatal = self.fatal.lock();
                if fatal.is_none() {
                    *fatal = Some(e);
                }
                self.abort.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn take_fatal(&self) -> Option<Error> {
        self.fatal.lock().take()
    }

    /// Times a catalog call. Cancellation is checked by the callers before a
    /// file's writes start, so content and location land together.
    fn timed<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = f();
        self.ctx.stats.add_db_time(started.elapsed());
        result
    }

    // ── Walk ─────────────────────────────────────────────────────

    /// Walks the tree below `scanner.root()` feeding a fixed pool of workers.
    pub fn run(&self, scanner: &Scanner<'_>, workers: usize) {
        std::thread::scope(|scope| {
            let (tx, rx) = bounded::<FileJob>(QUEUE_CAPACITY);
            for _ in 0..workers.max(1) {
                let rx = rx.clone();
                scope.spawn(move || self.work(rx));
            }
            drop(rx);
            self.walk(scanner, &tx);
            drop(tx);
        });
    }

    fn work(&self, rx: Receiver<FileJob>) {
        for job in rx.iter() {
            if self.stopped() {
                continue;
            }
            let size = job.file.size;
            self.ctx.stats.set_current_file(Some(job.file.path.clone()));
            let result = if job.is_archive {
                self.process_archive(&job)
            } else {
                self.process_file(&job)
            };
            match result {
                Ok(()) => self.ctx.stats.add_processed(size),
                Err(e) => self.handle_error(e),
            }
        }
    }

    fn walk(&self, scanner: &Scanner<'_>, tx: &Sender<FileJob>) {
        let mut pending = vec![scanner.root().to_path_buf()];
        while let Some(dir) = pending.pop() {
            if self.stopped() {
                break;
            }
            let mut listing = match scanner.list(&dir) {
                Ok(listing) => listing,
                Err(e) => {
                    self.handle_error(e);
                    continue;
                }
            };
            for failure in std::mem::take(&mut listing.failures) {
                self.handle_error(failure);
            }
            let path_id = match self.timed(|| self.catalog.get_or_insert_file_path(&listing.rel_dir)) {
                Ok(path) => path.id,
                Err(e) => {
                    self.handle_error(e);
                    break;
                }
            };
            debug!(
                "Indexing {} ({} files, {} archives)",
                dir.display(),
                listing.files.len(),
                listing.archives.len()
            );
            self.reporter.on_directory(&dir.to_string_lossy());
            let rel_dir: Arc<str> = Arc::from(listing.rel_dir.as_str());

            if !listing.archives.is_empty() {
                let done = WaitGroup::new();
                for file in listing.archives {
                    let job = FileJob {
                        file,
                        path_id,
                        rel_dir: rel_dir.clone(),
                        is_archive: true,
                        _done: Some(done.clone()),
                    };
                    if tx.send(job).is_err() {
                        return;
                    }
                }
                // archives drain before regular files of the same directory
                done.wait();
            }
            for file in listing.files {
                if self.stopped() {
                    break;
                }
                let job = FileJob {
                    file,
                    path_id,
                    rel_dir: rel_dir.clone(),
                    is_archive: false,
                    _done: None,
                };
                if tx.send(job).is_err() {
                    return;
                }
            }
            pending.extend(listing.subdirs.into_iter().rev());
        }
    }

    // ── Per File ─────────────────────────────────────────────────

    fn file_key(&self, rel_dir: &str, filename: &str) -> String {
        fold_case(
            format!(
                "{}{}{}",
                self.root_without_prefix,
                rel_dir.trim_start_matches('/'),
                filename
            ),
            self.case_sensitive,
        )
    }

    fn process_file(&self, job: &FileJob) -> Result<()> {
        self.ctx.check_cancelled()?;
        let file = &job.file;
        if file.size == 0 {
            self.insert_location(file, job.path_id, None, None, false)?;
            return Ok(());
        }

        {
            let _guard = self.locks.lock(file.size);
            if let Some(link) = self.find_link(job)? {
                return self.apply_link(job, link);
            }
        }

        let (reused, checksum, captured) = self.read_content(job)?;

        let _guard = self.locks.lock(file.size);
        // A hardlink partner may have been registered while reading.
        if let Some(link) = self.find_link(job)? {
            return self.apply_link(job, link);
        }
        self.ctx.check_cancelled()?;
        let content = match (reused, checksum) {
            (Some(content), _) => content,
            (None, Some(checksum)) => self.content_for(file, &checksum, captured.as_deref())?,
            (None, None) => {
                return Err(Error::Other(format!(
                    "no content computed for {}",
                    file.path.display()
                )))
            }
        };
        let location = self.insert_location(file, job.path_id, Some(content.id), None, false)?;
        self.seen
            .entry((file.size, file.modified))
            .or_default()
            .push(SeenFile {
                path: file.path.clone(),
                location_id: location.id,
                content_id: content.id,
                reference_inode: None,
            });
        Ok(())
    }

    /// Fast-mode candidate from the prior layer: same path, size, modified time
    /// and hashing mode.
    fn fast_mode_candidate(&self, job: &FileJob) -> Option<Arc<FileContent>> {
        let file = &job.file;
        if !self.config.fast_mode || self.config.always_check_hash(&file.filename) {
            return None;
        }
        let key = self.file_key(&job.rel_dir, &file.filename);
        let candidate = self.prior.same_file(
            file.size as i64,
            file.modified,
            &key,
            self.case_sensitive,
        )?;
        if candidate.run.only_read_first_mb != self.config.hash_only_first_mb {
            return None;
        }
        candidate.content.clone()
    }

    /// Either reuses a prior content after a leading-chunk comparison or
    /// computes the full checksum. Returns captured bytes for media inspection.
    fn read_content(
        &self,
        job: &FileJob,
    ) -> Result<(Option<Arc<FileContent>>, Option<Checksum>, Option<Vec<u8>>)> {
        let file = &job.file;
        let candidate = self.fast_mode_candidate(job);
        if let (Some(content), true) = (&candidate, self.config.ignore_hash_in_fast_mode) {
            self.ctx.stats.fast_mode_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Fast mode reuse without reading {}", file.path.display());
            return Ok((Some(content.clone()), None, None));
        }

        let capture = self.media.enabled()
            && file.size <= MAX_INSPECTED_SIZE
            && file
                .extension
                .as_deref()
                .map_or(false, |ext| self.config.is_image(ext));
        let mut captured = Vec::new();

        let _permit = self.throttle.acquire(file.size);
        let handle = File::open(&file.path).map_err(|e| Error::read(&file.path, e))?;
        let mut reader = ChecksumReader::new(handle, &file.path, file.size, self.config.hash_only_first_mb)
            .with_cancel(self.ctx.cancel.clone());
        if capture {
            reader = reader.capture_into(&mut captured, MAX_INSPECTED_SIZE as usize);
        }

        if let Some(content) = candidate {
            let leading = reader.leading_chunks()?;
            if leading == content.begin_chunks() {
                self.ctx.stats.fast_mode_hits.fetch_add(1, Ordering::Relaxed);
                debug!("Fast mode hit {}", file.path.display());
                return Ok((Some(content), None, None));
            }
            self.ctx.stats.fast_mode_misses.fetch_add(1, Ordering::Relaxed);
            debug!("Fast mode miss {}", file.path.display());
        }

        let checksum = reader.finish()?;
        let captured = (capture && !captured.is_empty()).then_some(captured);
        Ok((None, Some(checksum), captured))
    }

    /// Existing content with equal (size, hash), or a new one. Caller holds the size lock.
    fn content_for(
        &self,
        file: &ScannedFile,
        checksum: &Checksum,
        captured: Option<&[u8]>,
    ) -> Result<Arc<FileContent>> {
        let size = file.size as i64;
        if let Some(content) = self.timed(|| self.catalog.find_content(size, &checksum.hash))? {
            return Ok(content);
        }
        let content = self.timed(|| self.catalog.insert_content(size, checksum))?;
        if let Some(data) = captured {
            self.inspect_media(&file.path, data, content.id)?;
        }
        Ok(content)
    }

    fn inspect_media(&self, path: &Path, data: &[u8], content_id: i64) -> Result<()> {
        match self.media.inspect(path, data) {
            Ok(Some(info)) => {
                self.timed(|| {
                    self.catalog
                        .insert_meta(content_id, info.width, info.height, info.original_date)
                })?;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read media metadata of {}: {}", path.display(), e),
        }
        Ok(())
    }

    fn insert_location(
        &self,
        file: &ScannedFile,
        path_id: i64,
        content_id: Option<i64>,
        reference_inode: Option<i64>,
        in_archive: bool,
    ) -> Result<Arc<FileLocation>> {
        let location = FileLocation {
            id: 0,
            index_run_id: self.run.id,
            file_content_id: content_id,
            file_path_id: path_id,
            filename: file.filename.clone(),
            extension: file.extension.clone(),
            reference_inode,
            created: file.created,
            modified: file.modified,
            hidden: file.hidden,
            in_archive,
        };
        self.timed(|| self.catalog.insert_location(location))
    }

    // ── Hardlinks ────────────────────────────────────────────────

    /// Caller holds the size lock of the job's file. Prior files at the same
    /// path are earlier versions of this file, not partners.
    fn find_link(&self, job: &FileJob) -> Result<Option<Link>> {
        let file = &job.file;
        let in_run: Vec<SeenFile> = self
            .seen
            .get(&(file.size, file.modified))
            .map(|entry| entry.clone())
            .unwrap_or_default();
        let prior: &[LocatedFile] = self.prior.candidates(file.size as i64, file.modified);
        if in_run.is_empty() && prior.is_empty() {
            return Ok(None);
        }

        let identity = platform::file_identity(&file.path).map_err(|e| Error::read(&file.path, e))?;
        let same = |path: &Path| {
            path != file.path && platform::file_identity(path).map_or(false, |id| id == identity)
        };

        let in_run: Vec<SeenFile> = in_run.into_iter().filter(|s| same(&s.path)).collect();
        let own_key = self.file_key(&job.rel_dir, &file.filename);
        let prior: Vec<&LocatedFile> = prior
            .iter()
            .filter(|p| {
                p.content.is_some()
                    && located_file_key(p, self.case_sensitive) != own_key
                    && same(&p.file_path())
            })
            .collect();
        if in_run.is_empty() && prior.is_empty() {
            return Ok(None);
        }

        let mut content_ids = in_run
            .iter()
            .map(|s| s.content_id)
            .chain(prior.iter().filter_map(|p| p.content.as_ref().map(|c| c.id)));
        let content_id = match content_ids.next() {
            Some(id) => id,
            None => return Ok(None),
        };
        if let Some(other) = content_ids.find(|id| *id != content_id) {
            return Err(Error::HardlinkMismatch {
                path: file.path.clone(),
                expected: Some(content_id),
                found: Some(other),
            });
        }

        let reference_inode = in_run
            .iter()
            .filter_map(|s| s.reference_inode)
            .chain(prior.iter().filter_map(|p| p.location.reference_inode))
            .min();
        Ok(Some(Link {
            content_id,
            reference_inode,
            in_run,
            prior: prior.into_iter().map(|p| p.location.clone()).collect(),
        }))
    }

    /// Caller holds the size lock of the job's file.
    fn apply_link(&self, job: &FileJob, link: Link) -> Result<()> {
        self.ctx.check_cancelled()?;
        let file = &job.file;
        let update_prior = self.config.update_hardlinks_in_last_index;
        let reference_inode = match link.reference_inode {
            Some(id) => Some(id),
            None if !link.in_run.is_empty() || update_prior => {
                Some(self.next_inode.fetch_add(1, Ordering::SeqCst) + 1)
            }
            None => None,
        };

        if let Some(inode) = reference_inode {
            for partner in &link.in_run {
                if partner.reference_inode != Some(inode) {
                    self.timed(|| self.catalog.set_reference_inode(partner.location_id, inode))?;
                }
            }
            if let Some(mut seen) = self.seen.get_mut(&(file.size, file.modified)) {
                for entry in seen.iter_mut() {
                    if link.in_run.iter().any(|p| p.location_id == entry.location_id) {
                        entry.reference_inode = Some(inode);
                    }
                }
            }
            if update_prior {
                for partner in &link.prior {
                    if partner.reference_inode != Some(inode) {
                        self.timed(|| self.catalog.set_reference_inode(partner.id, inode))?;
                    }
                }
            }
        }

        let location =
            self.insert_location(file, job.path_id, Some(link.content_id), reference_inode, false)?;
        self.seen
            .entry((file.size, file.modified))
            .or_default()
            .push(SeenFile {
                path: file.path.clone(),
                location_id: location.id,
                content_id: link.content_id,
                reference_inode,
            });
        self.ctx.stats.hardlinks_found.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Hardlink {} shares content {} (reference inode {:?})",
            file.path.display(),
            link.content_id,
            reference_inode
        );
        Ok(())
    }

    // ── Archives ─────────────────────────────────────────────────

    fn process_archive(&self, job: &FileJob) -> Result<()> {
        self.process_file(job)?;
        let extension = job.file.extension.as_deref().unwrap_or("");
        if !self.config.expand_archives || !self.archives.can_expand(extension) {
            return Ok(());
        }
        info!("Expanding archive {}", job.file.path.display());
        let mut visitor = EntryIndexer {
            pipeline: self,
            archive: &job.file,
            rel_dir: &job.rel_dir,
        };
        self.archives
            .expand(&job.file.path, &mut visitor)
            .map_err(|e| match e {
                Error::Io(source) | Error::Read { source, .. } => Error::Archive {
                    path: job.file.path.clone(),
                    message: source.to_string(),
                },
                other => other,
            })
    }

    fn process_entry(
        &self,
        archive: &ScannedFile,
        rel_dir: &str,
        entry: ArchiveEntry<'_>,
    ) -> Result<()> {
        self.ctx.check_cancelled()?;
        let (entry_dir, filename) = split_entry_name(&entry.name);
        if filename.is_empty() {
            return Ok(());
        }
        let virtual_dir = format!("{}{}/{}", rel_dir, archive.filename, entry_dir);
        let path = self.timed(|| self.catalog.get_or_insert_file_path(&virtual_dir))?;
        let entry_path = archive.path.join(&entry.name);
        let file = ScannedFile {
            path: entry_path.clone(),
            extension: file_extension(&filename),
            filename,
            size: entry.size,
            created: entry.modified,
            modified: entry.modified,
            hidden: false,
        };
        if entry.size == 0 {
            self.insert_location(&file, path.id, None, None, true)?;
            return Ok(());
        }
        let reader: &mut dyn Read = entry.reader;
        let checksum = ChecksumReader::new(reader, &entry_path, entry.size, self.config.hash_only_first_mb)
            .with_cancel(self.ctx.cancel.clone())
            .finish()?;
        let _guard = self.locks.lock(entry.size);
        self.ctx.check_cancelled()?;
        let content = self.content_for(&file, &checksum, None)?;
        self.insert_location(&file, path.id, Some(content.id), None, true)?;
        Ok(())
    }
}

struct EntryIndexer<'p, 'a> {
    pipeline: &'p Pipeline<'a>,
    archive: &'p ScannedFile,
    rel_dir: &'p str,
}

impl ArchiveVisitor for EntryIndexer<'_, '_> {
    fn entry(&mut self, entry: ArchiveEntry<'_>) -> Result<()> {
        match self.pipeline.process_entry(self.archive, self.rel_dir, entry) {
            Err(e) if e.is_per_item() => {
                self.pipeline.record_failure(&e);
                Ok(())
            }
            other => other,
        }
    }

    fn entry_failed(&mut self, name: &str, error: Error) {
        self.pipeline.record_failure(&Error::Archive {
            path: self.archive.path.join(name),
            message: error.to_string(),
        });
    }
}
