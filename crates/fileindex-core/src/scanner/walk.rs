use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info};

use super::filter::{ExcludeFilter, IncludeFilter};
use crate::catalog::normalize_dir;
use crate::config::AppConfig;
use crate::context::CancelToken;
use crate::error::{Error, Result};
use crate::platform;

/// A regular file found by the walk.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub filename: String,
    pub extension: Option<String>,
    pub size: u64,
    /// Epoch millis.
    pub created: i64,
    /// Epoch millis.
    pub modified: i64,
    pub hidden: bool,
}

/// Contents of one directory after filtering. Files are ordered largest first.
#[derive(Debug, Default)]
pub struct DirListing {
    /// Directory relative to the run root, e.g. `/sub/`.
    pub rel_dir: String,
    pub subdirs: Vec<PathBuf>,
    pub files: Vec<ScannedFile>,
    pub archives: Vec<ScannedFile>,
    /// Entries that could not be read; the rest of the directory is listed.
    pub failures: Vec<Error>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Survey {
    pub files: u64,
    pub bytes: u64,
    pub failures: Vec<String>,
}

pub fn system_time_millis(time: io::Result<SystemTime>) -> Option<i64> {
    time.ok().map(|t| DateTime::<Utc>::from(t).timestamp_millis())
}

pub fn file_extension(filename: &str) -> Option<String> {
    match filename.rfind('.') {
        Some(i) if i > 0 && i + 1 < filename.len() => Some(filename[i + 1..].to_lowercase()),
        _ => None,
    }
}

pub fn scanned_file(path: &Path, meta: &fs::Metadata) -> ScannedFile {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let modified = system_time_millis(meta.modified()).unwrap_or(0);
    ScannedFile {
        path: path.to_path_buf(),
        extension: file_extension(&filename),
        size: meta.len(),
        created: system_time_millis(meta.created()).unwrap_or(modified),
        modified,
        hidden: platform::is_hidden(path, meta),
        filename,
    }
}

/// Filtered directory listing below one run root.
pub struct Scanner<'a> {
    root: PathBuf,
    root_without_prefix: String,
    exclude: &'a ExcludeFilter,
    include: &'a IncludeFilter,
    config: &'a AppConfig,
}

impl<'a> Scanner<'a> {
    pub fn new(
        root: &Path,
        exclude: &'a ExcludeFilter,
        include: &'a IncludeFilter,
        config: &'a AppConfig,
    ) -> Self {
        Self {
            root: platform::absolute(root),
            root_without_prefix: platform::path_without_prefix(root),
            exclude,
            include,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `dir` relative to the run root, normalized.
    pub fn rel_dir(&self, dir: &Path) -> String {
        match dir.strip_prefix(&self.root) {
            Ok(rel) => normalize_dir(&rel.to_string_lossy()),
            Err(_) => "/".to_string(),
        }
    }

    fn full_dir(&self, rel_dir: &str) -> String {
        format!("{}{}", self.root_without_prefix, rel_dir.trim_start_matches('/'))
    }

    /// Lists `dir`. Failing to open `dir` is an error; entries that fail to
    /// read are collected in [`DirListing::failures`].
    pub fn list(&self, dir: &Path) -> Result<DirListing> {
        let entries = fs::read_dir(dir).map_err(|e| Error::read(dir, e))?;
        Ok(self.list_entries(dir, entries.map(|entry| entry.map(|e| e.path()))))
    }

    fn list_entries(
        &self,
        dir: &Path,
        entries: impl Iterator<Item = io::Result<PathBuf>>,
    ) -> DirListing {
        let rel_dir = self.rel_dir(dir);
        let files_included = self.include.includes(&rel_dir);
        let mut listing = DirListing {
            rel_dir: rel_dir.clone(),
            ..DirListing::default()
        };

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    let failure = Error::read(dir, e);
                    error!("Skipping entry: {}", failure);
                    listing.failures.push(failure);
                    continue;
                }
            };
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    let failure = Error::read(&path, e);
                    error!("Skipping entry: {}", failure);
                    listing.failures.push(failure);
                    continue;
                }
            };
            let file_type = meta.file_type();
            if file_type.is_symlink() {
                debug!("Skipping symlink {}", path.display());
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if file_type.is_dir() {
                let child = format!("{}{}/", rel_dir, name);
                if self.exclude.excludes_dir(&self.full_dir(&child)) {
                    debug!("Excluded directory {}", path.display());
                } else if self.include.descends(&child) {
                    listing.subdirs.push(path);
                }
            } else if file_type.is_file() && files_included {
                if self.exclude.excludes_file(&name) {
                    debug!("Excluded file {}", path.display());
                    continue;
                }
                let file = scanned_file(&path, &meta);
                let is_archive = file
                    .extension
                    .as_deref()
                    .map_or(false, |ext| self.config.is_archive(ext));
                if is_archive {
                    listing.archives.push(file);
                } else {
                    listing.files.push(file);
                }
            }
        }

        listing.subdirs.sort();
        listing.files.sort_by(|a, b| b.size.cmp(&a.size));
        listing.archives.sort_by(|a, b| b.size.cmp(&a.size));
        listing
    }

    /// Counts files and bytes below the root. Unreadable directories are
    /// recorded and skipped.
    pub fn survey(&self, cancel: &CancelToken) -> Result<Survey> {
        let mut survey = Survey::default();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            cancel.check()?;
            match self.list(&dir) {
                Ok(listing) => {
                    for file in listing.files.iter().chain(listing.archives.iter()) {
                        survey.files += 1;
                        survey.bytes += file.size;
                    }
                    survey
                        .failures
                        .extend(listing.failures.iter().map(|e| e.to_string()));
                    pending.extend(listing.subdirs);
                }
                Err(e) if e.is_per_item() => {
                    error!("Survey skipped {}: {}", dir.display(), e);
                    survey.failures.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Survey of {}: {} files, {} bytes",
            self.root.display(),
            survey.files,
            survey.bytes
        );
        Ok(survey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, len: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![b'x'; len]).unwrap();
    }

    #[test]
    fn test_list_filters_and_orders() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("small.txt"), 10);
        write(&root.join("big.txt"), 1000);
        write(&root.join("Thumbs.db"), 5);
        write(&root.join("pack.zip"), 100);
        write(&root.join("sub/inner.txt"), 1);
        write(&root.join("skip/inner.txt"), 1);

        let config = AppConfig::default();
        let exclude = ExcludeFilter::new(
            &["/thumbs.db/".to_string()],
            &["/skip/".to_string()],
            false,
        );
        let include = IncludeFilter::default();
        let scanner = Scanner::new(root, &exclude, &include, &config);

        let listing = scanner.list(scanner.root()).unwrap();
        assert_eq!(listing.rel_dir, "/");
        let names: Vec<&str> = listing.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["big.txt", "small.txt"]);
        assert_eq!(listing.archives.len(), 1);
        assert_eq!(listing.subdirs.len(), 1);
        assert_eq!(scanner.rel_dir(&listing.subdirs[0]), "/sub/");
        assert!(exclude.unmatched_entries().is_empty());
    }

    #[test]
    fn test_unreadable_entries_do_not_hide_the_rest() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("kept.txt"), 7);
        write(&root.join("sub/inner.txt"), 1);

        let config = AppConfig::default();
        let exclude = ExcludeFilter::new(&[], &[], true);
        let include = IncludeFilter::default();
        let scanner = Scanner::new(root, &exclude, &include, &config);
        let root = scanner.root().to_path_buf();
        let entries = vec![
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            Ok(root.join("kept.txt")),
            Ok(root.join("vanished.txt")),
            Ok(root.join("sub")),
        ];

        let listing = scanner.list_entries(&root, entries.into_iter());
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].filename, "kept.txt");
        assert_eq!(listing.subdirs, vec![root.join("sub")]);
        assert_eq!(listing.failures.len(), 2);
        assert!(listing.failures.iter().all(|e| e.is_per_item()));
        assert!(listing.failures[1].to_string().contains("vanished.txt"));
    }

    #[test]
    fn test_survey_counts() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("a"), 3);
        write(&dir.path().join("b/c"), 4);
        write(&dir.path().join("b/d/e"), 5);
        let config = AppConfig::default();
        let exclude = ExcludeFilter::new(&[], &[], true);
        let include = IncludeFilter::default();
        let scanner = Scanner::new(dir.path(), &exclude, &include, &config);
        let survey = scanner.survey(&CancelToken::new()).unwrap();
        assert_eq!(survey.files, 3);
        assert_eq!(survey.bytes, 12);
        assert!(survey.failures.is_empty());
    }

    #[test]
    fn test_extension() {
        assert_eq!(file_extension("a.JPG").as_deref(), Some("jpg"));
        assert_eq!(file_extension(".hidden"), None);
        assert_eq!(file_extension("noext"), None);
    }
}
