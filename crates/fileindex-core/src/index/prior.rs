use ahash::AHashMap;
use std::path::Path;
use tracing::info;

use crate::catalog::{Catalog, LocatedFile};
use crate::error::Result;

/// Files of earlier runs covering the directory being indexed.
///
/// Built from the newest complete run plus any failed runs after it. Later
/// runs override earlier ones per file path.
#[derive(Debug, Default)]
pub struct PriorLayer {
    by_size_modified: AHashMap<(i64, i64), Vec<LocatedFile>>,
    base_run_id: Option<i64>,
    len: usize,
}

pub(crate) fn fold_case(path: String, case_sensitive: bool) -> String {
    if case_sensitive {
        path
    } else {
        path.to_lowercase()
    }
}

/// Absolute file path without prefix.
pub(crate) fn located_file_key(file: &LocatedFile, case_sensitive: bool) -> String {
    fold_case(
        format!("{}{}", file.full_path_excl_prefix(), file.filename()),
        case_sensitive,
    )
}

impl PriorLayer {
    pub fn load(catalog: &Catalog, dir: &Path, case_sensitive: bool) -> Result<Self> {
        let base = catalog.newest_run_path(dir, true)?;
        let base_run_id = base.as_ref().map(|b| b.run.id);
        let mut failed = catalog.failed_run_paths(dir, base_run_id)?;
        // newest first from the catalog; apply oldest first
        failed.reverse();

        let mut by_path: AHashMap<String, LocatedFile> = AHashMap::new();
        for run_path in base.iter().chain(failed.iter()) {
            for file in catalog.load_located_files(run_path, false)? {
                by_path.insert(located_file_key(&file, case_sensitive), file);
            }
        }

        let len = by_path.len();
        let mut by_size_modified: AHashMap<(i64, i64), Vec<LocatedFile>> = AHashMap::new();
        for file in by_path.into_values() {
            by_size_modified
                .entry((file.size(), file.modified()))
                .or_default()
                .push(file);
        }
        info!(
            "Prior index layer for {}: {} files (base run {:?}, {} failed runs)",
            dir.display(),
            len,
            base_run_id,
            failed.len()
        );
        Ok(Self {
            by_size_modified,
            base_run_id,
            len,
        })
    }

    pub fn base_run_id(&self) -> Option<i64> {
        self.base_run_id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn candidates(&self, size: i64, modified: i64) -> &[LocatedFile] {
        self.by_size_modified
            .get(&(size, modified))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The prior file at exactly `file_key` with equal size and modified time.
    pub fn same_file(
        &self,
        size: i64,
        modified: i64,
        file_key: &str,
        case_sensitive: bool,
    ) -> Option<&LocatedFile> {
        self.candidates(size, modified)
            .iter()
            .find(|f| located_file_key(f, case_sensitive) == file_key)
    }
}
