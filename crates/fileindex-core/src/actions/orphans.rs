use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::{Catalog, LocatedFile};
use crate::error::{Error, Result};
use crate::matching::{without_empty_files, MatchMode, Matcher};
use crate::platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanDirection {
    /// Files of the reference directory missing from all other directories.
    #[default]
    MissingInOthers,
    /// Files of the other directories missing from the reference directory.
    MissingInReference,
}

fn indexed_files(catalog: &Catalog, dir: &Path) -> Result<Vec<LocatedFile>> {
    let dir = platform::absolute(dir);
    let run_path = catalog
        .newest_run_path(&dir, true)?
        .ok_or_else(|| Error::Precondition(format!("{} has no complete index run", dir.display())))?;
    Ok(without_empty_files(&catalog.load_located_files(&run_path, true)?))
}

/// Non-empty files without a copy (same hash and size) on the other side,
/// sorted by path.
pub fn files_without_copy(
    catalog: &Catalog,
    reference: &Path,
    others: &[PathBuf],
    direction: OrphanDirection,
) -> Result<Vec<LocatedFile>> {
    let reference_files = indexed_files(catalog, reference)?;
    let mut other_files = Vec::new();
    for dir in others {
        other_files.extend(indexed_files(catalog, dir)?);
    }
    let (from, against) = match direction {
        OrphanDirection::MissingInOthers => (reference_files, other_files),
        OrphanDirection::MissingInReference => (other_files, reference_files),
    };

    let matcher = Matcher::new(MatchMode::Hash | MatchMode::FileSize);
    let mut orphans = matcher
        .subtract_iter(from, &against, true)?
        .collect::<Result<Vec<_>>>()?;
    orphans.sort_by_cached_key(|f| f.file_path());
    info!(
        "{} files of {} without a copy ({:?})",
        orphans.len(),
        reference.display(),
        direction
    );
    Ok(orphans)
}
