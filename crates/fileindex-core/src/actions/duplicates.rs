use ahash::{AHashMap, AHashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::{Catalog, LocatedFile, RunPath};
use crate::error::{Error, Result};
use crate::matching::{without_empty_files, MatchMode, MatchModes, Matcher, PairFilter};
use crate::platform;

/// Files sharing one match key, sorted by path.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub size: u64,
    pub files: Vec<LocatedFile>,
}

impl DuplicateGroup {
    /// Hardlinked files share storage and count once.
    pub fn storage_copies(&self) -> usize {
        let mut inodes = AHashSet::new();
        self.files
            .iter()
            .filter(|f| match f.location.reference_inode {
                Some(inode) => inodes.insert(inode),
                None => true,
            })
            .count()
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.size * self.storage_copies().saturating_sub(1) as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub wasted_bytes: u64,
}

impl DuplicateReport {
    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.files.len() - 1).sum()
    }
}

fn newest_complete_run(catalog: &Catalog, dir: &Path) -> Result<RunPath> {
    let dir = platform::absolute(dir);
    catalog
        .newest_run_path(&dir, true)?
        .ok_or_else(|| Error::Precondition(format!("{} has no complete index run", dir.display())))
}

/// Files of the first directory that also exist in one of the others.
///
/// Matches by size and hash (the leading chunk hashes when any run only hashed
/// the first MiB), optionally also by filename. A file never duplicates itself
/// or a hardlink of itself. Files inside archives take part in matching but
/// are not reported.
pub fn find_duplicates(
    catalog: &Catalog,
    dirs: &[PathBuf],
    include_filename: bool,
) -> Result<DuplicateReport> {
    if dirs.len() < 2 {
        return Err(Error::Precondition(
            "at least two directories are needed to search for duplicates".to_string(),
        ));
    }
    let run_paths = dirs
        .iter()
        .map(|dir| newest_complete_run(catalog, dir))
        .collect::<Result<Vec<_>>>()?;

    let truncated = run_paths.iter().any(|rp| rp.run.only_read_first_mb);
    let mut modes = MatchModes::from(MatchMode::FileSize).with(if truncated {
        MatchMode::HashBegin1Mb
    } else {
        MatchMode::Hash
    });
    if include_filename {
        modes = modes | MatchMode::Filename;
    }
    let matcher = Matcher::new(modes);
    let filter = PairFilter::IdNeq.and(PairFilter::HardlinkNeq);

    let first = without_empty_files(&catalog.load_located_files(&run_paths[0], true)?);
    let mut index: AHashMap<String, usize> = AHashMap::new();
    let mut grouped: Vec<(AHashSet<i64>, Vec<LocatedFile>)> = Vec::new();
    for run_path in &run_paths[1..] {
        let other = without_empty_files(&catalog.load_located_files(run_path, true)?);
        let pairs = filter.apply(&matcher.intersect(&first, &other, true)?);
        debug!(
            "{} duplicate pairs between run {} and run {}",
            pairs.len(),
            run_paths[0].run.id,
            run_path.run.id
        );
        for (a, b) in pairs {
            let slot = *index.entry(matcher.key(&a)).or_insert_with(|| {
                grouped.push((AHashSet::new(), Vec::new()));
                grouped.len() - 1
            });
            let (ids, files) = &mut grouped[slot];
            for file in [a, b] {
                if ids.insert(file.id()) {
                    files.push(file);
                }
            }
        }
    }

    let mut groups: Vec<DuplicateGroup> = grouped
        .into_iter()
        .filter_map(|(_, files)| {
            let mut files: Vec<LocatedFile> =
                files.into_iter().filter(|f| !f.location.in_archive).collect();
            if files.len() < 2 {
                return None;
            }
            files.sort_by_cached_key(|f| f.file_path());
            Some(DuplicateGroup {
                size: files[0].size() as u64,
                files,
            })
        })
        .collect();
    groups.sort_by_cached_key(|g| g.files[0].file_path());

    let wasted_bytes = groups.iter().map(DuplicateGroup::wasted_bytes).sum();
    info!(
        "{} duplicate groups across {} directories, {} bytes wasted",
        groups.len(),
        dirs.len(),
        wasted_bytes
    );
    Ok(DuplicateReport {
        groups,
        wasted_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::test_support::*;

    #[test]
    fn test_hardlinks_count_once() {
        let mut a = located(1, "/", "a", Some(("h", 100)));
        let mut b = located(2, "/", "b", Some(("h", 100)));
        let c = located(3, "/x/", "c", Some(("h", 100)));
        set_inode(&mut a, Some(7));
        set_inode(&mut b, Some(7));
        let group = DuplicateGroup {
            size: 100,
            files: vec![a, b, c],
        };
        assert_eq!(group.storage_copies(), 2);
        assert_eq!(group.wasted_bytes(), 100);
    }

    #[test]
    fn test_needs_two_directories() {
        let catalog = Catalog::open_in_memory().unwrap();
        let err = find_duplicates(&catalog, &[PathBuf::from("/data")], false).unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }
}
