//! Hook for indexing the contents of container files as virtual directories.
//!
//! No container format is built in. An [`ArchiveExpander`] that understands a
//! format lists its entries to an [`ArchiveVisitor`].

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// One file inside an archive.
pub struct ArchiveEntry<'a> {
    /// `/`-separated path inside the archive, e.g. `docs/readme.txt`.
    pub name: String,
    pub size: u64,
    /// Epoch millis.
    pub modified: i64,
    pub reader: &'a mut dyn Read,
}

pub trait ArchiveVisitor {
    fn entry(&mut self, entry: ArchiveEntry<'_>) -> Result<()>;

    /// A single entry could not be read. The archive continues.
    fn entry_failed(&mut self, name: &str, error: Error);
}

pub trait ArchiveExpander: Send + Sync {
    fn can_expand(&self, extension: &str) -> bool;

    /// Lists every entry of `archive`. Errors returned here abort the whole archive.
    fn expand(&self, archive: &Path, visitor: &mut dyn ArchiveVisitor) -> Result<()>;
}

/// Treats every archive as an opaque file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArchives;

impl ArchiveExpander for NoArchives {
    fn can_expand(&self, _extension: &str) -> bool {
        false
    }

    fn expand(&self, _archive: &Path, _visitor: &mut dyn ArchiveVisitor) -> Result<()> {
        Ok(())
    }
}

/// Splits an entry name into its directory (`a/b/`, possibly empty) and filename.
pub fn split_entry_name(name: &str) -> (String, String) {
    let trimmed = name.trim_matches('/');
    match trimmed.rfind('/') {
        Some(i) => (format!("{}/", &trimmed[..i]), trimmed[i + 1..].to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_entry_name() {
        assert_eq!(
            split_entry_name("docs/sub/readme.txt"),
            ("docs/sub/".to_string(), "readme.txt".to_string())
        );
        assert_eq!(split_entry_name("top.txt"), (String::new(), "top.txt".to_string()));
    }

    #[test]
    fn test_no_archives_never_expands() {
        assert!(!NoArchives.can_expand("zip"));
    }
}
