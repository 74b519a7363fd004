use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::trace;

use super::models::{validate_file_path, FilePath, ROOT_PATH_ID};
use super::queries::row_to_file_path;
use super::sqlite::Catalog;
use crate::error::Result;

/// Normalizes a directory path to the stored form: `/`-separated, starting and
/// ending with `/`, no empty segments.
pub fn normalize_dir(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 2);
    normalized.push('/');
    for part in path.split(|c| c == '/' || c == '\\').filter(|p| !p.is_empty()) {
        normalized.push_str(part);
        normalized.push('/');
    }
    normalized
}

/// Parent directory of a normalized path, `None` for `/`.
pub fn parent_dir(path: &str) -> Option<String> {
    let trimmed = path.strip_suffix('/')?;
    if trimmed.is_empty() {
        return None;
    }
    trimmed.rfind('/').map(|i| trimmed[..=i].to_string())
}

const PATH_COLUMNS: &str = "id, parent_file_path_id, path, path_part, depth";

impl Catalog {
    // ── File Path ────────────────────────────────────────────────

    pub fn get_file_path(&self, id: i64) -> Result<Arc<FilePath>> {
        if let Some(path) = self.path_cache().by_id(id) {
            return Ok(path);
        }
        let path = self.connection().query_row(
            &format!("SELECT {} FROM file_path WHERE id = ?1", PATH_COLUMNS),
            params![id],
            |row| row_to_file_path(row, 0),
        )?;
        let path = Arc::new(path);
        self.path_cache().put(path.clone());
        Ok(path)
    }

    /// Looks up a directory by its full (normalized) path without inserting it.
    pub fn find_file_path(&self, path: &str) -> Result<Option<Arc<FilePath>>> {
        let normalized = normalize_dir(path);
        if let Some(path) = self.path_cache().by_path(&normalized) {
            return Ok(Some(path));
        }
        let found = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM file_path WHERE path = ?1", PATH_COLUMNS),
                params![normalized],
                |row| row_to_file_path(row, 0),
            )
            .optional()?;
        Ok(found.map(|path| {
            let path = Arc::new(path);
            self.path_cache().put(path.clone());
            path
        }))
    }

    fn find_child_path(&self, part: &str, parent_id: i64) -> Result<Option<Arc<FilePath>>> {
        if let Some(path) = self.path_cache().by_part(part, parent_id) {
            return Ok(Some(path));
        }
        let found = self
            .connection()
            .query_row(
                &format!(
                    "SELECT {} FROM file_path WHERE path_part = ?1 AND parent_file_path_id = ?2",
                    PATH_COLUMNS
                ),
                params![part, parent_id],
                |row| row_to_file_path(row, 0),
            )
            .optional()?;
        Ok(found.map(|path| {
            let path = Arc::new(path);
            self.path_cache().put(path.clone());
            path
        }))
    }

    fn insert_file_path(&self, parent: &FilePath, part: &str) -> Result<Arc<FilePath>> {
        let mut path = FilePath {
            id: 0,
            parent_id: Some(parent.id),
            path: format!("{}{}/", parent.path, part),
            path_part: part.to_string(),
            depth: parent.depth + 1,
        };
        validate_file_path(&path)?;
        {
            let conn = self.connection();
            conn.prepare_cached(
                "INSERT INTO file_path (parent_file_path_id, path, path_part, depth) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![path.parent_id, path.path, path.path_part, path.depth])?;
            path.id = conn.last_insert_rowid();
        }
        self.note_writes(1)?;
        trace!("Inserted file path {} ({})", path.path, path.id);
        let path = Arc::new(path);
        self.path_cache().put(path.clone());
        Ok(path)
    }

    /// Resolves every segment of `path` below the root, inserting missing ones.
    pub fn get_or_insert_file_path(&self, path: &str) -> Result<Arc<FilePath>> {
        let normalized = normalize_dir(path);
        if let Some(found) = self.path_cache().by_path(&normalized) {
            return Ok(found);
        }
        let _guard = self.path_cache().lock_inserts();
        let mut current = self.get_file_path(ROOT_PATH_ID)?;
        for part in normalized.split('/').filter(|p| !p.is_empty()) {
            current = match self.find_child_path(part, current.id)? {
                Some(child) => child,
                None => self.insert_file_path(&current, part)?,
            };
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dir() {
        assert_eq!(normalize_dir(""), "/");
        assert_eq!(normalize_dir("/"), "/");
        assert_eq!(normalize_dir("a/b"), "/a/b/");
        assert_eq!(normalize_dir("/a//b/"), "/a/b/");
        assert_eq!(normalize_dir("\\a\\b\\"), "/a/b/");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/a/b/"), Some("/a/".to_string()));
        assert_eq!(parent_dir("/a/"), Some("/".to_string()));
        assert_eq!(parent_dir("/"), None);
    }

    #[test]
    fn test_get_or_insert_builds_tree() {
        let catalog = Catalog::open_in_memory().unwrap();
        let leaf = catalog.get_or_insert_file_path("/a/b/c/").unwrap();
        assert_eq!(leaf.path, "/a/b/c/");
        assert_eq!(leaf.path_part, "c");
        assert_eq!(leaf.depth, 3);

        let parent = catalog.get_file_path(leaf.parent_id.unwrap()).unwrap();
        assert_eq!(parent.path, "/a/b/");

        let again = catalog.get_or_insert_file_path("a/b/c").unwrap();
        assert_eq!(again.id, leaf.id);

        let sibling = catalog.get_or_insert_file_path("/a/x/").unwrap();
        assert_eq!(sibling.parent_id, parent.parent_id);

        let count: i64 = catalog
            .connection()
            .query_row("SELECT COUNT(*) FROM file_path", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 5, "root, a, b, c, x");
    }

    #[test]
    fn test_root_resolves_to_sentinel() {
        let catalog = Catalog::open_in_memory().unwrap();
        let root = catalog.get_or_insert_file_path("/").unwrap();
        assert_eq!(root.id, ROOT_PATH_ID);
        assert!(catalog.find_file_path("/missing/").unwrap().is_none());
    }

    #[test]
    fn test_lookup_after_cache_clear() {
        let catalog = Catalog::open_in_memory().unwrap();
        let inserted = catalog.get_or_insert_file_path("/a/b/").unwrap();
        catalog.clear_caches();
        let found = catalog.find_file_path("/a/b/").unwrap().unwrap();
        assert_eq!(found.id, inserted.id);
    }
}
