use std::path::PathBuf;
use std::sync::Arc;

use crate::checksum;
use crate::error::{Error, Result};

/// Id of the sentinel root row of the `file_path` tree.
pub const ROOT_PATH_ID: i64 = 1;

/// File content, identified by (size, hash). Shared by all locations with equal content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub id: i64,
    pub file_size: i64,
    pub hash: String,
    /// Comma-joined chunk hashes from the start of the file.
    pub hash_begin: String,
    /// Comma-joined chunk hashes from the end of the file.
    pub hash_end: String,
}

impl FileContent {
    pub fn begin_chunks(&self) -> Vec<String> {
        checksum::split_chunks(&self.hash_begin)
    }
}

/// Image metadata derived from a file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub id: i64,
    pub file_content_id: i64,
    pub img_width: Option<i64>,
    pub img_height: Option<i64>,
    /// Epoch millis.
    pub img_exif_original_date: Option<i64>,
}

/// A node of the directory tree. `path` starts and ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub path: String,
    pub path_part: String,
    pub depth: i64,
}

/// One scan snapshot of a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRun {
    pub id: i64,
    pub file_path_id: i64,
    /// Root path without prefix, `/`-separated, ends with `/`.
    pub path: String,
    /// Drive letter with colon on Windows, empty elsewhere.
    pub path_prefix: String,
    pub medium_description: Option<String>,
    pub medium_serial: Option<String>,
    pub medium_case_sensitive: bool,
    /// Epoch millis.
    pub run_date: i64,
    pub readonly_medium: bool,
    pub is_backup: bool,
    pub include_paths: String,
    pub excluded_paths: String,
    pub excluded_files: String,
    pub only_read_first_mb: bool,
    pub total_space: Option<i64>,
    pub usable_space: Option<i64>,
    pub failure_occurred: bool,
}

impl IndexRun {
    pub fn root(&self) -> String {
        format!("{}{}", self.path_prefix, self.path)
    }

    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(self.root())
    }
}

/// One filename entry within one index run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub id: i64,
    pub index_run_id: i64,
    /// None for empty files.
    pub file_content_id: Option<i64>,
    /// Directory relative to the run root.
    pub file_path_id: i64,
    pub filename: String,
    pub extension: Option<String>,
    pub reference_inode: Option<i64>,
    /// Epoch millis.
    pub created: i64,
    /// Epoch millis.
    pub modified: i64,
    pub hidden: bool,
    pub in_archive: bool,
}

/// A location together with the entities it refers to. Element type of the set algebra.
#[derive(Debug, Clone)]
pub struct LocatedFile {
    pub location: Arc<FileLocation>,
    pub content: Option<Arc<FileContent>>,
    pub meta: Option<Arc<FileMeta>>,
    pub path: Arc<FilePath>,
    pub run: Arc<IndexRun>,
}

impl AsRef<LocatedFile> for LocatedFile {
    fn as_ref(&self) -> &LocatedFile {
        self
    }
}

impl LocatedFile {
    pub fn id(&self) -> i64 {
        self.location.id
    }

    pub fn filename(&self) -> &str {
        &self.location.filename
    }

    pub fn size(&self) -> i64 {
        self.content.as_ref().map(|c| c.file_size).unwrap_or(0)
    }

    pub fn hash(&self) -> Option<&str> {
        self.content.as_ref().map(|c| c.hash.as_str())
    }

    pub fn is_empty_file(&self) -> bool {
        self.content.is_none()
    }

    pub fn modified(&self) -> i64 {
        self.location.modified
    }

    /// Directory relative to the run root, e.g. `/sub/dir/`.
    pub fn rel_path(&self) -> &str {
        &self.path.path
    }

    pub fn rel_file_path(&self) -> String {
        format!("{}{}", self.path.path, self.location.filename)
    }

    /// Directory without prefix, e.g. `/data/photos/sub/`.
    pub fn full_path_excl_prefix(&self) -> String {
        format!("{}{}", self.run.path, self.path.path.trim_start_matches('/'))
    }

    pub fn full_path(&self) -> String {
        format!("{}{}", self.run.path_prefix, self.full_path_excl_prefix())
    }

    pub fn file_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.full_path(), self.location.filename))
    }
}

fn invalid(message: String) -> Error {
    Error::Validation(message)
}

pub fn validate_file_path(path: &FilePath) -> Result<()> {
    if !path.path.starts_with('/') || !path.path.ends_with('/') || path.path.contains("//") {
        return Err(invalid(format!("malformed path '{}'", path.path)));
    }
    if path.id != ROOT_PATH_ID && (path.path_part.is_empty() || path.path_part.contains('/')) {
        return Err(invalid(format!("malformed path part '{}'", path.path_part)));
    }
    let depth = path.path.matches('/').count() as i64 - 1;
    if depth != path.depth {
        return Err(invalid(format!(
            "depth {} does not match path '{}'",
            path.depth, path.path
        )));
    }
    Ok(())
}

pub fn validate_location(location: &FileLocation) -> Result<()> {
    if location.filename.is_empty() || location.filename.contains('/') {
        return Err(invalid(format!("malformed filename '{}'", location.filename)));
    }
    if location.index_run_id <= 0 || location.file_path_id <= 0 {
        return Err(invalid(format!(
            "location '{}' lacks run or path reference",
            location.filename
        )));
    }
    Ok(())
}

pub fn validate_index_run(run: &IndexRun) -> Result<()> {
    if !run.path.starts_with('/') || !run.path.ends_with('/') || run.path.contains("//") {
        return Err(invalid(format!("malformed run path '{}'", run.path)));
    }
    if run.path_prefix.contains('/') {
        return Err(invalid(format!("malformed path prefix '{}'", run.path_prefix)));
    }
    Ok(())
}

pub fn validate_content(content: &FileContent) -> Result<()> {
    if content.hash.is_empty() || content.file_size <= 0 {
        return Err(invalid(format!(
            "content needs a hash and a positive size (size {})",
            content.file_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(id: i64, path: &str, part: &str, depth: i64) -> FilePath {
        FilePath {
            id,
            parent_id: Some(ROOT_PATH_ID),
            path: path.to_string(),
            path_part: part.to_string(),
            depth,
        }
    }

    #[test]
    fn test_validate_file_path() {
        assert!(validate_file_path(&path(2, "/a/", "a", 1)).is_ok());
        assert!(validate_file_path(&path(3, "/a/b/", "b", 2)).is_ok());
        assert!(validate_file_path(&path(2, "/a", "a", 1)).is_err());
        assert!(validate_file_path(&path(2, "//a/", "a", 1)).is_err());
        assert!(validate_file_path(&path(2, "/a/b/", "a/b", 2)).is_err());
        assert!(validate_file_path(&path(2, "/a/b/", "b", 1)).is_err());
    }

    #[test]
    fn test_located_file_paths() {
        let run = IndexRun {
            id: 1,
            file_path_id: 5,
            path: "/data/photos/".to_string(),
            path_prefix: "C:".to_string(),
            medium_description: None,
            medium_serial: None,
            medium_case_sensitive: false,
            run_date: 0,
            readonly_medium: false,
            is_backup: false,
            include_paths: "[]".to_string(),
            excluded_paths: "[]".to_string(),
            excluded_files: "[]".to_string(),
            only_read_first_mb: false,
            total_space: None,
            usable_space: None,
            failure_occurred: false,
        };
        let file = LocatedFile {
            location: Arc::new(FileLocation {
                id: 9,
                index_run_id: 1,
                file_content_id: None,
                file_path_id: 6,
                filename: "img.jpg".to_string(),
                extension: Some("jpg".to_string()),
                reference_inode: None,
                created: 0,
                modified: 0,
                hidden: false,
                in_archive: false,
            }),
            content: None,
            meta: None,
            path: Arc::new(path(6, "/2020/", "2020", 1)),
            run: Arc::new(run),
        };
        assert_eq!(file.full_path_excl_prefix(), "/data/photos/2020/");
        assert_eq!(file.full_path(), "C:/data/photos/2020/");
        assert_eq!(file.rel_file_path(), "/2020/img.jpg");
        assert!(file.is_empty_file());
        assert_eq!(file.size(), 0);
    }
}
