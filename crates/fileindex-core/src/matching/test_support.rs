use std::sync::Arc;

use crate::catalog::{FileContent, FileLocation, FilePath, IndexRun, LocatedFile};

pub(crate) fn run(id: i64, path: &str) -> IndexRun {
    IndexRun {
        id,
        file_path_id: 1,
        path: path.to_string(),
        path_prefix: String::new(),
        medium_description: None,
        medium_serial: None,
        medium_case_sensitive: true,
        run_date: 1_700_000_000_000,
        readonly_medium: false,
        is_backup: false,
        include_paths: "[]".to_string(),
        excluded_paths: "[]".to_string(),
        excluded_files: "[]".to_string(),
        only_read_first_mb: false,
        total_space: None,
        usable_space: None,
        failure_occurred: false,
    }
}

/// A file below the run root `/data/`. `content` is `(hash, size)`; `None` makes it empty.
pub(crate) fn located(
    id: i64,
    rel_path: &str,
    filename: &str,
    content: Option<(&str, i64)>,
) -> LocatedFile {
    let part = rel_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string();
    let path = FilePath {
        id: 100 + id,
        parent_id: Some(1),
        path: rel_path.to_string(),
        path_part: part,
        depth: rel_path.matches('/').count() as i64 - 1,
    };
    let content = content.map(|(hash, size)| {
        Arc::new(FileContent {
            id,
            file_size: size,
            hash: hash.to_string(),
            hash_begin: hash.to_string(),
            hash_end: hash.to_string(),
        })
    });
    LocatedFile {
        location: Arc::new(FileLocation {
            id,
            index_run_id: 1,
            file_content_id: content.as_ref().map(|c| c.id),
            file_path_id: path.id,
            filename: filename.to_string(),
            extension: None,
            reference_inode: None,
            created: 0,
            modified: 1_700_000_000_000,
            hidden: false,
            in_archive: false,
        }),
        content,
        meta: None,
        path: Arc::new(path),
        run: Arc::new(run(1, "/data/")),
    }
}

pub(crate) fn set_case_sensitive(file: &mut LocatedFile, case_sensitive: bool) {
    Arc::make_mut(&mut file.run).medium_case_sensitive = case_sensitive;
}

pub(crate) fn set_modified(file: &mut LocatedFile, modified: i64) {
    Arc::make_mut(&mut file.location).modified = modified;
}

pub(crate) fn set_inode(file: &mut LocatedFile, inode: Option<i64>) {
    Arc::make_mut(&mut file.location).reference_inode = inode;
}
