use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;

use super::models::*;
use super::sqlite::Catalog;
use crate::checksum::{self, Checksum};
use crate::error::{Error, Result};

// Field <-> column mapping. `offset` is the index of the entity's first column.

pub(crate) const CONTENT_COLUMNS: &str = "c.id, c.file_size, c.hash, c.hash_begin, c.hash_end";
pub(crate) const META_COLUMNS: &str =
    "m.id, m.file_content_id, m.img_width, m.img_height, m.img_exif_original_date";
pub(crate) const RUN_COLUMNS: &str = "r.id, r.file_path_id, r.path, r.path_prefix, \
     r.medium_description, r.medium_serial, r.medium_case_sensitive, r.run_date, \
     r.readonly_medium, r.is_backup, r.include_paths, r.excluded_paths, r.excluded_files, \
     r.only_read_first_mb, r.total_space, r.usable_space, r.failure_occurred";
pub(crate) const LOCATION_COLUMNS: &str = "l.id, l.index_run_id, l.file_content_id, \
     l.file_path_id, l.filename, l.extension, l.reference_inode, l.created, l.modified, \
     l.hidden, l.in_archive";

pub(crate) fn row_to_file_path(row: &Row<'_>, offset: usize) -> rusqlite::Result<FilePath> {
    Ok(FilePath {
        id: row.get(offset)?,
        parent_id: row.get(offset + 1)?,
        path: row.get(offset + 2)?,
        path_part: row.get(offset + 3)?,
        depth: row.get(offset + 4)?,
    })
}

/// Maps the content columns of a LEFT JOIN; `None` when the join found no row.
pub(crate) fn row_to_content(row: &Row<'_>, offset: usize) -> rusqlite::Result<Option<FileContent>> {
    let id: Option<i64> = row.get(offset)?;
    match id {
        None => Ok(None),
        Some(id) => Ok(Some(FileContent {
            id,
            file_size: row.get(offset + 1)?,
            hash: row.get(offset + 2)?,
            hash_begin: row.get(offset + 3)?,
            hash_end: row.get(offset + 4)?,
        })),
    }
}

pub(crate) fn row_to_meta(row: &Row<'_>, offset: usize) -> rusqlite::Result<Option<FileMeta>> {
    let id: Option<i64> = row.get(offset)?;
    match id {
        None => Ok(None),
        Some(id) => Ok(Some(FileMeta {
            id,
            file_content_id: row.get(offset + 1)?,
            img_width: row.get(offset + 2)?,
            img_height: row.get(offset + 3)?,
            img_exif_original_date: row.get(offset + 4)?,
        })),
    }
}

pub(crate) fn row_to_index_run(row: &Row<'_>, offset: usize) -> rusqlite::Result<IndexRun> {
    Ok(IndexRun {
        id: row.get(offset)?,
        file_path_id: row.get(offset + 1)?,
        path: row.get(offset + 2)?,
        path_prefix: row.get(offset + 3)?,
        medium_description: row.get(offset + 4)?,
        medium_serial: row.get(offset + 5)?,
        medium_case_sensitive: row.get(offset + 6)?,
        run_date: row.get(offset + 7)?,
        readonly_medium: row.get(offset + 8)?,
        is_backup: row.get(offset + 9)?,
        include_paths: row.get(offset + 10)?,
        excluded_paths: row.get(offset + 11)?,
        excluded_files: row.get(offset + 12)?,
        only_read_first_mb: row.get(offset + 13)?,
        total_space: row.get(offset + 14)?,
        usable_space: row.get(offset + 15)?,
        failure_occurred: row.get(offset + 16)?,
    })
}

pub(crate) fn row_to_location(row: &Row<'_>, offset: usize) -> rusqlite::Result<FileLocation> {
    Ok(FileLocation {
        id: row.get(offset)?,
        index_run_id: row.get(offset + 1)?,
        file_content_id: row.get(offset + 2)?,
        file_path_id: row.get(offset + 3)?,
        filename: row.get(offset + 4)?,
        extension: row.get(offset + 5)?,
        reference_inode: row.get(offset + 6)?,
        created: row.get(offset + 7)?,
        modified: row.get(offset + 8)?,
        hidden: row.get(offset + 9)?,
        in_archive: row.get(offset + 10)?,
    })
}

impl Catalog {
    // ── File Content ─────────────────────────────────────────────

    pub fn get_content(&self, id: i64) -> Result<Arc<FileContent>> {
        if let Some(content) = self.registry().get::<FileContent>(id) {
            return Ok(content);
        }
        let content = self.connection().query_row(
            &format!("SELECT {} FROM file_content c WHERE c.id = ?1", CONTENT_COLUMNS),
            params![id],
            |row| row_to_content(row, 0),
        )?;
        match content {
            Some(content) => Ok(self.registry().intern(content)),
            None => Err(Error::Validation(format!("file content {} not found", id))),
        }
    }

    pub fn find_content(&self, file_size: i64, hash: &str) -> Result<Option<Arc<FileContent>>> {
        let content = self
            .connection()
            .prepare_cached(&format!(
                "SELECT {} FROM file_content c WHERE c.file_size = ?1 AND c.hash = ?2",
                CONTENT_COLUMNS
            ))?
            .query_row(params![file_size, hash], |row| row_to_content(row, 0))
            .optional()?
            .flatten();
        Ok(content.map(|c| self.registry().intern(c)))
    }

    pub fn insert_content(&self, file_size: i64, checksum: &Checksum) -> Result<Arc<FileContent>> {
        let mut content = FileContent {
            id: 0,
            file_size,
            hash: checksum.hash.clone(),
            hash_begin: checksum::join_chunks(&checksum.begin),
            hash_end: checksum::join_chunks(&checksum.end),
        };
        validate_content(&content)?;
        {
            let conn = self.connection();
            conn.prepare_cached(
                "INSERT INTO file_content (file_size, hash, hash_begin, hash_end) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                content.file_size,
                content.hash,
                content.hash_begin,
                content.hash_end
            ])?;
            content.id = conn.last_insert_rowid();
        }
        self.note_writes(1)?;
        Ok(self.registry().intern(content))
    }

    // ── File Meta ────────────────────────────────────────────────

    pub fn insert_meta(
        &self,
        file_content_id: i64,
        img_width: Option<i64>,
        img_height: Option<i64>,
        img_exif_original_date: Option<i64>,
    ) -> Result<Arc<FileMeta>> {
        let mut meta = FileMeta {
            id: 0,
            file_content_id,
            img_width,
            img_height,
            img_exif_original_date,
        };
        {
            let conn = self.connection();
            conn.prepare_cached(
                "INSERT INTO file_meta (file_content_id, img_width, img_height, img_exif_original_date) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                meta.file_content_id,
                meta.img_width,
                meta.img_height,
                meta.img_exif_original_date
            ])?;
            meta.id = conn.last_insert_rowid();
        }
        self.note_writes(1)?;
        Ok(self.registry().intern(meta))
    }

    pub fn find_meta(&self, file_content_id: i64) -> Result<Option<Arc<FileMeta>>> {
        let meta = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM file_meta m WHERE m.file_content_id = ?1", META_COLUMNS),
                params![file_content_id],
                |row| row_to_meta(row, 0),
            )
            .optional()?
            .flatten();
        Ok(meta.map(|m| self.registry().intern(m)))
    }

    // ── Index Run ────────────────────────────────────────────────

    /// Inserts `run` (its id is ignored) and returns the stored row.
    pub fn insert_index_run(&self, mut run: IndexRun) -> Result<Arc<IndexRun>> {
        validate_index_run(&run)?;
        {
            let conn = self.connection();
            conn.execute(
                "INSERT INTO index_run (file_path_id, path, path_prefix, medium_description, \
                 medium_serial, medium_case_sensitive, run_date, readonly_medium, is_backup, \
                 include_paths, excluded_paths, excluded_files, only_read_first_mb, total_space, \
                 usable_space, failure_occurred) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    run.file_path_id,
                    run.path,
                    run.path_prefix,
                    run.medium_description,
                    run.medium_serial,
                    run.medium_case_sensitive,
                    run.run_date,
                    run.readonly_medium,
                    run.is_backup,
                    run.include_paths,
                    run.excluded_paths,
                    run.excluded_files,
                    run.only_read_first_mb,
                    run.total_space,
                    run.usable_space,
                    run.failure_occurred,
                ],
            )?;
            run.id = conn.last_insert_rowid();
        }
        self.note_writes(1)?;
        debug!("Created index run {} for {}", run.id, run.root());
        Ok(self.registry().replace(run))
    }

    /// Records the outcome of a run. `failure_occurred` stays true for incomplete runs.
    pub fn finalize_index_run(
        &self,
        run_id: i64,
        failure_occurred: bool,
        usable_space: Option<i64>,
    ) -> Result<Arc<IndexRun>> {
        self.connection().execute(
            "UPDATE index_run SET failure_occurred = ?1, \
             usable_space = COALESCE(?2, usable_space) WHERE id = ?3",
            params![failure_occurred, usable_space, run_id],
        )?;
        self.note_writes(1)?;
        self.registry().remove::<IndexRun>(run_id);
        self.get_index_run(run_id)
    }

    pub fn get_index_run(&self, id: i64) -> Result<Arc<IndexRun>> {
        if let Some(run) = self.registry().get::<IndexRun>(id) {
            return Ok(run);
        }
        let run = self.connection().query_row(
            &format!("SELECT {} FROM index_run r WHERE r.id = ?1", RUN_COLUMNS),
            params![id],
            |row| row_to_index_run(row, 0),
        )?;
        Ok(self.registry().intern(run))
    }

    /// All runs, newest first, each with its number of file locations.
    pub fn list_index_runs(&self) -> Result<Vec<(Arc<IndexRun>, i64)>> {
        let rows = {
            let conn = self.connection();
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, (SELECT COUNT(*) FROM file_location l WHERE l.index_run_id = r.id) \
                 FROM index_run r ORDER BY r.run_date DESC, r.id DESC",
                RUN_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row_to_index_run(row, 0)?, row.get::<_, i64>(17)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        Ok(rows
            .into_iter()
            .map(|(run, count)| (self.registry().intern(run), count))
            .collect())
    }

    pub fn count_locations(&self, run_id: i64) -> Result<i64> {
        Ok(self.connection().query_row(
            "SELECT COUNT(*) FROM file_location WHERE index_run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?)
    }

    // ── File Location ────────────────────────────────────────────

    pub fn insert_location(&self, mut location: FileLocation) -> Result<Arc<FileLocation>> {
        validate_location(&location)?;
        {
            let conn = self.connection();
            conn.prepare_cached(
                "INSERT INTO file_location (index_run_id, file_content_id, file_path_id, filename, \
                 extension, reference_inode, created, modified, hidden, in_archive) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?
            .execute(params![
                location.index_run_id,
                location.file_content_id,
                location.file_path_id,
                location.filename,
                location.extension,
                location.reference_inode,
                location.created,
                location.modified,
                location.hidden,
                location.in_archive,
            ])?;
            location.id = conn.last_insert_rowid();
        }
        self.note_writes(1)?;
        Ok(self.registry().intern(location))
    }

    pub fn get_location(&self, id: i64) -> Result<Arc<FileLocation>> {
        if let Some(location) = self.registry().get::<FileLocation>(id) {
            return Ok(location);
        }
        let location = self.connection().query_row(
            &format!("SELECT {} FROM file_location l WHERE l.id = ?1", LOCATION_COLUMNS),
            params![id],
            |row| row_to_location(row, 0),
        )?;
        Ok(self.registry().intern(location))
    }

    /// Assigns the hardlink equivalence id of a location discovered after insert.
    pub fn set_reference_inode(&self, location_id: i64, reference_inode: i64) -> Result<()> {
        self.connection()
            .prepare_cached("UPDATE file_location SET reference_inode = ?1 WHERE id = ?2")?
            .execute(params![reference_inode, location_id])?;
        self.note_writes(1)?;
        self.registry().remove::<FileLocation>(location_id);
        Ok(())
    }

    pub fn max_reference_inode(&self) -> Result<i64> {
        let max: Option<i64> = self.connection().query_row(
            "SELECT MAX(reference_inode) FROM file_location",
            [],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum(hash: &str) -> Checksum {
        Checksum {
            hash: hash.to_string(),
            begin: vec!["b1".to_string(), "b2".to_string()],
            end: vec!["e1".to_string()],
        }
    }

    #[test]
    fn test_insert_and_find_content() {
        let catalog = Catalog::open_in_memory().unwrap();
        let inserted = catalog.insert_content(100, &checksum("abc")).unwrap();
        assert!(inserted.id > 0);
        assert_eq!(inserted.hash_begin, "b1,b2");

        let found = catalog.find_content(100, "abc").unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &inserted));
        assert!(catalog.find_content(101, "abc").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_content_is_rejected() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_content(100, &checksum("abc")).unwrap();
        assert!(matches!(
            catalog.insert_content(100, &checksum("abc")),
            Err(Error::Database(_))
        ));
    }

    #[test]
    fn test_empty_content_is_invalid() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(matches!(
            catalog.insert_content(0, &checksum("abc")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_max_reference_inode_defaults_to_zero() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert_eq!(catalog.max_reference_inode().unwrap(), 0);
    }
}
