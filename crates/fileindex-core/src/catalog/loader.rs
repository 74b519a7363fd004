use rusqlite::params;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::models::{FileContent, FileLocation, FileMeta, FilePath, IndexRun, LocatedFile, ROOT_PATH_ID};
use super::paths::{normalize_dir, parent_dir};
use super::queries::*;
use super::sqlite::Catalog;
use crate::error::Result;
use crate::platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFailures {
    Include,
    Exclude,
    Only,
}

impl RunFailures {
    fn condition(self) -> &'static str {
        match self {
            RunFailures::Include => "1 = 1",
            RunFailures::Exclude => "r.failure_occurred = 0",
            RunFailures::Only => "r.failure_occurred = 1",
        }
    }
}

/// An index run together with the directory (relative to the run root) that
/// matched a lookup.
#[derive(Debug, Clone)]
pub struct RunPath {
    pub run: Arc<IndexRun>,
    pub path: Arc<FilePath>,
}

fn starts_with_case(haystack: &str, prefix: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.starts_with(prefix)
    } else {
        haystack.to_lowercase().starts_with(&prefix.to_lowercase())
    }
}

type LocationRow = (FileLocation, Option<FileContent>, Option<FileMeta>);

impl Catalog {
    // ── Index Run Lookup ─────────────────────────────────────────

    pub fn load_all_index_runs(&self, failures: RunFailures) -> Result<Vec<Arc<IndexRun>>> {
        let runs = {
            let conn = self.connection();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM index_run r WHERE {} ORDER BY r.run_date DESC, r.id DESC",
                RUN_COLUMNS,
                failures.condition()
            ))?;
            let runs = stmt
                .query_map([], |row| row_to_index_run(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            runs
        };
        Ok(runs.into_iter().map(|r| self.registry().intern(r)).collect())
    }

    /// Runs on the volume `prefix` whose root contains `path_without_prefix`,
    /// plus backup runs stored directly below it. Newest first.
    pub fn find_all_index_runs(
        &self,
        prefix: &str,
        path_without_prefix: &str,
        failures: RunFailures,
    ) -> Result<Vec<Arc<IndexRun>>> {
        let dir = normalize_dir(path_without_prefix);
        let runs = {
            let conn = self.connection();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM index_run r \
                 WHERE {} AND lower(r.path_prefix) = lower(?1) \
                 ORDER BY r.run_date DESC, r.id DESC",
                RUN_COLUMNS,
                failures.condition()
            ))?;
            let runs = stmt
                .query_map(params![prefix], |row| row_to_index_run(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            runs
        };
        Ok(runs
            .into_iter()
            .filter(|run| {
                starts_with_case(&dir, &run.path, run.medium_case_sensitive)
                    || (run.is_backup && parent_dir(&run.path).as_deref() == Some(dir.as_str()))
            })
            .map(|run| self.registry().intern(run))
            .collect())
    }

    fn run_has_path(&self, run_id: i64, rel_path: &str) -> Result<bool> {
        let found: i64 = self.connection().query_row(
            "SELECT EXISTS (SELECT 1 FROM file_location l \
             JOIN file_path p ON p.id = l.file_path_id \
             WHERE l.index_run_id = ?1 AND instr(p.path, ?2) = 1)",
            params![run_id, rel_path],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    }

    fn find_run_paths(
        &self,
        dir: &Path,
        failures: RunFailures,
        single: bool,
        from_run_id: Option<i64>,
    ) -> Result<Vec<RunPath>> {
        let prefix = platform::path_prefix(dir);
        let without_prefix = platform::path_without_prefix(dir);
        let mut result = Vec::new();
        for run in self.find_all_index_runs(&prefix, &without_prefix, failures)? {
            if from_run_id.map_or(false, |from| run.id < from) {
                continue;
            }
            let rel_path = if starts_with_case(&without_prefix, &run.path, run.medium_case_sensitive) {
                normalize_dir(without_prefix.get(run.path.len()..).unwrap_or(""))
            } else {
                "/".to_string()
            };
            let Some(path) = self.find_file_path(&rel_path)? else {
                continue;
            };
            if path.id == ROOT_PATH_ID || self.run_has_path(run.id, &path.path)? {
                result.push(RunPath { run, path });
                if single {
                    break;
                }
            }
        }
        debug!(
            "Found {} index runs for path {} (single result requested: {})",
            result.len(),
            dir.display(),
            single
        );
        Ok(result)
    }

    /// The newest run containing `dir`.
    pub fn newest_run_path(&self, dir: &Path, exclude_failures: bool) -> Result<Option<RunPath>> {
        let failures = if exclude_failures {
            RunFailures::Exclude
        } else {
            RunFailures::Include
        };
        Ok(self
            .find_run_paths(dir, failures, true, None)?
            .into_iter()
            .next())
    }

    pub fn run_paths(&self, dir: &Path, exclude_failures: bool) -> Result<Vec<RunPath>> {
        let failures = if exclude_failures {
            RunFailures::Exclude
        } else {
            RunFailures::Include
        };
        self.find_run_paths(dir, failures, false, None)
    }

    /// Failed runs containing `dir`, restricted to ids >= `from_run_id`. Newest first.
    pub fn failed_run_paths(&self, dir: &Path, from_run_id: Option<i64>) -> Result<Vec<RunPath>> {
        self.find_run_paths(dir, RunFailures::Only, false, from_run_id)
    }

    // ── Located Files ────────────────────────────────────────────

    fn query_location_rows(
        &self,
        run_id: i64,
        rel_path: &str,
        include_archives: bool,
    ) -> Result<Vec<LocationRow>> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {}, {}, {} FROM file_location l \
             LEFT JOIN file_content c ON c.id = l.file_content_id \
             LEFT JOIN file_meta m ON m.file_content_id = c.id \
             JOIN file_path p ON p.id = l.file_path_id \
             WHERE l.index_run_id = ?1 AND instr(p.path, ?2) = 1 AND (?3 OR l.in_archive = 0) \
             ORDER BY l.id",
            LOCATION_COLUMNS, CONTENT_COLUMNS, META_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![run_id, rel_path, include_archives], |row| {
                Ok((
                    row_to_location(row, 0)?,
                    row_to_content(row, 11)?,
                    row_to_meta(row, 16)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All locations of `run_path.run` below `run_path.path`, with their entities attached.
    pub fn load_located_files(
        &self,
        run_path: &RunPath,
        include_archives: bool,
    ) -> Result<Vec<LocatedFile>> {
        let rows = self.query_location_rows(run_path.run.id, &run_path.path.path, include_archives)?;
        let mut files = Vec::with_capacity(rows.len());
        for (location, content, meta) in rows {
            let path = self.get_file_path(location.file_path_id)?;
            files.push(LocatedFile {
                location: self.registry().intern(location),
                content: content.map(|c| self.registry().intern(c)),
                meta: meta.map(|m| self.registry().intern(m)),
                path,
                run: run_path.run.clone(),
            });
        }
        debug!(
            "{} indexed files loaded from {}{}",
            files.len(),
            run_path.run.root(),
            run_path.path.path.trim_start_matches('/')
        );
        Ok(files)
    }

    /// Files of the newest run containing `dir`; empty when `dir` was never indexed.
    pub fn load_located_files_for_dir(
        &self,
        dir: &Path,
        exclude_failures: bool,
        include_archives: bool,
    ) -> Result<Vec<LocatedFile>> {
        match self.newest_run_path(dir, exclude_failures)? {
            Some(run_path) => self.load_located_files(&run_path, include_archives),
            None => Ok(Vec::new()),
        }
    }

    pub fn load_run_files(&self, run_id: i64, include_archives: bool) -> Result<Vec<LocatedFile>> {
        let run_path = RunPath {
            run: self.get_index_run(run_id)?,
            path: self.get_file_path(ROOT_PATH_ID)?,
        };
        self.load_located_files(&run_path, include_archives)
    }
}
