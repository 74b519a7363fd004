use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, IndexRun, LocatedFile};
use crate::checksum::{self, join_chunks};
use crate::config::AppConfig;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::platform;
use crate::scanner::walk::system_time_millis;

/// A mismatch between an indexed file and the file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    Missing {
        path: PathBuf,
    },
    SizeChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    ModifiedChanged {
        path: PathBuf,
        expected: i64,
        actual: i64,
    },
    ContentChanged {
        path: PathBuf,
    },
    Unreadable {
        path: PathBuf,
        message: String,
    },
}

impl Difference {
    pub fn path(&self) -> &Path {
        match self {
            Difference::Missing { path }
            | Difference::SizeChanged { path, .. }
            | Difference::ModifiedChanged { path, .. }
            | Difference::ContentChanged { path }
            | Difference::Unreadable { path, .. } => path,
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difference::Missing { path } => write!(f, "{}: missing", path.display()),
            Difference::SizeChanged {
                path,
                expected,
                actual,
            } => write!(
                f,
                "{}: size {} instead of {}",
                path.display(),
                actual,
                expected
            ),
            Difference::ModifiedChanged {
                path,
                expected,
                actual,
            } => write!(
                f,
                "{}: modified {} instead of {}",
                path.display(),
                actual,
                expected
            ),
            Difference::ContentChanged { path } => write!(f, "{}: content changed", path.display()),
            Difference::Unreadable { path, message } => {
                write!(f, "{}: unreadable ({})", path.display(), message)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// None when the directory was never indexed.
    pub index_run: Option<Arc<IndexRun>>,
    pub checked: usize,
    /// Sorted by path.
    pub differences: Vec<Difference>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.differences.is_empty()
    }
}

/// Compares the newest run covering `dir` with the files on disk. Files inside
/// archives are skipped.
pub fn verify_dir(
    catalog: &Catalog,
    config: &AppConfig,
    dir: &Path,
    exclude_failures: bool,
    ctx: &RunContext,
) -> Result<VerifyReport> {
    let dir = platform::absolute(dir);
    let Some(run_path) = catalog.newest_run_path(&dir, exclude_failures)? else {
        info!("{} was never indexed; nothing to verify", dir.display());
        return Ok(VerifyReport::default());
    };
    let files = catalog.load_located_files(&run_path, false)?;

    ctx.stats.reset();
    ctx.stats.total_files.store(files.len() as u64, Ordering::Relaxed);
    ctx.stats.total_bytes.store(
        files.iter().map(|f| f.size() as u64).sum(),
        Ordering::Relaxed,
    );
    debug!(
        "Verifying {} files of index run {}",
        files.len(),
        run_path.run.id
    );

    let mut differences: Vec<Difference> = files
        .par_iter()
        .filter_map(|file| {
            if ctx.cancel.is_cancelled() {
                return None;
            }
            let difference = check_file(file, config, ctx);
            ctx.stats.add_processed(file.size() as u64);
            difference
        })
        .collect();
    ctx.check_cancelled()?;
    differences.sort_by(|a, b| a.path().cmp(b.path()));

    for difference in &differences {
        warn!("{}", difference);
    }
    info!(
        "Verified {} files of {}: {} differences",
        files.len(),
        dir.display(),
        differences.len()
    );
    Ok(VerifyReport {
        index_run: Some(run_path.run),
        checked: files.len(),
        differences,
    })
}

fn check_file(file: &LocatedFile, config: &AppConfig, ctx: &RunContext) -> Option<Difference> {
    let path = file.file_path();
    let meta = match fs::metadata(&path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return Some(Difference::Missing { path }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Some(Difference::Missing { path }),
        Err(e) => {
            return Some(Difference::Unreadable {
                path,
                message: e.to_string(),
            })
        }
    };

    let expected_size = file.size() as u64;
    if meta.len() != expected_size {
        return Some(Difference::SizeChanged {
            path,
            expected: expected_size,
            actual: meta.len(),
        });
    }
    let modified = system_time_millis(meta.modified()).unwrap_or(0);
    if modified != file.modified() {
        return Some(Difference::ModifiedChanged {
            path,
            expected: file.modified(),
            actual: modified,
        });
    }
    let content = file.content.as_ref()?;

    let fast = config.fast_mode && !config.always_check_hash(file.filename());
    if fast && config.ignore_hash_in_fast_mode {
        return None;
    }
    let matches = if fast {
        checksum::leading_chunks_of_file(&path, expected_size, &ctx.cancel)
            .map(|chunks| content.hash_begin.starts_with(&join_chunks(&chunks)))
    } else {
        checksum::checksum_file(&path, expected_size, file.run.only_read_first_mb, &ctx.cancel)
            .map(|checksum| checksum.hash == content.hash)
    };
    match matches {
        Ok(true) => None,
        Ok(false) => Some(Difference::ContentChanged { path }),
        Err(Error::Cancelled) => None,
        Err(e) => Some(Difference::Unreadable {
            path,
            message: e.to_string(),
        }),
    }
}
