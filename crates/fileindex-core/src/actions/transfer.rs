use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Error, Result};

const WRITE_PROBE: &str = ".fileindex_write_probe";
const LINK_PROBE: &str = ".fileindex_link_probe";

/// `base` joined with a catalog directory (`/sub/dir/`) and a filename.
pub fn target_file(base: &Path, rel_dir: &str, filename: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in rel_dir.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path.push(filename);
    path
}

/// Nearest ancestor of `path` that exists, `path` itself included.
pub fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

fn create_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::transfer(parent, e))?;
    }
    Ok(())
}

// The owner can set times through a read-only handle on unix.
#[cfg(unix)]
fn open_for_times(path: &Path) -> io::Result<File> {
    File::open(path)
}

#[cfg(not(unix))]
fn open_for_times(path: &Path) -> io::Result<File> {
    File::options().write(true).open(path)
}

/// Copies `source` to `target`, carrying over the modification time.
/// Missing parent directories are created. Returns the bytes copied.
pub fn copy_file(source: &Path, target: &Path, replace: bool) -> Result<u64> {
    if !replace && target.exists() {
        return Err(Error::transfer(
            target,
            io::Error::new(io::ErrorKind::AlreadyExists, "target exists"),
        ));
    }
    create_parent(target)?;
    let modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .map_err(|e| Error::read(source, e))?;
    let bytes = fs::copy(source, target).map_err(|e| Error::transfer(target, e))?;
    open_for_times(target)
        .and_then(|f| f.set_modified(modified))
        .map_err(|e| Error::transfer(target, e))?;
    trace!("Copied {} to {} ({} bytes)", source.display(), target.display(), bytes);
    Ok(bytes)
}

/// Creates `link` as a hardlink to `existing`.
pub fn hard_link(existing: &Path, link: &Path) -> Result<()> {
    create_parent(link)?;
    fs::hard_link(existing, link).map_err(|e| Error::transfer(link, e))?;
    trace!("Linked {} to {}", link.display(), existing.display());
    Ok(())
}

pub fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| Error::transfer(path, e))
}

/// Checks that `dir` accepts new files and hardlinks between them.
pub fn check_target_supports_links(dir: &Path) -> Result<()> {
    let probe = dir.join(WRITE_PROBE);
    let link = dir.join(LINK_PROBE);
    let outcome = (|| -> io::Result<Option<&'static str>> {
        fs::write(&probe, b"probe")?;
        if fs::hard_link(&probe, &link).is_err() {
            return Ok(Some("does not support hardlinks"));
        }
        Ok(None)
    })();
    let _ = fs::remove_file(&link);
    let _ = fs::remove_file(&probe);
    match outcome {
        Ok(None) => {
            debug!("{} is writable and supports hardlinks", dir.display());
            Ok(())
        }
        Ok(Some(reason)) => Err(Error::Precondition(format!("{} {}", dir.display(), reason))),
        Err(e) => Err(Error::Precondition(format!(
            "{} is not writable: {}",
            dir.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_target_file() {
        let base = Path::new("/backup/2024");
        assert_eq!(target_file(base, "/", "a.txt"), base.join("a.txt"));
        assert_eq!(
            target_file(base, "/sub/dir/", "a.txt"),
            base.join("sub").join("dir").join("a.txt")
        );
    }

    #[test]
    fn test_copy_keeps_modified_time() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.txt");
        fs::write(&source, b"hello").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600 * 24);
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let target = dir.path().join("nested").join("target.txt");
        assert_eq!(copy_file(&source, &target, false).unwrap(), 5);
        let copied = fs::metadata(&target).unwrap().modified().unwrap();
        assert_eq!(copied, fs::metadata(&source).unwrap().modified().unwrap());

        let err = copy_file(&source, &target, false).unwrap_err();
        assert!(err.is_per_item());
        assert!(copy_file(&source, &target, true).is_ok());
    }

    #[test]
    fn test_hard_link_shares_identity() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        fs::write(&source, b"x").unwrap();
        let link = dir.path().join("sub").join("b.txt");
        hard_link(&source, &link).unwrap();
        assert!(platform::is_same_file(&source, &link).unwrap());
    }

    #[test]
    fn test_probe_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        check_target_supports_links(dir.path()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(check_target_supports_links(&dir.path().join("missing")).is_err());
    }
}
