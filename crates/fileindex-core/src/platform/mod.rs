#[cfg(target_os = "windows")]
pub mod windows;

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use sysinfo::Disks;

use crate::catalog::normalize_dir;

#[cfg(target_os = "windows")]
pub fn get_drive_letter(path: &Path) -> Option<OsString> {
    windows::get_drive_letter(path)
}

#[cfg(not(target_os = "windows"))]
pub fn get_drive_letter(_path: &Path) -> Option<OsString> {
    None
}

pub fn get_path_without_drive_letter(path: &Path) -> PathBuf {
    let without_drive = path
        .components()
        .skip_while(|comp| matches!(comp, Component::Prefix(_)));

    let mut result_path = PathBuf::new();
    for component in without_drive {
        result_path.push(component.as_os_str());
    }
    result_path
}

/// Resolves `path` to an absolute path, following links when it exists.
pub fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Volume prefix as stored in the catalog: `C:` on Windows, empty elsewhere.
pub fn path_prefix(path: &Path) -> String {
    get_drive_letter(&absolute(path))
        .map(|letter| format!("{}:", letter.to_string_lossy().to_uppercase()))
        .unwrap_or_default()
}

/// Absolute directory without its volume prefix, normalized to `/a/b/`.
pub fn path_without_prefix(path: &Path) -> String {
    let stripped = get_path_without_drive_letter(&absolute(path));
    normalize_dir(&stripped.to_string_lossy())
}

/// `(volume, file index)` pair identifying the file behind `path`. Hardlinks share it.
#[cfg(unix)]
pub fn file_identity(path: &Path) -> io::Result<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(path)?;
    Ok((meta.dev(), meta.ino()))
}

#[cfg(windows)]
pub fn file_identity(path: &Path) -> io::Result<(u64, u64)> {
    windows::get_win_file_id(path)
}

pub fn is_same_file(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(file_identity(a)? == file_identity(b)?)
}

/// Drops the `\\?\` marker `canonicalize` puts in front of Windows paths, so
/// they compare against plain mount points.
fn without_verbatim_prefix(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix(r"\\?\")) {
        Some(stripped) => PathBuf::from(stripped),
        None => path,
    }
}

/// `(total, usable)` bytes of the volume holding `path`: the mounted disk with
/// the longest mount point that `path` lies below.
pub fn disk_space(path: &Path) -> io::Result<(u64, u64)> {
    let target = without_verbatim_prefix(absolute(path));
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| {
            target.starts_with(without_verbatim_prefix(disk.mount_point().to_path_buf()))
        })
        .max_by_key(|disk| disk.mount_point().components().count())
        .map(|disk| (disk.total_space(), disk.available_space()))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no mounted volume holds {}", target.display()),
            )
        })
}

#[cfg(unix)]
pub fn is_hidden(path: &Path, _meta: &fs::Metadata) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
pub fn is_hidden(_path: &Path, meta: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

fn swap_case(name: &str) -> Option<String> {
    let swapped: String = name
        .chars()
        .map(|c| {
            if c.is_lowercase() {
                c.to_uppercase().next().unwrap_or(c)
            } else {
                c.to_lowercase().next().unwrap_or(c)
            }
        })
        .collect();
    (swapped != name).then_some(swapped)
}

/// Probes whether the file system holding `dir` distinguishes case, by looking
/// up a case-swapped name of `dir` or one of its entries.
pub fn detect_case_sensitive(dir: &Path) -> bool {
    let dir = absolute(dir);
    let mut candidates: Vec<PathBuf> = vec![dir.clone()];
    if let Ok(entries) = fs::read_dir(&dir) {
        candidates.extend(entries.flatten().take(16).map(|e| e.path()));
    }
    for candidate in candidates {
        let Some(name) = candidate.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some(swapped) = swap_case(&name) else {
            continue;
        };
        let probe = candidate.with_file_name(swapped);
        return match (probe.exists(), is_same_file(&candidate, &probe)) {
            (true, Ok(true)) => false,
            _ => true,
        };
    }
    !cfg!(any(target_os = "windows", target_os = "macos"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_path_without_prefix_is_normalized() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("a").join("b");
        fs::create_dir_all(&sub).unwrap();
        let normalized = path_without_prefix(&sub);
        assert!(normalized.starts_with('/'));
        assert!(normalized.ends_with("/a/b/"));
        assert!(!normalized.contains('\\'));
    }

    #[test]
    fn test_hardlinks_share_identity() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");
        fs::write(&a, b"same").unwrap();
        fs::hard_link(&a, &b).unwrap();
        fs::write(&c, b"same").unwrap();
        assert!(is_same_file(&a, &b).unwrap());
        assert!(!is_same_file(&a, &c).unwrap());
    }

    #[test]
    fn test_disk_space_reports_volume() {
        let dir = tempdir().unwrap();
        let (total, usable) = disk_space(dir.path()).unwrap();
        assert!(total > 0);
        assert!(usable <= total);
    }

    #[test]
    fn test_disk_space_of_missing_path_uses_enclosing_volume() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("not").join("created");
        let (total, _) = disk_space(&missing).unwrap();
        assert_eq!(total, disk_space(dir.path()).unwrap().0);
    }

    #[test]
    fn test_without_verbatim_prefix() {
        assert_eq!(
            without_verbatim_prefix(PathBuf::from(r"\\?\C:\data")),
            PathBuf::from(r"C:\data")
        );
        assert_eq!(
            without_verbatim_prefix(PathBuf::from("/mnt/data")),
            PathBuf::from("/mnt/data")
        );
    }

    #[test]
    fn test_swap_case() {
        assert_eq!(swap_case("aB").as_deref(), Some("Ab"));
        assert_eq!(swap_case("123"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_dot_files_are_hidden() {
        let dir = tempdir().unwrap();
        let hidden = dir.path().join(".secret");
        fs::write(&hidden, b"x").unwrap();
        let meta = fs::metadata(&hidden).unwrap();
        assert!(is_hidden(&hidden, &meta));
        assert!(!is_hidden(&dir.path().join("visible"), &meta));
    }
}
