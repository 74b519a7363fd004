use std::fmt::Write as _;

use super::mode::{MatchMode, MatchModes};
use crate::catalog::{normalize_dir, LocatedFile};

const HASH_BEGIN_CHUNKS: usize = 11;

/// Builds match keys. Each selected field is written in a fixed order as
/// `<tag><byte length>:<value>`, an absent value as `<tag>-`, so distinct
/// field values can never produce the same key.
#[derive(Debug, Clone, Default)]
pub struct KeyComposer {
    relative_path_roots: Vec<String>,
}

fn push_field(key: &mut String, tag: char, value: Option<&str>) {
    key.push(tag);
    match value {
        Some(value) => {
            let _ = write!(key, "{}:{}", value.len(), value);
        }
        None => key.push('-'),
    }
}

fn case_rule(path: String, case_sensitive: bool) -> String {
    if case_sensitive {
        path
    } else {
        path.to_lowercase()
    }
}

/// Case-insensitive `strip_prefix`. Compares char by char, so the remainder is
/// cut from `path` itself even where lowercasing changes byte lengths.
fn strip_prefix_ignore_case<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let mut chars = path.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    let offset = chars.next().map_or(path.len(), |(i, _)| i);
    Some(&path[offset..])
}

impl KeyComposer {
    pub fn new(relative_path_roots: &[String]) -> Self {
        Self {
            relative_path_roots: relative_path_roots
                .iter()
                .map(|root| normalize_dir(root))
                .collect(),
        }
    }

    fn rel_path(&self, file: &LocatedFile) -> String {
        let case_sensitive = file.run.medium_case_sensitive;
        let path = file.full_path_excl_prefix();
        for root in &self.relative_path_roots {
            let rest = if case_sensitive {
                path.strip_prefix(root.as_str())
            } else {
                strip_prefix_ignore_case(&path, root)
            };
            if let Some(rest) = rest {
                // keep the leading separator
                return format!("/{}", rest);
            }
        }
        path
    }

    pub fn key(&self, file: &LocatedFile, modes: MatchModes) -> String {
        let mut key = String::with_capacity(96);
        let content = file.content.as_deref();
        let case_sensitive = file.run.medium_case_sensitive;

        if modes.contains(MatchMode::FileSize) {
            push_field(&mut key, 's', Some(&file.size().to_string()));
        }
        if modes.contains(MatchMode::Hash) {
            push_field(&mut key, 'h', content.map(|c| c.hash.as_str()));
        }
        if modes.contains(MatchMode::HashBegin1Mb) {
            let begin = content.map(|c| {
                c.hash_begin
                    .split(',')
                    .take(HASH_BEGIN_CHUNKS)
                    .collect::<Vec<_>>()
                    .join(",")
            });
            push_field(&mut key, 'b', begin.as_deref());
        }
        // Empty files have no content. Without the filename they would all share one key.
        if content.is_none()
            && !modes.contains(MatchMode::Filename)
            && (modes.contains(MatchMode::FileSize)
                || modes.contains(MatchMode::Hash)
                || modes.contains(MatchMode::HashBegin1Mb))
        {
            push_field(&mut key, 'e', Some(file.filename()));
        }
        if modes.contains(MatchMode::FullPath) {
            push_field(&mut key, 'p', Some(&case_rule(file.full_path(), case_sensitive)));
        }
        if modes.contains(MatchMode::FullPathExclPrefix) {
            push_field(
                &mut key,
                'x',
                Some(&case_rule(file.full_path_excl_prefix(), case_sensitive)),
            );
        }
        if modes.contains(MatchMode::RelPath) {
            push_field(&mut key, 'r', Some(&case_rule(self.rel_path(file), case_sensitive)));
        }
        if modes.contains(MatchMode::RelPath2) {
            push_field(
                &mut key,
                'q',
                Some(&case_rule(file.rel_path().to_string(), case_sensitive)),
            );
        }
        if modes.contains(MatchMode::Filename) {
            push_field(&mut key, 'f', Some(file.filename()));
        }
        if modes.contains(MatchMode::ModifiedMillis) {
            push_field(&mut key, 'm', Some(&file.location.modified.to_string()));
        }
        if modes.contains(MatchMode::ModifiedSec) {
            push_field(
                &mut key,
                'n',
                Some(&file.location.modified.div_euclid(1000).to_string()),
            );
        }
        if modes.contains(MatchMode::Created) {
            push_field(&mut key, 'c', Some(&file.location.created.to_string()));
        }
        if modes.contains(MatchMode::RefInode) {
            let inode = file.location.reference_inode.map(|i| i.to_string());
            push_field(&mut key, 'i', inode.as_deref());
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::test_support::*;

    #[test]
    fn test_equal_attributes_equal_keys() {
        let composer = KeyComposer::default();
        let modes = MatchMode::Hash | MatchMode::FileSize;
        let a = located(1, "/a/", "x.txt", Some(("h1", 10)));
        let b = located(2, "/b/", "y.txt", Some(("h1", 10)));
        let c = located(3, "/b/", "y.txt", Some(("h2", 10)));
        assert_eq!(composer.key(&a, modes), composer.key(&b, modes));
        assert_ne!(composer.key(&a, modes), composer.key(&c, modes));
    }

    #[test]
    fn test_fields_cannot_merge() {
        let composer = KeyComposer::default();
        let modes = MatchMode::RelPath2 | MatchMode::Filename;
        let a = located(1, "/ab/", "c", None);
        let b = located(2, "/a/", "bc", None);
        assert_ne!(composer.key(&a, modes), composer.key(&b, modes));
    }

    #[test]
    fn test_empty_files_keyed_by_filename() {
        let composer = KeyComposer::default();
        let modes = MatchMode::Hash | MatchMode::FileSize;
        let a = located(1, "/a/", "one", None);
        let b = located(2, "/a/", "two", None);
        assert_ne!(composer.key(&a, modes), composer.key(&b, modes));
    }

    #[test]
    fn test_case_insensitive_medium_lowercases_paths() {
        let composer = KeyComposer::default();
        let modes = MatchMode::RelPath2 | MatchMode::Filename;
        let mut a = located(1, "/Photos/", "a.jpg", None);
        let mut b = located(2, "/photos/", "a.jpg", None);
        set_case_sensitive(&mut a, false);
        set_case_sensitive(&mut b, false);
        assert_eq!(composer.key(&a, modes), composer.key(&b, modes));
        set_case_sensitive(&mut a, true);
        set_case_sensitive(&mut b, true);
        assert_ne!(composer.key(&a, modes), composer.key(&b, modes));
    }

    #[test]
    fn test_modified_sec_ignores_millis() {
        let composer = KeyComposer::default();
        let mut a = located(1, "/", "a", None);
        let mut b = located(2, "/", "a", None);
        set_modified(&mut a, 1_700_000_000_123);
        set_modified(&mut b, 1_700_000_000_999);
        assert_eq!(
            composer.key(&a, MatchMode::ModifiedSec.into()),
            composer.key(&b, MatchMode::ModifiedSec.into())
        );
        assert_ne!(
            composer.key(&a, MatchMode::ModifiedMillis.into()),
            composer.key(&b, MatchMode::ModifiedMillis.into())
        );
    }

    #[test]
    fn test_rel_path_strips_configured_root() {
        let composer = KeyComposer::new(&["/data/".to_string()]);
        let a = located(1, "/photos/", "a", None);
        // run root of test files is /data/
        assert_eq!(
            composer.key(&a, MatchMode::RelPath.into()),
            format!("r{}:{}", "/photos/".len(), "/photos/")
        );
    }

    #[test]
    fn test_rel_path_root_differing_in_case_and_byte_length() {
        // KELVIN SIGN lowercases to a one byte 'k'
        let composer = KeyComposer::new(&["/data/kelvin/".to_string()]);
        let mut a = located(1, "/\u{212A}elvin/raw/", "a", None);
        set_case_sensitive(&mut a, false);
        assert_eq!(composer.rel_path(&a), "/raw/");
        set_case_sensitive(&mut a, true);
        assert_eq!(composer.rel_path(&a), "/data/\u{212A}elvin/raw/");
    }

    #[test]
    fn test_strip_prefix_ignore_case() {
        assert_eq!(strip_prefix_ignore_case("/Data/x", "/data/"), Some("x"));
        assert_eq!(strip_prefix_ignore_case("/\u{130}/y", "/i\u{307}/"), None);
        assert_eq!(strip_prefix_ignore_case("/\u{130}/y", "/\u{130}/"), Some("y"));
        assert_eq!(strip_prefix_ignore_case("/da", "/data/"), None);
    }
}
