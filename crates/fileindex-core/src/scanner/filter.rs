use ahash::AHashSet;
use glob::{MatchOptions, Pattern};
use parking_lot::Mutex;
use tracing::error;

use crate::catalog::normalize_dir;

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

#[derive(Debug)]
enum Rule {
    /// Substring of the `/`-delimited subject.
    Contains(String),
    /// `//`-prefixed entry: the prefix-less directory path starts with it.
    Absolute(String),
    Glob(Pattern),
}

#[derive(Debug)]
struct Entry {
    raw: String,
    rule: Rule,
}

fn compile(raw: &str, case_sensitive: bool, absolute_allowed: bool) -> Option<Entry> {
    let fold = |s: &str| {
        if case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    };
    let rule = if is_glob(raw) {
        match Pattern::new(raw) {
            Ok(pattern) => Rule::Glob(pattern),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", raw, e);
                return None;
            }
        }
    } else if absolute_allowed && raw.starts_with("//") {
        Rule::Absolute(fold(&raw[1..]))
    } else {
        Rule::Contains(fold(raw))
    };
    Some(Entry {
        raw: raw.to_string(),
        rule,
    })
}

/// Excluded filenames and directories for one run. Remembers which entries
/// matched anything so unused ones can be reported afterwards.
#[derive(Debug)]
pub struct ExcludeFilter {
    files: Vec<Entry>,
    paths: Vec<Entry>,
    case_sensitive: bool,
    matched: Mutex<AHashSet<String>>,
}

impl ExcludeFilter {
    pub fn new(excluded_files: &[String], excluded_paths: &[String], case_sensitive: bool) -> Self {
        Self {
            files: excluded_files
                .iter()
                .filter_map(|raw| compile(raw, case_sensitive, false))
                .collect(),
            paths: excluded_paths
                .iter()
                .filter_map(|raw| compile(raw, case_sensitive, true))
                .collect(),
            case_sensitive,
            matched: Mutex::new(AHashSet::new()),
        }
    }

    fn options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: self.case_sensitive,
            ..MatchOptions::new()
        }
    }

    fn fold(&self, s: &str) -> String {
        if self.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }

    fn record(&self, entry: &Entry) {
        self.matched.lock().insert(entry.raw.clone());
    }

    /// True when `filename` is excluded.
    pub fn excludes_file(&self, filename: &str) -> bool {
        let subject = self.fold(&format!("/{}/", filename));
        for entry in &self.files {
            let hit = match &entry.rule {
                Rule::Contains(needle) => subject.contains(needle.as_str()),
                Rule::Glob(pattern) => pattern.matches_with(filename, self.options()),
                Rule::Absolute(_) => false,
            };
            if hit {
                self.record(entry);
                return true;
            }
        }
        false
    }

    /// True when the directory `dir` (prefix-less, any separator) is excluded.
    pub fn excludes_dir(&self, dir: &str) -> bool {
        let normalized = normalize_dir(dir);
        let subject = self.fold(&normalized);
        for entry in &self.paths {
            let hit = match &entry.rule {
                Rule::Contains(needle) => subject.contains(needle.as_str()),
                Rule::Absolute(prefix) => subject.starts_with(prefix.as_str()),
                Rule::Glob(pattern) => pattern.matches_with(&normalized, self.options()),
            };
            if hit {
                self.record(entry);
                return true;
            }
        }
        false
    }

    pub fn matched_entries(&self) -> Vec<String> {
        let mut matched: Vec<String> = self.matched.lock().iter().cloned().collect();
        matched.sort();
        matched
    }

    /// Configured entries that never excluded anything.
    pub fn unmatched_entries(&self) -> Vec<String> {
        let matched = self.matched.lock();
        self.files
            .iter()
            .chain(self.paths.iter())
            .filter(|e| !matched.contains(&e.raw))
            .map(|e| e.raw.clone())
            .collect()
    }
}

/// Restricts a walk to the given directories relative to the run root.
/// An empty list includes everything.
#[derive(Debug, Clone, Default)]
pub struct IncludeFilter {
    paths: Vec<String>,
    case_sensitive: bool,
}

impl IncludeFilter {
    pub fn new(include_paths: &[String], case_sensitive: bool) -> Self {
        let fold = |s: String| if case_sensitive { s } else { s.to_lowercase() };
        Self {
            paths: include_paths.iter().map(|p| fold(normalize_dir(p))).collect(),
            case_sensitive,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn fold(&self, rel_dir: &str) -> String {
        let dir = normalize_dir(rel_dir);
        if self.case_sensitive {
            dir
        } else {
            dir.to_lowercase()
        }
    }

    /// Whether the walk must descend into `rel_dir` to reach an included directory.
    pub fn descends(&self, rel_dir: &str) -> bool {
        let dir = self.fold(rel_dir);
        self.paths.is_empty()
            || self
                .paths
                .iter()
                .any(|p| dir.starts_with(p.as_str()) || p.starts_with(dir.as_str()))
    }

    /// Whether files directly in `rel_dir` are indexed.
    pub fn includes(&self, rel_dir: &str) -> bool {
        let dir = self.fold(rel_dir);
        self.paths.is_empty() || self.paths.iter().any(|p| dir.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_substring_exclusions() {
        let filter = ExcludeFilter::new(
            &strings(&["/thumbs.db/", ".tmp/", "/unused/"]),
            &strings(&["/$RECYCLE.BIN/"]),
            true,
        );
        assert!(filter.excludes_file("thumbs.db"));
        assert!(!filter.excludes_file("my_thumbs.db"));
        assert!(filter.excludes_file("scratch.tmp"));
        assert!(filter.excludes_dir("/d/$RECYCLE.BIN/x"));
        assert!(!filter.excludes_dir("/d/recycle/"));
        assert_eq!(
            filter.matched_entries(),
            strings(&[".tmp/", "/$RECYCLE.BIN/", "/thumbs.db/"])
        );
        assert_eq!(filter.unmatched_entries(), strings(&["/unused/"]));
    }

    #[test]
    fn test_absolute_path_exclusion() {
        let filter = ExcludeFilter::new(&[], &strings(&["//data/cache/"]), true);
        assert!(filter.excludes_dir("/data/cache/"));
        assert!(filter.excludes_dir("/data/cache/deep/"));
        assert!(!filter.excludes_dir("/other/data/cache/"));
    }

    #[test]
    fn test_glob_exclusion() {
        let filter = ExcludeFilter::new(&strings(&["*.bak"]), &strings(&["*/node_modules/*"]), true);
        assert!(filter.excludes_file("old.bak"));
        assert!(!filter.excludes_file("old.bak.txt"));
        assert!(filter.excludes_dir("/src/app/node_modules/lib"));
        assert!(!filter.excludes_dir("/src/app/"));
    }

    #[test]
    fn test_case_insensitive_media() {
        let filter = ExcludeFilter::new(&strings(&["/Thumbs.db/"]), &strings(&["/Temp/"]), false);
        assert!(filter.excludes_file("THUMBS.DB"));
        assert!(filter.excludes_dir("/x/temp/"));
        let strict = ExcludeFilter::new(&strings(&["/Thumbs.db/"]), &[], true);
        assert!(!strict.excludes_file("THUMBS.DB"));
    }

    #[test]
    fn test_include_paths() {
        let filter = IncludeFilter::new(&strings(&["/photos/2020"]), true);
        assert!(filter.descends("/"));
        assert!(filter.descends("/photos/"));
        assert!(!filter.includes("/photos/"));
        assert!(filter.includes("/photos/2020/"));
        assert!(filter.includes("/photos/2020/summer/"));
        assert!(!filter.descends("/music/"));
        assert!(IncludeFilter::default().includes("/anything/"));
    }
}
