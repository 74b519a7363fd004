//! Set operations over collections of located files.
//!
//! Elements are compared by their match key only. In strict mode (no multimap)
//! a key occurring twice within one input is an error, since the result would
//! depend on which duplicate happened to be picked.

use ahash::{AHashMap, AHashSet};

use super::key::KeyComposer;
use super::mode::MatchModes;
use crate::catalog::LocatedFile;
use crate::error::{Error, Result};

pub(crate) fn duplicate_key(modes: MatchModes, input: usize) -> Error {
    Error::DuplicateKey {
        mode: modes.to_string(),
        input,
    }
}

/// A match mode set together with the key composer used to evaluate it.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub modes: MatchModes,
    pub composer: KeyComposer,
}

impl Matcher {
    pub fn new(modes: impl Into<MatchModes>) -> Self {
        Self {
            modes: modes.into(),
            composer: KeyComposer::default(),
        }
    }

    pub fn with_composer(mut self, composer: KeyComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn key<T: AsRef<LocatedFile>>(&self, file: &T) -> String {
        self.composer.key(file.as_ref(), self.modes)
    }

    /// Pairs `(a, b)` with equal keys, in `b`'s order.
    ///
    /// With `multimap`, every element of `b` pairs with every matching element of `a`.
    pub fn intersect<T: AsRef<LocatedFile> + Clone>(
        &self,
        a: &[T],
        b: &[T],
        multimap: bool,
    ) -> Result<Vec<(T, T)>> {
        let mut result = Vec::with_capacity(a.len().min(b.len()) / 10);
        if multimap {
            let mut groups: AHashMap<String, Vec<&T>> = AHashMap::with_capacity(a.len());
            for item in a {
                groups.entry(self.key(item)).or_default().push(item);
            }
            for item in b {
                if let Some(matches) = groups.get(&self.key(item)) {
                    for m in matches {
                        result.push(((*m).clone(), item.clone()));
                    }
                }
            }
            return Ok(result);
        }

        let a_by_key = self.unique_index(a, 1)?;
        let mut b_keys = AHashSet::with_capacity(b.len());
        for item in b {
            let key = self.key(item);
            if let Some(m) = a_by_key.get(&key) {
                result.push(((*m).clone(), item.clone()));
            }
            if !b_keys.insert(key) {
                return Err(duplicate_key(self.modes, 2));
            }
        }
        Ok(result)
    }

    /// Elements of `a` without a key match in `b`, in `a`'s order.
    pub fn subtract<T: AsRef<LocatedFile> + Clone>(
        &self,
        a: &[T],
        b: &[T],
        multimap: bool,
    ) -> Result<Vec<T>> {
        let a_keys: Vec<String> = a.iter().map(|item| self.key(item)).collect();
        if !multimap {
            let mut seen = AHashSet::with_capacity(a.len());
            for key in &a_keys {
                if !seen.insert(key.as_str()) {
                    return Err(duplicate_key(self.modes, 1));
                }
            }
        }
        let b_keys = self.key_set(b, if multimap { None } else { Some(2) })?;
        Ok(a.iter()
            .zip(a_keys)
            .filter(|(_, key)| !b_keys.contains(key))
            .map(|(item, _)| item.clone())
            .collect())
    }

    /// Merge of `a` and `b`. On a key present in both, the element of `a` wins.
    ///
    /// Output is `a`'s surviving elements in order followed by `b`'s new keys in
    /// order. With `error_on_collision`, a key repeated within `a` or within `b`
    /// is an error.
    pub fn union<T: AsRef<LocatedFile> + Clone>(
        &self,
        a: &[T],
        b: &[T],
        error_on_collision: bool,
    ) -> Result<Vec<T>> {
        let mut keys = AHashSet::with_capacity(a.len() + b.len());
        let mut result = Vec::with_capacity(a.len() + b.len());
        for item in a {
            if keys.insert(self.key(item)) {
                result.push(item.clone());
            } else if error_on_collision {
                return Err(duplicate_key(self.modes, 1));
            }
        }
        let mut b_keys = AHashSet::with_capacity(b.len());
        for item in b {
            let key = self.key(item);
            if error_on_collision && !b_keys.insert(key.clone()) {
                return Err(duplicate_key(self.modes, 2));
            }
            if keys.insert(key) {
                result.push(item.clone());
            }
        }
        Ok(result)
    }

    /// First element per key, in input order.
    pub fn unique<T: AsRef<LocatedFile> + Clone>(
        &self,
        a: &[T],
        error_on_collision: bool,
    ) -> Result<Vec<T>> {
        let mut keys = AHashSet::with_capacity(a.len());
        let mut result = Vec::with_capacity(a.len());
        for item in a {
            if keys.insert(self.key(item)) {
                result.push(item.clone());
            } else if error_on_collision {
                return Err(duplicate_key(self.modes, 1));
            }
        }
        Ok(result)
    }

    /// Groups elements by key, keeping first-seen key order.
    pub fn group<T: AsRef<LocatedFile> + Clone>(&self, a: &[T]) -> Vec<(String, Vec<T>)> {
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(String, Vec<T>)> = Vec::new();
        for item in a {
            let key = self.key(item);
            match index.get(&key) {
                Some(&i) => groups[i].1.push(item.clone()),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![item.clone()]));
                }
            }
        }
        groups
    }

    fn unique_index<'a, T: AsRef<LocatedFile>>(
        &self,
        items: &'a [T],
        input: usize,
    ) -> Result<AHashMap<String, &'a T>> {
        let mut map = AHashMap::with_capacity(items.len());
        for item in items {
            if map.insert(self.key(item), item).is_some() {
                return Err(duplicate_key(self.modes, input));
            }
        }
        Ok(map)
    }

    pub(crate) fn key_set<T: AsRef<LocatedFile>>(
        &self,
        items: &[T],
        strict_input: Option<usize>,
    ) -> Result<AHashSet<String>> {
        let mut keys = AHashSet::with_capacity(items.len());
        for item in items {
            if !keys.insert(self.key(item)) {
                if let Some(input) = strict_input {
                    return Err(duplicate_key(self.modes, input));
                }
            }
        }
        Ok(keys)
    }
}

pub fn without_empty_files<T: AsRef<LocatedFile> + Clone>(items: &[T]) -> Vec<T> {
    items
        .iter()
        .filter(|item| !item.as_ref().is_empty_file())
        .cloned()
        .collect()
}

pub fn left<T: Clone>(pairs: &[(T, T)]) -> Vec<T> {
    pairs.iter().map(|(a, _)| a.clone()).collect()
}

pub fn right<T: Clone>(pairs: &[(T, T)]) -> Vec<T> {
    pairs.iter().map(|(_, b)| b.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::mode::MatchMode;
    use crate::matching::test_support::*;

    fn ids(files: &[LocatedFile]) -> Vec<i64> {
        files.iter().map(|f| f.id()).collect()
    }

    fn content_matcher() -> Matcher {
        Matcher::new(MatchMode::Hash | MatchMode::FileSize)
    }

    #[test]
    fn test_intersect_strict() {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", Some(("h2", 20))),
        ];
        let b = vec![
            located(3, "/", "c", Some(("h2", 20))),
            located(4, "/", "d", Some(("h3", 30))),
        ];
        let pairs = content_matcher().intersect(&a, &b, false).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.id(), 2);
        assert_eq!(pairs[0].1.id(), 3);
    }

    #[test]
    fn test_intersect_strict_duplicate_is_error() {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", Some(("h1", 10))),
        ];
        let b = vec![located(3, "/", "c", Some(("h1", 10)))];
        match content_matcher().intersect(&a, &b, false) {
            Err(Error::DuplicateKey { mode, input }) => {
                assert_eq!(mode, "HASH+FILE_SIZE");
                assert_eq!(input, 1);
            }
            other => panic!("expected duplicate key error, got {:?}", other.map(|p| p.len())),
        }
        assert!(matches!(
            content_matcher().intersect(&b, &a, false),
            Err(Error::DuplicateKey { input: 2, .. })
        ));
    }

    #[test]
    fn test_intersect_multimap_pairs_every_match() {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", Some(("h1", 10))),
        ];
        let b = vec![
            located(3, "/", "c", Some(("h1", 10))),
            located(4, "/", "d", Some(("h1", 10))),
        ];
        let pairs = content_matcher().intersect(&a, &b, true).unwrap();
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn test_subtract_preserves_order() {
        let a = vec![
            located(5, "/", "e", Some(("h5", 50))),
            located(1, "/", "a", Some(("h1", 10))),
            located(3, "/", "c", Some(("h3", 30))),
        ];
        let b = vec![located(9, "/", "x", Some(("h1", 10)))];
        let rest = content_matcher().subtract(&a, &b, false).unwrap();
        assert_eq!(ids(&rest), vec![5, 3]);
    }

    #[test]
    fn test_subtract_multimap_removes_groups() {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", Some(("h1", 10))),
            located(3, "/", "c", Some(("h3", 30))),
        ];
        let b = vec![
            located(4, "/", "x", Some(("h1", 10))),
            located(5, "/", "y", Some(("h1", 10))),
        ];
        let rest = content_matcher().subtract(&a, &b, true).unwrap();
        assert_eq!(ids(&rest), vec![3]);
        assert!(content_matcher().subtract(&a, &b, false).is_err());
    }

    #[test]
    fn test_intersect_plus_subtract_covers_a() {
        let a: Vec<_> = (0..20)
            .map(|i| located(i, "/", &format!("f{}", i), Some((&format!("h{}", i % 7)[..], i % 7 + 1))))
            .collect();
        let a = content_matcher().unique(&a, false).unwrap();
        let b: Vec<_> = (100..104)
            .map(|i| located(i, "/", "g", Some((&format!("h{}", i % 5)[..], i % 5 + 1))))
            .collect();
        let matched = content_matcher().intersect(&a, &b, false).unwrap();
        let rest = content_matcher().subtract(&a, &b, false).unwrap();
        assert_eq!(matched.len() + rest.len(), a.len());
    }

    #[test]
    fn test_union_prefers_a() {
        let a = vec![located(1, "/", "a", Some(("h1", 10)))];
        let b = vec![
            located(2, "/", "b", Some(("h1", 10))),
            located(3, "/", "c", Some(("h3", 30))),
        ];
        let merged = content_matcher().union(&a, &b, true).unwrap();
        assert_eq!(ids(&merged), vec![1, 3]);

        let reversed = content_matcher().union(&b, &a, true).unwrap();
        let mut forward: Vec<String> = merged.iter().map(|f| content_matcher().key(f)).collect();
        let mut backward: Vec<String> = reversed.iter().map(|f| content_matcher().key(f)).collect();
        forward.sort();
        backward.sort();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_union_error_on_collision_within_input() {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", Some(("h1", 10))),
        ];
        assert!(content_matcher().union(&a, &[], true).is_err());
        assert_eq!(content_matcher().union(&a, &[], false).unwrap().len(), 1);
    }

    #[test]
    fn test_unique_is_idempotent() {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", Some(("h1", 10))),
            located(3, "/", "c", Some(("h2", 10))),
        ];
        let once = content_matcher().unique(&a, false).unwrap();
        let twice = content_matcher().unique(&once, false).unwrap();
        assert_eq!(ids(&once), vec![1, 3]);
        assert_eq!(ids(&once), ids(&twice));
        assert!(content_matcher().unique(&a, true).is_err());
    }

    #[test]
    fn test_group_and_helpers() {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", None),
            located(3, "/", "c", Some(("h1", 10))),
        ];
        let groups = content_matcher().group(&a);
        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups[0].1), vec![1, 3]);
        assert_eq!(ids(&without_empty_files(&a)), vec![1, 3]);

        let pairs = vec![(a[0].clone(), a[2].clone())];
        assert_eq!(ids(&left(&pairs)), vec![1]);
        assert_eq!(ids(&right(&pairs)), vec![3]);
    }
}
