//! Streaming counterparts of the set operations.
//!
//! Only one side is materialized: `a` for intersect, the keys of `b` for
//! subtract, and the seen keys for union. The other side is consumed lazily
//! and duplicate detection happens as elements pass through, so a strict-mode
//! error may surface after some results were already yielded.

use ahash::{AHashMap, AHashSet};

use super::ops::{duplicate_key, Matcher};
use crate::catalog::LocatedFile;
use crate::error::Result;

impl Matcher {
    pub fn intersect_iter<'m, T, I>(
        &'m self,
        a: &[T],
        b: I,
        multimap: bool,
    ) -> Result<impl Iterator<Item = Result<(T, T)>> + 'm>
    where
        T: AsRef<LocatedFile> + Clone + 'm,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'm,
    {
        let mut groups: AHashMap<String, Vec<T>> = AHashMap::with_capacity(a.len());
        for item in a {
            let entry = groups.entry(self.key(item)).or_default();
            if !multimap && !entry.is_empty() {
                return Err(duplicate_key(self.modes, 1));
            }
            entry.push(item.clone());
        }
        let mut seen_b = AHashSet::new();
        let mut failed = false;
        let iter = b.into_iter().flat_map(move |item| {
            if failed {
                return Vec::new();
            }
            let key = self.key(&item);
            if !multimap && !seen_b.insert(key.clone()) {
                failed = true;
                return vec![Err(duplicate_key(self.modes, 2))];
            }
            match groups.get(&key) {
                Some(matches) => matches
                    .iter()
                    .map(|m| Ok((m.clone(), item.clone())))
                    .collect(),
                None => Vec::new(),
            }
        });
        Ok(iter)
    }

    pub fn subtract_iter<'m, T, I>(
        &'m self,
        a: I,
        b: &[T],
        multimap: bool,
    ) -> Result<impl Iterator<Item = Result<T>> + 'm>
    where
        T: AsRef<LocatedFile> + Clone + 'm,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'm,
    {
        let b_keys = self.key_set(b, if multimap { None } else { Some(2) })?;
        let mut seen_a = AHashSet::new();
        let mut failed = false;
        let iter = a.into_iter().filter_map(move |item| {
            if failed {
                return None;
            }
            let key = self.key(&item);
            if !multimap && !seen_a.insert(key.clone()) {
                failed = true;
                return Some(Err(duplicate_key(self.modes, 1)));
            }
            (!b_keys.contains(&key)).then_some(Ok(item))
        });
        Ok(iter)
    }

    pub fn union_iter<'m, T, I, J>(
        &'m self,
        a: I,
        b: J,
        error_on_collision: bool,
    ) -> impl Iterator<Item = Result<T>> + 'm
    where
        T: AsRef<LocatedFile> + Clone + 'm,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'm,
        J: IntoIterator<Item = T>,
        J::IntoIter: 'm,
    {
        let mut keys = AHashSet::new();
        let mut b_keys = AHashSet::new();
        let mut failed = false;
        a.into_iter()
            .map(|item| (1usize, item))
            .chain(b.into_iter().map(|item| (2usize, item)))
            .filter_map(move |(input, item)| {
                if failed {
                    return None;
                }
                let key = self.key(&item);
                if input == 2 && error_on_collision && !b_keys.insert(key.clone()) {
                    failed = true;
                    return Some(Err(duplicate_key(self.modes, 2)));
                }
                if keys.insert(key) {
                    Some(Ok(item))
                } else if input == 1 && error_on_collision {
                    failed = true;
                    Some(Err(duplicate_key(self.modes, 1)))
                } else {
                    None
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::mode::MatchMode;
    use crate::matching::test_support::*;

    fn matcher() -> Matcher {
        Matcher::new(MatchMode::Hash | MatchMode::FileSize)
    }

    fn sample() -> (Vec<LocatedFile>, Vec<LocatedFile>) {
        let a = vec![
            located(1, "/", "a", Some(("h1", 10))),
            located(2, "/", "b", Some(("h2", 20))),
            located(3, "/", "c", Some(("h3", 30))),
        ];
        let b = vec![
            located(4, "/", "d", Some(("h3", 30))),
            located(5, "/", "e", Some(("h4", 40))),
            located(6, "/", "f", Some(("h1", 10))),
        ];
        (a, b)
    }

    #[test]
    fn test_streaming_matches_eager() {
        let m = matcher();
        let (a, b) = sample();

        let eager = m.intersect(&a, &b, false).unwrap();
        let streamed: Vec<_> = m
            .intersect_iter(&a, b.clone(), false)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let ids = |pairs: &[(LocatedFile, LocatedFile)]| {
            pairs.iter().map(|(x, y)| (x.id(), y.id())).collect::<Vec<_>>()
        };
        assert_eq!(ids(&eager), ids(&streamed));

        let eager: Vec<i64> = m.subtract(&a, &b, false).unwrap().iter().map(|f| f.id()).collect();
        let streamed: Vec<i64> = m
            .subtract_iter(a.clone(), &b, false)
            .unwrap()
            .map(|r| r.map(|f| f.id()))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(eager, streamed);

        let eager: Vec<i64> = m.union(&a, &b, true).unwrap().iter().map(|f| f.id()).collect();
        let streamed: Vec<i64> = m
            .union_iter(a.clone(), b.clone(), true)
            .map(|r| r.map(|f| f.id()))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(eager, streamed);
        assert_eq!(streamed, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_streaming_duplicate_surfaces_as_error() {
        let m = matcher();
        let (a, mut b) = sample();
        b.push(located(7, "/", "g", Some(("h4", 40))));
        let result: Result<Vec<_>> = m.intersect_iter(&a, b.clone(), false).unwrap().collect();
        assert!(result.is_err());
        let result: Result<Vec<_>> = m.union_iter(a.clone(), b.clone(), true).collect();
        assert!(result.is_err());
        let result: Result<Vec<_>> = m.subtract_iter(b, &a, false).unwrap().collect();
        assert!(result.is_err());
    }
}
