use crate::catalog::LocatedFile;

/// Predicate over a matched pair, used to narrow intersect results.
#[derive(Debug, Clone)]
pub enum PairFilter {
    HashNeq,
    FileSizeNeq,
    ModifiedMillisNeq,
    ModifiedSecNeq,
    IdNeq,
    /// Both sides carry the same non-null reference inode.
    Hardlink,
    HardlinkNeq,
    Not(Box<PairFilter>),
    And(Vec<PairFilter>),
    Or(Vec<PairFilter>),
}

impl PairFilter {
    pub fn not(self) -> PairFilter {
        PairFilter::Not(Box::new(self))
    }

    pub fn and(self, other: PairFilter) -> PairFilter {
        match self {
            PairFilter::And(mut all) => {
                all.push(other);
                PairFilter::And(all)
            }
            first => PairFilter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: PairFilter) -> PairFilter {
        match self {
            PairFilter::Or(mut any) => {
                any.push(other);
                PairFilter::Or(any)
            }
            first => PairFilter::Or(vec![first, other]),
        }
    }

    pub fn matches(&self, a: &LocatedFile, b: &LocatedFile) -> bool {
        match self {
            PairFilter::HashNeq => a.hash() != b.hash(),
            PairFilter::FileSizeNeq => a.size() != b.size(),
            PairFilter::ModifiedMillisNeq => a.modified() != b.modified(),
            PairFilter::ModifiedSecNeq => {
                a.modified().div_euclid(1000) != b.modified().div_euclid(1000)
            }
            PairFilter::IdNeq => a.id() != b.id(),
            PairFilter::Hardlink => is_hardlink(a, b),
            PairFilter::HardlinkNeq => !is_hardlink(a, b),
            PairFilter::Not(inner) => !inner.matches(a, b),
            PairFilter::And(all) => all.iter().all(|f| f.matches(a, b)),
            PairFilter::Or(any) => any.iter().any(|f| f.matches(a, b)),
        }
    }

    pub fn apply<T: AsRef<LocatedFile> + Clone>(&self, pairs: &[(T, T)]) -> Vec<(T, T)> {
        pairs
            .iter()
            .filter(|(a, b)| self.matches(a.as_ref(), b.as_ref()))
            .cloned()
            .collect()
    }
}

fn is_hardlink(a: &LocatedFile, b: &LocatedFile) -> bool {
    match (a.location.reference_inode, b.location.reference_inode) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::test_support::*;

    #[test]
    fn test_basic_filters() {
        let a = located(1, "/", "a", Some(("h1", 10)));
        let mut b = located(2, "/", "a", Some(("h2", 10)));
        assert!(PairFilter::HashNeq.matches(&a, &b));
        assert!(!PairFilter::FileSizeNeq.matches(&a, &b));
        assert!(!PairFilter::IdNeq.matches(&a, &a));
        set_modified(&mut b, a.modified() + 500);
        assert!(PairFilter::ModifiedMillisNeq.matches(&a, &b));
        assert!(!PairFilter::ModifiedSecNeq.matches(&a, &b));
    }

    #[test]
    fn test_hardlink_requires_inode() {
        let mut a = located(1, "/", "a", Some(("h1", 10)));
        let mut b = located(2, "/", "b", Some(("h1", 10)));
        assert!(!PairFilter::Hardlink.matches(&a, &b));
        assert!(PairFilter::HardlinkNeq.matches(&a, &b));
        set_inode(&mut a, Some(7));
        set_inode(&mut b, Some(7));
        assert!(PairFilter::Hardlink.matches(&a, &b));
        set_inode(&mut b, Some(8));
        assert!(!PairFilter::Hardlink.matches(&a, &b));
    }

    #[test]
    fn test_combinators() {
        let a = located(1, "/", "a", Some(("h1", 10)));
        let b = located(2, "/", "b", Some(("h1", 20)));
        let changed = PairFilter::HashNeq.or(PairFilter::FileSizeNeq);
        assert!(changed.matches(&a, &b));
        assert!(!changed.clone().not().matches(&a, &b));
        assert!(!changed.and(PairFilter::HashNeq).matches(&a, &b));
        let pairs = vec![(a.clone(), b.clone()), (a.clone(), a.clone())];
        assert_eq!(PairFilter::IdNeq.apply(&pairs).len(), 1);
    }
}
