use tracing::info;

use crate::catalog::{Catalog, LocatedFile};
use crate::error::Result;
use crate::matching::{MatchMode, Matcher};

/// Files of two runs that differ in location or content. Paths are compared
/// relative to each run's root.
#[derive(Debug, Clone, Default)]
pub struct RunComparison {
    pub only_in_first: Vec<LocatedFile>,
    pub only_in_second: Vec<LocatedFile>,
}

impl RunComparison {
    pub fn is_identical(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty()
    }
}

pub fn compare_runs(catalog: &Catalog, first_run_id: i64, second_run_id: i64) -> Result<RunComparison> {
    let first = catalog.load_run_files(first_run_id, false)?;
    let second = catalog.load_run_files(second_run_id, false)?;

    use MatchMode::*;
    let matcher = Matcher::new(RelPath2 | Filename | Hash | FileSize);
    let only_in_first = matcher
        .subtract_iter(first.iter().cloned(), &second, false)?
        .collect::<Result<Vec<_>>>()?;
    let only_in_second = matcher
        .subtract_iter(second.iter().cloned(), &first, false)?
        .collect::<Result<Vec<_>>>()?;
    info!(
        "Runs {} and {}: {} files only in the first, {} only in the second",
        first_run_id,
        second_run_id,
        only_in_first.len(),
        only_in_second.len()
    );
    Ok(RunComparison {
        only_in_first,
        only_in_second,
    })
}
