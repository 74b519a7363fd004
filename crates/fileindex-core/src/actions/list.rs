use chrono::{Local, TimeZone};
use std::sync::Arc;

use crate::catalog::{Catalog, IndexRun};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub index_run: Arc<IndexRun>,
    pub files: i64,
}

/// All runs, newest first.
pub fn list_runs(catalog: &Catalog) -> Result<Vec<RunSummary>> {
    Ok(catalog
        .list_index_runs()?
        .into_iter()
        .map(|(index_run, files)| RunSummary { index_run, files })
        .collect())
}

/// One-line description: id, date, root and flags.
pub fn describe_run(run: &IndexRun) -> String {
    let date = Local
        .timestamp_millis_opt(run.run_date)
        .single()
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| run.run_date.to_string());
    let mut line = format!("{:>5}  {}  {}", run.id, date, run.root());
    if run.is_backup {
        line.push_str("  [backup]");
    }
    if run.failure_occurred {
        line.push_str("  [incomplete]");
    }
    if let Some(medium) = &run.medium_description {
        line.push_str(&format!("  ({})", medium));
    }
    line
}
