use tracing::info;

use crate::catalog::{Catalog, RemovalStats};
use crate::error::{Error, Result};

/// Deletes a run and every catalog row only it referenced.
pub fn remove_run(catalog: &Catalog, run_id: i64) -> Result<RemovalStats> {
    let run = catalog.get_index_run(run_id).map_err(|e| match e {
        Error::Database(rusqlite::Error::QueryReturnedNoRows) => {
            Error::Precondition(format!("no index run with id {}", run_id))
        }
        other => other,
    })?;
    info!("Removing index run {} of {}", run.id, run.root());
    catalog.remove_index_run(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_run() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(matches!(remove_run(&catalog, 42), Err(Error::Precondition(_))));
    }
}
