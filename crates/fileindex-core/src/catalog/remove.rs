use rusqlite::params;
use tracing::{debug, info};

use super::models::IndexRun;
use super::sqlite::Catalog;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalStats {
    pub locations: usize,
    pub contents: usize,
    pub metas: usize,
    pub paths: usize,
}

impl Catalog {
    /// Deletes a run with its locations, then every content, meta and path row
    /// no longer referenced by anything. Runs in one transaction.
    pub fn remove_index_run(&self, run_id: i64) -> Result<RemovalStats> {
        let stats = self.transaction(|catalog| {
            let conn = catalog.connection();
            let mut stats = RemovalStats::default();

            stats.locations = conn.execute(
                "DELETE FROM file_location WHERE index_run_id = ?1",
                params![run_id],
            )?;
            conn.execute("DELETE FROM index_run WHERE id = ?1", params![run_id])?;

            stats.metas = conn.execute(
                "DELETE FROM file_meta WHERE NOT EXISTS \
                 (SELECT 1 FROM file_location l WHERE l.file_content_id = file_meta.file_content_id)",
                [],
            )?;
            stats.contents = conn.execute(
                "DELETE FROM file_content WHERE NOT EXISTS \
                 (SELECT 1 FROM file_location l WHERE l.file_content_id = file_content.id)",
                [],
            )?;

            // Leaves first; each pass can orphan the parents of deleted rows.
            loop {
                let deleted = conn.execute(
                    "DELETE FROM file_path WHERE id <> 1 \
                     AND NOT EXISTS (SELECT 1 FROM file_location l WHERE l.file_path_id = file_path.id) \
                     AND NOT EXISTS (SELECT 1 FROM index_run r WHERE r.file_path_id = file_path.id) \
                     AND NOT EXISTS (SELECT 1 FROM file_path c WHERE c.parent_file_path_id = file_path.id)",
                    [],
                )?;
                if deleted == 0 {
                    break;
                }
                debug!("Deleted {} orphaned paths", deleted);
                stats.paths += deleted;
            }
            Ok(stats)
        })?;
        self.clear_caches();
        self.registry().remove::<IndexRun>(run_id);
        info!(
            "Removed index run {}: {} locations, {} contents, {} metas, {} paths",
            run_id, stats.locations, stats.contents, stats.metas, stats.paths
        );
        Ok(stats)
    }
}
