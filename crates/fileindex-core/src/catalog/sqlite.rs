use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::path_cache::FilePathCache;
use super::registry::Registry;
use crate::config::AppConfig;
use crate::error::{Error, Result};

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub registry_capacity: usize,
    pub path_cache_capacity: usize,
    /// Auto-commit after this many written rows.
    pub max_transaction_size: usize,
    /// Auto-commit after a transaction was open this long.
    pub max_transaction_duration: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CatalogOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            registry_capacity: config.registry_capacity,
            path_cache_capacity: config.path_cache_capacity,
            max_transaction_size: config.max_transaction_size.max(1),
            max_transaction_duration: Duration::from_secs(config.max_transaction_duration_secs),
        }
    }
}

#[derive(Debug)]
struct PendingTx {
    started: Instant,
    rows: usize,
}

/// The relational catalog. One connection behind a mutex: `Connection` is not
/// `Sync`, so readers cannot share it through a read/write lock and every
/// statement (reads included) is serialized.
pub struct Catalog {
    conn: Mutex<Connection>,
    tx: Mutex<Option<PendingTx>>,
    registry: Registry,
    paths: FilePathCache,
    options: CatalogOptions,
}

impl Catalog {
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with(path, CatalogOptions::default())
    }

    pub fn open_with(path: &str, options: CatalogOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        let catalog = Self::init(conn, options)?;
        info!("Catalog opened at {}", path);
        Ok(catalog)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(CatalogOptions::default())
    }

    pub fn open_in_memory_with(options: CatalogOptions) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, options)
    }

    fn init(conn: Connection, options: CatalogOptions) -> Result<Self> {
        let catalog = Catalog {
            conn: Mutex::new(conn),
            tx: Mutex::new(None),
            registry: Registry::new(options.registry_capacity),
            paths: FilePathCache::new(options.path_cache_capacity),
            options,
        };
        catalog.configure_pragmas()?;
        catalog.check_integrity()?;
        catalog.migrate_schema()?;
        Ok(catalog)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.connection().execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache)");
        Ok(())
    }

    fn check_integrity(&self) -> Result<()> {
        let result: String = self
            .connection()
            .query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if result != "ok" {
            return Err(Error::Precondition(format!(
                "catalog integrity check failed: {}",
                result
            )));
        }
        Ok(())
    }

    /// Creates missing tables. A catalog written by a newer program is refused.
    fn migrate_schema(&self) -> Result<()> {
        let conn = self.connection();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(Error::VersionMismatch {
                catalog: version,
                program: SCHEMA_VERSION,
            });
        }
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn path_cache(&self) -> &FilePathCache {
        &self.paths
    }

    pub fn clear_caches(&self) {
        self.registry.clear();
        self.paths.clear();
    }

    // ── Transactions ─────────────────────────────────────────────
    //
    // Lock order: `tx` before `conn`. Query code takes only `conn`.

    pub fn begin(&self) -> Result<()> {
        let mut tx = self.tx.lock();
        if tx.is_none() {
            self.connection().execute_batch("BEGIN")?;
            *tx = Some(PendingTx {
                started: Instant::now(),
                rows: 0,
            });
        }
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut tx = self.tx.lock();
        if let Some(pending) = tx.take() {
            self.connection().execute_batch("COMMIT")?;
            debug!("Committed {} rows", pending.rows);
        }
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let mut tx = self.tx.lock();
        if let Some(pending) = tx.take() {
            self.connection().execute_batch("ROLLBACK")?;
            debug!("Rolled back {} rows", pending.rows);
        }
        // Cached rows may no longer exist.
        self.clear_caches();
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Counts written rows and commits (then reopens) the open transaction
    /// once it exceeds the row or duration threshold.
    pub fn note_writes(&self, rows: usize) -> Result<()> {
        let mut tx = self.tx.lock();
        let due = match tx.as_mut() {
            Some(pending) => {
                pending.rows += rows;
                pending.rows >= self.options.max_transaction_size
                    || pending.started.elapsed() >= self.options.max_transaction_duration
            }
            None => false,
        };
        if due {
            let conn = self.connection();
            conn.execute_batch("COMMIT")?;
            conn.execute_batch("BEGIN")?;
            if let Some(pending) = tx.as_mut() {
                debug!("Auto-committed {} rows", pending.rows);
                pending.rows = 0;
                pending.started = Instant::now();
            }
        }
        Ok(())
    }

    /// Runs `f` inside a transaction, committing on success and rolling back on
    /// error. Joins an already open transaction instead of nesting.
    pub fn transaction<T>(&self, f: impl FnOnce(&Catalog) -> Result<T>) -> Result<T> {
        if self.in_transaction() {
            return f(self);
        }
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_root_path() {
        let catalog = Catalog::open_in_memory().unwrap();
        let (path, depth): (String, i64) = catalog
            .connection()
            .query_row("SELECT path, depth FROM file_path WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(path, "/");
        assert_eq!(depth, 0);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");
        let db_path = db_path.to_str().unwrap();
        {
            let catalog = Catalog::open(db_path).unwrap();
            catalog
                .connection()
                .execute_batch("PRAGMA user_version = 99")
                .unwrap();
        }
        match Catalog::open(db_path) {
            Err(Error::VersionMismatch { catalog, program }) => {
                assert_eq!(catalog, 99);
                assert_eq!(program, SCHEMA_VERSION);
            }
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("newer catalog was accepted"),
        }
    }

    #[test]
    fn test_shared_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Catalog>();

        let catalog = Catalog::open_in_memory().unwrap();
        catalog.begin().unwrap();
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let catalog = &catalog;
                scope.spawn(move || {
                    for n in 0..25 {
                        let path = format!("/shared/w{}/d{}/", worker, n);
                        let inserted = catalog.get_or_insert_file_path(&path).unwrap();
                        let found = catalog.find_file_path(&path).unwrap().unwrap();
                        assert_eq!(found.id, inserted.id);
                    }
                });
            }
        });
        catalog.commit().unwrap();

        let count: i64 = catalog
            .connection()
            .query_row("SELECT COUNT(*) FROM file_path", [], |row| row.get(0))
            .unwrap();
        // root, /shared/, 8 worker dirs, 200 leaves
        assert_eq!(count, 1 + 1 + 8 + 8 * 25);
    }

    #[test]
    fn test_auto_commit_on_row_threshold() {
        let options = CatalogOptions {
            max_transaction_size: 2,
            ..CatalogOptions::default()
        };
        let catalog = Catalog::open_in_memory_with(options).unwrap();
        catalog.begin().unwrap();
        catalog.note_writes(1).unwrap();
        assert_eq!(catalog.tx.lock().as_ref().map(|t| t.rows), Some(1));
        catalog.note_writes(1).unwrap();
        assert_eq!(catalog.tx.lock().as_ref().map(|t| t.rows), Some(0));
        assert!(catalog.in_transaction());
        catalog.commit().unwrap();
        assert!(!catalog.in_transaction());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let catalog = Catalog::open_in_memory().unwrap();
        let result: Result<()> = catalog.transaction(|c| {
            c.connection().execute(
                "INSERT INTO file_path (parent_file_path_id, path, path_part, depth) \
                 VALUES (1, '/x/', 'x', 1)",
                [],
            )?;
            Err(Error::Other("boom".to_string()))
        });
        assert!(result.is_err());
        let count: i64 = catalog
            .connection()
            .query_row("SELECT COUNT(*) FROM file_path", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
