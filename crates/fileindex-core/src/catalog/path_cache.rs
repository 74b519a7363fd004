use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::trace;

use super::models::FilePath;

/// Bounded lookup tables for directory tree nodes. A table that reaches its
/// capacity is cleared; callers fall back to the database on a miss.
pub struct FilePathCache {
    by_id: DashMap<i64, Arc<FilePath>, RandomState>,
    by_part: DashMap<(String, i64), Arc<FilePath>, RandomState>,
    by_path: DashMap<String, Arc<FilePath>, RandomState>,
    insert_lock: Mutex<()>,
    capacity: usize,
}

impl FilePathCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: DashMap::with_hasher(RandomState::new()),
            by_part: DashMap::with_hasher(RandomState::new()),
            by_path: DashMap::with_hasher(RandomState::new()),
            insert_lock: Mutex::new(()),
            capacity: capacity.max(1),
        }
    }

    pub fn by_id(&self, id: i64) -> Option<Arc<FilePath>> {
        self.by_id.get(&id).map(|e| e.value().clone())
    }

    pub fn by_part(&self, part: &str, parent_id: i64) -> Option<Arc<FilePath>> {
        self.by_part
            .get(&(part.to_string(), parent_id))
            .map(|e| e.value().clone())
    }

    pub fn by_path(&self, path: &str) -> Option<Arc<FilePath>> {
        self.by_path.get(path).map(|e| e.value().clone())
    }

    pub fn put(&self, path: Arc<FilePath>) {
        if self.by_id.len() >= self.capacity {
            trace!("Path cache by id full, clearing");
            self.by_id.clear();
        }
        if self.by_part.len() >= self.capacity {
            trace!("Path cache by part full, clearing");
            self.by_part.clear();
        }
        if self.by_path.len() >= self.capacity {
            trace!("Path cache by path full, clearing");
            self.by_path.clear();
        }
        self.by_id.insert(path.id, path.clone());
        if let Some(parent_id) = path.parent_id {
            self.by_part
                .insert((path.path_part.clone(), parent_id), path.clone());
        }
        self.by_path.insert(path.path.clone(), path);
    }

    /// Serializes lookup-or-insert of new rows so a path is created only once.
    pub fn lock_inserts(&self) -> MutexGuard<'_, ()> {
        self.insert_lock.lock()
    }

    pub fn remove(&self, path: &FilePath) {
        self.by_id.remove(&path.id);
        if let Some(parent_id) = path.parent_id {
            self.by_part.remove(&(path.path_part.clone(), parent_id));
        }
        self.by_path.remove(&path.path);
    }

    pub fn clear(&self) {
        self.by_id.clear();
        self.by_part.clear();
        self.by_path.clear();
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
