use ahash::RandomState;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

use super::models::{FileContent, FileLocation, FileMeta, FilePath, IndexRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Content,
    Meta,
    Path,
    Run,
    Location,
}

pub trait Entity: Any + Send + Sync {
    const KIND: EntityKind;
    fn id(&self) -> i64;
}

impl Entity for FileContent {
    const KIND: EntityKind = EntityKind::Content;
    fn id(&self) -> i64 {
        self.id
    }
}

impl Entity for FileMeta {
    const KIND: EntityKind = EntityKind::Meta;
    fn id(&self) -> i64 {
        self.id
    }
}

impl Entity for FilePath {
    const KIND: EntityKind = EntityKind::Path;
    fn id(&self) -> i64 {
        self.id
    }
}

impl Entity for IndexRun {
    const KIND: EntityKind = EntityKind::Run;
    fn id(&self) -> i64 {
        self.id
    }
}

impl Entity for FileLocation {
    const KIND: EntityKind = EntityKind::Location;
    fn id(&self) -> i64 {
        self.id
    }
}

type Handle = Arc<dyn Any + Send + Sync>;

/// Capped identity map keyed by (kind, id). Loading the same row twice yields
/// the same `Arc` as long as the entry was not evicted. A full registry is cleared.
pub struct Registry {
    entries: DashMap<(EntityKind, i64), Handle, RandomState>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_hasher(RandomState::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get<T: Entity>(&self, id: i64) -> Option<Arc<T>> {
        let handle = self.entries.get(&(T::KIND, id))?.value().clone();
        handle.downcast::<T>().ok()
    }

    /// Returns the registered handle for `value`'s id, registering `value` if absent.
    pub fn intern<T: Entity>(&self, value: T) -> Arc<T> {
        if let Some(existing) = self.get::<T>(value.id()) {
            return existing;
        }
        self.evict_if_full();
        let fresh = Arc::new(value);
        match self.entries.entry((T::KIND, fresh.id())) {
            MapEntry::Occupied(occupied) => {
                let handle = occupied.get().clone();
                handle.downcast::<T>().unwrap_or(fresh)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(fresh.clone());
                fresh
            }
        }
    }

    /// Replaces the registered handle after the row was updated.
    pub fn replace<T: Entity>(&self, value: T) -> Arc<T> {
        self.evict_if_full();
        let fresh = Arc::new(value);
        self.entries.insert((T::KIND, fresh.id()), fresh.clone());
        fresh
    }

    pub fn remove<T: Entity>(&self, id: i64) {
        self.entries.remove(&(T::KIND, id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn evict_if_full(&self) {
        if self.entries.len() >= self.capacity {
            debug!("Entity registry reached {} entries, clearing", self.capacity);
            self.entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(id: i64) -> FileContent {
        FileContent {
            id,
            file_size: 10,
            hash: format!("h{}", id),
            hash_begin: String::new(),
            hash_end: String::new(),
        }
    }

    #[test]
    fn test_intern_returns_same_handle() {
        let registry = Registry::new(10);
        let a = registry.intern(content(1));
        let b = registry.intern(content(1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let registry = Registry::new(10);
        registry.intern(content(1));
        assert!(registry.get::<FilePath>(1).is_none());
        assert!(registry.get::<FileContent>(1).is_some());
    }

    #[test]
    fn test_capacity_clears() {
        let registry = Registry::new(3);
        for id in 1..=3 {
            registry.intern(content(id));
        }
        assert_eq!(registry.len(), 3);
        registry.intern(content(4));
        assert_eq!(registry.len(), 1);
        assert!(registry.get::<FileContent>(1).is_none());
        assert!(registry.get::<FileContent>(4).is_some());
    }

    #[test]
    fn test_replace_updates_handle() {
        let registry = Registry::new(10);
        let old = registry.intern(content(1));
        let mut updated = content(1);
        updated.hash = "changed".to_string();
        registry.replace(updated);
        let current = registry.get::<FileContent>(1).unwrap();
        assert_eq!(current.hash, "changed");
        assert_eq!(old.hash, "h1");
    }
}
