use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

pub const SIZE_LOCK_SHARDS: usize = 64;

/// Fixed array of mutexes selected by file size. Two files of equal size
/// always map to the same mutex.
pub struct SizeLocks {
    shards: Vec<Mutex<()>>,
}

impl Default for SizeLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeLocks {
    pub fn new() -> Self {
        Self {
            shards: (0..SIZE_LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn shard(size: u64) -> usize {
        (size % SIZE_LOCK_SHARDS as u64) as usize
    }

    pub fn lock(&self, size: u64) -> MutexGuard<'_, ()> {
        let shard = Self::shard(size);
        trace!("Locking size shard {}", shard);
        self.shards[shard].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_depends_only_on_size() {
        assert_eq!(SizeLocks::shard(5), SizeLocks::shard(5 + 64));
        assert_ne!(SizeLocks::shard(5), SizeLocks::shard(6));
        let locks = SizeLocks::new();
        let guard = locks.lock(7);
        assert!(locks.shards[SizeLocks::shard(71)].try_lock().is_none());
        assert!(locks.shards[SizeLocks::shard(8)].try_lock().is_some());
        drop(guard);
    }
}
