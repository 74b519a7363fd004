use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::config::ReadConfig;

/// Counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits.max(1)),
            available: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> SemaphorePermit<'_> {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
        SemaphorePermit { semaphore: self }
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        *self.semaphore.permits.lock() += 1;
        self.semaphore.available.notify_one();
    }
}

/// Held for the duration of one file read.
pub struct ReadPermit<'a> {
    _general: Option<SemaphorePermit<'a>>,
    _small: Option<SemaphorePermit<'a>>,
}

/// Bounds concurrent file reads.
///
/// Files above the small-file threshold take a general permit and a small-file
/// permit, smaller files only a small-file permit. A threshold of 0 disables the
/// small-file pool and every read takes a general permit. Permits are always
/// taken general first.
#[derive(Debug)]
pub struct ReadThrottle {
    general: Semaphore,
    small: Option<Semaphore>,
    threshold: u64,
}

impl ReadThrottle {
    pub fn new(config: ReadConfig) -> Self {
        let general = config.max_parallel_reads_general.max(1);
        let small = (config.small_file_threshold > 0).then(|| {
            Semaphore::new(general * config.max_parallel_reads_small_files_factor.max(1))
        });
        Self {
            general: Semaphore::new(general),
            small,
            threshold: config.small_file_threshold,
        }
    }

    pub fn acquire(&self, size: u64) -> ReadPermit<'_> {
        let permit = match &self.small {
            None => ReadPermit {
                _general: Some(self.general.acquire()),
                _small: None,
            },
            Some(small) if size <= self.threshold => ReadPermit {
                _general: None,
                _small: Some(small.acquire()),
            },
            Some(small) => {
                let general = self.general.acquire();
                ReadPermit {
                    _general: Some(general),
                    _small: Some(small.acquire()),
                }
            }
        };
        trace!("Read permit acquired for {} bytes", size);
        permit
    }

    pub fn general_available(&self) -> usize {
        self.general.available()
    }

    pub fn small_available(&self) -> Option<usize> {
        self.small.as_ref().map(Semaphore::available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_permit_accounting() {
        let throttle = ReadThrottle::new(ReadConfig::SSD);
        assert_eq!(throttle.general_available(), 2);
        assert_eq!(throttle.small_available(), Some(4));
        {
            let _large = throttle.acquire(10_000_000);
            assert_eq!(throttle.general_available(), 1);
            assert_eq!(throttle.small_available(), Some(3));
            let _small = throttle.acquire(100);
            assert_eq!(throttle.general_available(), 1);
            assert_eq!(throttle.small_available(), Some(2));
        }
        assert_eq!(throttle.general_available(), 2);
        assert_eq!(throttle.small_available(), Some(4));
    }

    #[test]
    fn test_zero_threshold_uses_general_pool() {
        let throttle = ReadThrottle::new(ReadConfig {
            max_parallel_reads_general: 3,
            max_parallel_reads_small_files_factor: 2,
            small_file_threshold: 0,
        });
        assert_eq!(throttle.small_available(), None);
        let _permit = throttle.acquire(1);
        assert_eq!(throttle.general_available(), 2);
    }

    #[test]
    fn test_semaphore_bounds_concurrency() {
        let semaphore = Arc::new(Semaphore::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (semaphore, active, peak) = (semaphore.clone(), active.clone(), peak.clone());
                thread::spawn(move || {
                    let _permit = semaphore.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
