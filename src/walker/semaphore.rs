// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A hand-rolled counting semaphore, the sole cross-task
//! synchronization primitive on the write path (spec §5). Grounded on
//! the teacher's drop-releases-a-slot idiom in
//! `descriptor_table::FileGuard`.

use std::sync::{Condvar, Mutex};

/// Bounds how many callers may hold a permit at once.
pub struct Semaphore {
    state: Mutex<usize>,
    cond: Condvar,
    capacity: usize,
}

impl Semaphore {
    /// Creates a semaphore with `permits` initial slots.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self { state: Mutex::new(permits), cond: Condvar::new(), capacity: permits }
    }

    /// The total number of permits this semaphore was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a permit is available, then returns a guard that
    /// releases it on drop.
    #[allow(clippy::missing_panics_doc)]
    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut available = self.state.lock().expect("lock poisoned");
        while *available == 0 {
            available = self.cond.wait(available).expect("lock poisoned");
        }
        *available -= 1;
        SemaphoreGuard { sem: self }
    }

    fn release(&self) {
        let mut available = self.state.lock().expect("lock poisoned");
        *available += 1;
        drop(available);
        self.cond.notify_one();
    }
}

/// A held permit; dropping it returns the slot to the semaphore.
pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn never_exceeds_permit_count() {
        let sem = Arc::new(Semaphore::new(2));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let concurrent = Arc::clone(&concurrent);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let _permit = sem.acquire();
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(5));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
