//! Storage backends for entities, taxonomy terms, placeholder reservations
//! and mapping preferences.
//!
//! - **Memory**: in-process maps, used by tests and embedded callers
//! - **`SQLite`**: a single database file, used by the CLI across runs
//!
//! Both implement the interfaces in [`crate::io::traits`].

// Dropping a guard a few statements early buys nothing here.
#![allow(clippy::significant_drop_tightening)]

mod memory;
mod sqlite;

pub use memory::{
    MemoryPlaceholderStore, MemoryPreferenceStore, MemoryRepository, MemoryTaxonomyStore,
};
pub use sqlite::SqliteStorage;

use std::sync::{Mutex, MutexGuard};

/// Acquires a mutex, recovering the inner value if a previous holder
/// panicked.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("storage mutex was poisoned, recovering");
            metrics::counter!("bulkport_storage_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    *acquire_lock(&mutex) += 1;
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*acquire_lock(&mutex), 8);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_acquire_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(5));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex), 5);
    }
}
