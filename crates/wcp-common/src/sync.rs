use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

static POISON_RECOVERIES: AtomicU64 = AtomicU64::new(0);

/// Locks `lock`, taking the inner value back if a previous holder panicked.
///
/// The daemon's shared state stays usable after a reader thread panics; the
/// recovery is counted and logged rather than propagated to every other
/// thread.
pub fn mutex_lock_or_recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        let recoveries = POISON_RECOVERIES.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(recoveries, "recovering from poisoned mutex");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unpoisoned_mutex() {
        let lock = Mutex::new(5);
        assert_eq!(*mutex_lock_or_recover(&lock), 5);
    }

    #[test]
    fn test_recovers_poisoned_mutex() {
        let lock = Arc::new(Mutex::new(vec![1, 2]));
        let poisoner = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let mut guard = poisoner.lock().unwrap();
            guard.push(3);
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        let before = POISON_RECOVERIES.load(Ordering::Relaxed);
        let guard = mutex_lock_or_recover(&lock);
        assert_eq!(*guard, vec![1, 2, 3]);
        assert!(POISON_RECOVERIES.load(Ordering::Relaxed) > before);
    }
}
