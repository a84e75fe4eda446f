use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::ports::RepositoryError;

/// Registry of per-key mutexes. Operations on the same key are serialized; different keys
/// proceed in parallel. Entries live only while some caller holds or waits on them.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Runs `apply` while holding the lock for `key`.
    pub(crate) fn with<T, E>(
        &self,
        key: &str,
        apply: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let slot = self.slot(key)?;
        let outcome = match slot.lock() {
            Ok(_guard) => apply(),
            Err(_) => Err(RepositoryError::Unavailable("entity lock poisoned".to_string()).into()),
        };
        drop(slot);
        self.prune(key);
        outcome
    }

    fn slot(&self, key: &str) -> Result<Arc<Mutex<()>>, RepositoryError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| RepositoryError::Unavailable("lock registry poisoned".to_string()))?;
        Ok(slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Removes the entry for `key` when the registry holds the only reference. New references
    /// are only handed out under the registry lock, so the count cannot grow meanwhile.
    fn prune(&self, key: &str) {
        if let Ok(mut slots) = self.slots.lock() {
            if slots
                .get(key)
                .is_some_and(|slot| Arc::strong_count(slot) == 1)
            {
                slots.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn entries_are_dropped_once_released() {
        let locks = KeyedLocks::default();

        for n in 0..100 {
            let key = format!("pay-{n:06}");
            let value: Result<u32, RepositoryError> = locks.with(&key, || Ok(n));
            assert_eq!(value.expect("ran"), n);
        }

        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn errors_from_the_closure_still_release_the_entry() {
        let locks = KeyedLocks::default();

        let outcome: Result<(), RepositoryError> =
            locks.with("w-a", || Err(RepositoryError::Conflict));

        assert!(matches!(outcome, Err(RepositoryError::Conflict)));
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn contended_keys_stay_serialized_and_are_pruned_afterwards() {
        let locks = Arc::new(KeyedLocks::default());
        let counter = Arc::new(Mutex::new((0u32, 0u32)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let outcome: Result<(), RepositoryError> = locks.with("shared", || {
                        {
                            let mut state = counter.lock().unwrap();
                            state.0 += 1;
                            state.1 = state.1.max(state.0);
                        }
                        thread::yield_now();
                        counter.lock().unwrap().0 -= 1;
                        Ok(())
                    });
                    outcome.expect("locked section ran");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread finished");
        }

        assert_eq!(counter.lock().unwrap().1, 1);
        assert_eq!(locks.len(), 0);
    }
}
