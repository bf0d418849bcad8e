//! Per-key mutual exclusion for in-flight volume operations.
//!
//! [`OperationLocks`] is a non-blocking try-acquire table: a second caller on
//! the same key is told immediately that an operation is in progress and never
//! queues. [`KeyedMutex`] is the coarse, waiting lock that serialises account
//! provisioning for identical account properties.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

/// Raised when a key is already held by another in-flight operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("an operation with the given volume {key} already exists")]
pub struct OperationInProgress {
    /// Contended key.
    pub key: String,
}

/// Table of keys with an operation in flight.
#[derive(Clone, Debug, Default)]
pub struct OperationLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl OperationLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `key`, returning a guard that releases it on drop.
    ///
    /// # Errors
    ///
    /// Returns [`OperationInProgress`] when the key is already reserved.
    pub fn try_acquire(&self, key: &str) -> Result<OperationGuard, OperationInProgress> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.to_owned()) {
            trace!(key, "operation already in flight");
            return Err(OperationInProgress {
                key: key.to_owned(),
            });
        }
        trace!(key, "reserved");
        Ok(OperationGuard {
            held: Arc::clone(&self.held),
            key: key.to_owned(),
        })
    }

    /// Reserves every key in order. Either all keys are reserved or none are.
    ///
    /// # Errors
    ///
    /// Returns [`OperationInProgress`] naming the first contended key.
    pub fn try_acquire_all<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<Vec<OperationGuard>, OperationInProgress> {
        let mut guards = Vec::new();
        for key in keys {
            if guards.iter().any(|guard: &OperationGuard| guard.key == key) {
                continue;
            }
            guards.push(self.try_acquire(key)?);
        }
        Ok(guards)
    }

    /// Reports whether `key` is currently reserved.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Reservation returned by [`OperationLocks::try_acquire`].
#[derive(Debug)]
pub struct OperationGuard {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        trace!(key = %self.key, "released");
    }
}

/// Waiting mutex keyed by string.
///
/// Entries are created lazily and kept for the lifetime of the table; the key
/// space is bounded by the distinct account property combinations in use.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedMutex {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and holds it until the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key.to_owned()).or_default())
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_acquire_on_same_key_fails() {
        let locks = OperationLocks::new();
        let _guard = locks
            .try_acquire("pvc-1")
            .unwrap_or_else(|err| panic!("first acquire: {err}"));

        let err = locks
            .try_acquire("pvc-1")
            .expect_err("second acquire should fail");
        assert_eq!(err.key, "pvc-1");
        assert!(locks.try_acquire("pvc-2").is_ok());
    }

    #[test]
    fn dropping_guard_releases_key() {
        let locks = OperationLocks::new();
        let guard = locks
            .try_acquire("pvc-1")
            .unwrap_or_else(|err| panic!("acquire: {err}"));
        assert!(locks.is_held("pvc-1"));

        drop(guard);

        assert!(!locks.is_held("pvc-1"));
        assert!(locks.try_acquire("pvc-1").is_ok());
    }

    #[test]
    fn acquire_all_is_all_or_nothing() {
        let locks = OperationLocks::new();
        let _held = locks
            .try_acquire("b")
            .unwrap_or_else(|err| panic!("acquire: {err}"));

        let err = locks
            .try_acquire_all(["a", "b"])
            .expect_err("contended set should fail");

        assert_eq!(err.key, "b");
        assert!(!locks.is_held("a"), "partial reservation must be released");
    }

    #[test]
    fn acquire_all_tolerates_duplicate_keys() {
        let locks = OperationLocks::new();
        let guards = locks
            .try_acquire_all(["a", "a"])
            .unwrap_or_else(|err| panic!("acquire: {err}"));
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn keyed_mutex_serialises_same_key() {
        let mutex = Arc::new(KeyedMutex::new());
        let guard = mutex.lock("key").await;

        let contender = Arc::clone(&mutex);
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock("key").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter should block while key is held");

        drop(guard);
        waiter
            .await
            .unwrap_or_else(|err| panic!("waiter panicked: {err}"));
    }

    #[tokio::test]
    async fn keyed_mutex_allows_distinct_keys() {
        let mutex = KeyedMutex::new();
        let _first = mutex.lock("a").await;
        let _second = mutex.lock("b").await;
    }
}
