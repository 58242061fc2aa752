//! In-memory store for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{BoxFuture, KvStore, Precondition, PutOutcome, StoreError};

/// Mutex-guarded map implementing [`KvStore`].
///
/// The whole map is a single critical section, so the conditional put's
/// check-and-write is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` at `key` unconditionally.
    ///
    /// Test and bootstrap helper; the oracle itself only writes through
    /// [`KvStore::conditional_put`].
    pub fn put_unchecked(&self, key: impl Into<String>, value: Vec<u8>) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// Removes the value at `key`, if any.
    pub fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    fn precondition_holds(entries: &HashMap<String, Vec<u8>>, precondition: &Precondition) -> bool {
        match precondition {
            Precondition::ValueEquals { key, expected } => {
                entries.get(key).is_some_and(|v| v == expected)
            },
            Precondition::KeyAbsent { key } => !entries.contains_key(key),
        }
    }
}

impl KvStore for MemoryStore {
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(entries.get(key).cloned())
        })
    }

    fn conditional_put<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        precondition: Precondition,
    ) -> BoxFuture<'a, Result<PutOutcome, StoreError>> {
        Box::pin(async move {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !Self::precondition_holds(&entries, &precondition) {
                return Ok(PutOutcome::PredicateFailed);
            }
            entries.insert(key.to_string(), value);
            Ok(PutOutcome::Committed)
        })
    }
}
