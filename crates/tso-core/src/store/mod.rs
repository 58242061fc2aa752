//! Durable key-value store interface.
//!
//! The oracle persists its save point through this interface. The one
//! non-negotiable semantic is the leader-conditional write: the precondition
//! is evaluated atomically with the put at the store, never as a
//! check-then-write sequence in the client. A store lacking that primitive
//! must be fronted by an adapter that provides it.
//!
//! # Async Pattern
//!
//! All trait methods return [`BoxFuture`] to support async execution while
//! maintaining object safety, following the same pattern as the rest of the
//! codebase's storage seams.
//!
//! # Invariants
//!
//! - [INV-KV001] `conditional_put` commits if and only if the precondition
//!   holds at commit time.
//! - [INV-KV002] A `PredicateFailed` outcome leaves the store unchanged.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A boxed future for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors from durable store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from the backing store.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during store operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation did not complete within its deadline.
    #[error("store operation exceeded deadline of {0:?}")]
    Deadline(Duration),
}

/// Precondition evaluated atomically with a [`KvStore::conditional_put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The value stored at `key` equals `expected`.
    ValueEquals {
        /// Key whose value is compared.
        key: String,
        /// Expected value.
        expected: Vec<u8>,
    },

    /// No value is stored at `key`.
    KeyAbsent {
        /// Key that must be absent.
        key: String,
    },
}

/// Outcome of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The precondition held and the put was committed.
    Committed,
    /// The precondition failed; nothing was written.
    PredicateFailed,
}

/// A transactional key-value store with leader-conditional writes.
///
/// # Object Safety
///
/// The trait is object-safe; the oracle holds it as `Arc<dyn KvStore>`.
pub trait KvStore: Send + Sync {
    /// Reads the value at `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on transport or IO failure.
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>>;

    /// Writes `value` at `key` if and only if `precondition` holds, with the
    /// check and the put committed atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on transport or IO failure. A failed
    /// precondition is not an error; it is reported as
    /// [`PutOutcome::PredicateFailed`].
    fn conditional_put<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        precondition: Precondition,
    ) -> BoxFuture<'a, Result<PutOutcome, StoreError>>;
}
