//! `SQLite`-backed store implementation.
//!
//! Uses `SQLite` with WAL mode. The conditional put runs the precondition
//! check and the write inside a single transaction, which gives the
//! atomic check-and-put the [`KvStore`] contract requires.

// SQLite work happens synchronously under a connection mutex inside the
// boxed futures; operations here are single-row and short.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use super::{BoxFuture, KvStore, Precondition, PutOutcome, StoreError};

/// Key-value schema.
const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key   TEXT PRIMARY KEY,
        value BLOB NOT NULL
    );
";

/// [`KvStore`] backed by a `SQLite` database.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database cannot be opened or
    /// the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database. Test helper.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn read_sync(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }
}

impl KvStore for SqliteStore {
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Self::read_sync(&conn, key)
        })
    }

    fn conditional_put<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        precondition: Precondition,
    ) -> BoxFuture<'a, Result<PutOutcome, StoreError>> {
        Box::pin(async move {
            let mut conn = self
                .conn
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let tx = conn.transaction()?;

            let holds = match &precondition {
                Precondition::ValueEquals { key, expected } => {
                    Self::read_sync(&tx, key)?.is_some_and(|v| &v == expected)
                },
                Precondition::KeyAbsent { key } => Self::read_sync(&tx, key)?.is_none(),
            };
            if !holds {
                // Nothing written; the implicit rollback is a no-op.
                return Ok(PutOutcome::PredicateFailed);
            }

            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            tx.commit()?;
            Ok(PutOutcome::Committed)
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn read_absent_key() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.read("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn conditional_put_matrix() {
        let store = SqliteStore::in_memory().unwrap();

        // Claim the leader key while absent.
        let outcome = store
            .conditional_put(
                "tso/leader",
                b"node-a".to_vec(),
                Precondition::KeyAbsent {
                    key: "tso/leader".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Committed);

        // Leader-conditional save succeeds while the identity matches.
        let outcome = store
            .conditional_put(
                "tso/timestamp",
                vec![0xAA; 8],
                Precondition::ValueEquals {
                    key: "tso/leader".to_string(),
                    expected: b"node-a".to_vec(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Committed);

        // And fails atomically once the identity differs.
        let outcome = store
            .conditional_put(
                "tso/timestamp",
                vec![0xBB; 8],
                Precondition::ValueEquals {
                    key: "tso/leader".to_string(),
                    expected: b"node-b".to_vec(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::PredicateFailed);
        assert_eq!(
            store.read("tso/timestamp").await.unwrap(),
            Some(vec![0xAA; 8])
        );
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tso.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .conditional_put(
                    "tso/timestamp",
                    vec![1, 2, 3, 4, 5, 6, 7, 8],
                    Precondition::KeyAbsent {
                        key: "tso/timestamp".to_string(),
                    },
                )
                .await
                .unwrap();
        }
        // Drop simulates a process restart.

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.read("tso/timestamp").await.unwrap(),
            Some(vec![1, 2, 3, 4, 5, 6, 7, 8])
        );
    }
}
