//! The append-only map.
//!
//! A `Map<K, V>` view over one sqlite table with a bounded in-memory
//! read-through cache. Keys are never overwritten: once a row exists its
//! value is permanent. The cache therefore only ever moves an entry from
//! "unknown" or "absent" to "present"; the single non-monotonic step is a
//! cached absence being corrected when an insert observes the row.

use crate::error::StoreError;
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

const DEFAULT_CACHE_CAPACITY: usize = 4096;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Durable append-only `K -> V` map.
pub struct AppendOnlyMap<K, V> {
    conn: Mutex<Connection>,
    cache: Mutex<LruCache<K, Option<V>>>,
    table: String,
}

impl<K, V> std::fmt::Debug for AppendOnlyMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendOnlyMap")
            .field("table", &self.table)
            .finish()
    }
}

impl<K, V> AppendOnlyMap<K, V>
where
    K: Serialize + DeserializeOwned + Eq + Hash + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    /// Open (or create) the map backed by the given database file.
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, table)
    }

    /// Fully in-memory map; contents vanish with the value.
    pub fn in_memory(table: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(StoreError::BadTableName(table.to_string()));
        }
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (key BLOB PRIMARY KEY, value BLOB NOT NULL)",
                table
            ),
            [],
        )?;
        Ok(AppendOnlyMap {
            conn: Mutex::new(conn),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).expect("non-zero capacity"),
            )),
            table: table.to_string(),
        })
    }

    /// Look a key up, populating the cache with presence or absence.
    pub fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        if let Some(cached) = self.cache.lock().expect("cache lock").get(key) {
            return Ok(cached.clone());
        }
        let key_bytes = encode(key)?;
        let row: Option<Vec<u8>> = {
            let conn = self.conn.lock().expect("db lock");
            conn.query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.table),
                params![key_bytes],
                |r| r.get(0),
            )
            .optional()?
        };
        let value = match row {
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };
        self.cache
            .lock()
            .expect("cache lock")
            .put(key.clone(), value.clone());
        Ok(value)
    }

    /// Strict insert. The caller vouches the key is fresh; a key the cache
    /// already knows to be present is rejected, and a duplicate that slips
    /// past the cache surfaces as the primary-key constraint error.
    pub fn set(&self, key: K, value: V) -> Result<(), StoreError> {
        if let Some(Some(_)) = self.cache.lock().expect("cache lock").peek(&key) {
            return Err(StoreError::DuplicateKey);
        }
        let key_bytes = encode(&key)?;
        let value_bytes = encode(&value)?;
        {
            let conn = self.conn.lock().expect("db lock");
            conn.execute(
                &format!("INSERT INTO {} (key, value) VALUES (?1, ?2)", self.table),
                params![key_bytes, value_bytes],
            )?;
        }
        self.cache
            .lock()
            .expect("cache lock")
            .put(key, Some(value));
        Ok(())
    }

    /// Insert unless the key already exists. Returns whether this call won.
    ///
    /// On loss the stored value is left untouched; a stale cached absence is
    /// corrected from the row.
    pub fn add_if_absent(&self, key: K, value: V) -> Result<bool, StoreError> {
        let key_bytes = encode(&key)?;
        let value_bytes = encode(&value)?;
        let inserted = {
            let conn = self.conn.lock().expect("db lock");
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (key, value) VALUES (?1, ?2)",
                    self.table
                ),
                params![key_bytes, value_bytes],
            )? == 1
        };
        if inserted {
            self.cache
                .lock()
                .expect("cache lock")
                .put(key, Some(value));
            return Ok(true);
        }
        tracing::warn!(table = %self.table, "insert lost to an existing row, keeping stored value");
        let stored: Option<Vec<u8>> = {
            let conn = self.conn.lock().expect("db lock");
            conn.query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.table),
                params![key_bytes],
                |r| r.get(0),
            )
            .optional()?
        };
        if let Some(bytes) = stored {
            let stored_value: V = decode(&bytes)?;
            self.cache
                .lock()
                .expect("cache lock")
                .put(key, Some(stored_value));
        }
        Ok(false)
    }

    /// Run `f` against a single durable transaction. All inserts made
    /// through the handle land atomically; if `f` fails nothing is written
    /// and the cache is untouched.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut MapTransaction<'_, '_, K, V>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().expect("db lock");
        let tx = conn.transaction()?;
        let mut pending: Vec<(K, V)> = Vec::new();
        let out = {
            let mut handle = MapTransaction {
                tx: &tx,
                table: &self.table,
                pending: &mut pending,
            };
            f(&mut handle)?
        };
        tx.commit()?;
        let mut cache = self.cache.lock().expect("cache lock");
        for (key, value) in pending {
            cache.put(key, Some(value));
        }
        Ok(out)
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("db lock");
        let count: u64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |r| {
                r.get(0)
            })?;
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Administrative reset. Not safe against concurrent writers.
    pub fn clear(&self) -> Result<(), StoreError> {
        {
            let conn = self.conn.lock().expect("db lock");
            conn.execute(&format!("DELETE FROM {}", self.table), [])?;
        }
        self.cache.lock().expect("cache lock").clear();
        Ok(())
    }
}

/// Short-lived handle over one open sqlite transaction.
pub struct MapTransaction<'t, 'conn, K, V> {
    tx: &'t rusqlite::Transaction<'conn>,
    table: &'t str,
    pending: &'t mut Vec<(K, V)>,
}

impl<K, V> MapTransaction<'_, '_, K, V>
where
    K: Serialize + DeserializeOwned + Eq + Hash + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    /// Read within the transaction, bypassing the cache.
    pub fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        let key_bytes = encode(key)?;
        let row: Option<Vec<u8>> = self
            .tx
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.table),
                params![key_bytes],
                |r| r.get(0),
            )
            .optional()?;
        match row {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert unless present; queues the cache update for commit time.
    pub fn insert_new(&mut self, key: K, value: V) -> Result<bool, StoreError> {
        let key_bytes = encode(&key)?;
        let value_bytes = encode(&value)?;
        let inserted = self.tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (key, value) VALUES (?1, ?2)",
                self.table
            ),
            params![key_bytes, value_bytes],
        )? == 1;
        if inserted {
            self.pending.push((key, value));
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> AppendOnlyMap<String, u64> {
        AppendOnlyMap::in_memory("entries").unwrap()
    }

    #[test]
    fn test_get_absent() {
        let m = map();
        assert_eq!(m.get(&"missing".to_string()).unwrap(), None);
    }

    #[test]
    fn test_set_then_get() {
        let m = map();
        m.set("a".to_string(), 1).unwrap();
        assert_eq!(m.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(m.len().unwrap(), 1);
    }

    #[test]
    fn test_set_duplicate_rejected() {
        let m = map();
        m.set("a".to_string(), 1).unwrap();
        assert!(matches!(
            m.set("a".to_string(), 2),
            Err(StoreError::DuplicateKey)
        ));
        assert_eq!(m.get(&"a".to_string()).unwrap(), Some(1));
    }

    #[test]
    fn test_add_if_absent_idempotent() {
        let m = map();
        assert!(m.add_if_absent("a".to_string(), 1).unwrap());
        assert!(!m.add_if_absent("a".to_string(), 2).unwrap());
        // the losing value never replaces the stored one
        assert_eq!(m.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(m.len().unwrap(), 1);
    }

    #[test]
    fn test_add_if_absent_corrects_cached_absence() {
        let m = map();
        // Prime the cache with an absence, then insert through the map.
        assert_eq!(m.get(&"a".to_string()).unwrap(), None);
        assert!(m.add_if_absent("a".to_string(), 7).unwrap());
        assert_eq!(m.get(&"a".to_string()).unwrap(), Some(7));
    }

    #[test]
    fn test_clear() {
        let m = map();
        m.set("a".to_string(), 1).unwrap();
        m.set("b".to_string(), 2).unwrap();
        m.clear().unwrap();
        assert!(m.is_empty().unwrap());
        assert_eq!(m.get(&"a".to_string()).unwrap(), None);
    }

    #[test]
    fn test_transaction_commits_atomically() {
        let m = map();
        m.transaction(|tx| {
            assert!(tx.insert_new("a".to_string(), 1)?);
            assert!(tx.insert_new("b".to_string(), 2)?);
            Ok(())
        })
        .unwrap();
        assert_eq!(m.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(m.get(&"b".to_string()).unwrap(), Some(2));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let m = map();
        let result: Result<(), StoreError> = m.transaction(|tx| {
            tx.insert_new("a".to_string(), 1)?;
            Err(StoreError::Codec("forced failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(m.get(&"a".to_string()).unwrap(), None);
        assert_eq!(m.len().unwrap(), 0);
    }

    #[test]
    fn test_transaction_sees_own_writes() {
        let m = map();
        m.transaction(|tx| {
            tx.insert_new("a".to_string(), 1)?;
            assert_eq!(tx.get(&"a".to_string())?, Some(1));
            assert!(!tx.insert_new("a".to_string(), 9)?);
            Ok(())
        })
        .unwrap();
        assert_eq!(m.get(&"a".to_string()).unwrap(), Some(1));
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let err = AppendOnlyMap::<String, u64>::in_memory("Robert'); DROP").unwrap_err();
        assert!(matches!(err, StoreError::BadTableName(_)));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let m: AppendOnlyMap<String, u64> = AppendOnlyMap::open(&path, "entries").unwrap();
            m.set("a".to_string(), 42).unwrap();
        }
        let m: AppendOnlyMap<String, u64> = AppendOnlyMap::open(&path, "entries").unwrap();
        assert_eq!(m.get(&"a".to_string()).unwrap(), Some(42));
    }
}
