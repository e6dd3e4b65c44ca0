//! SQLite backend for the result cache.
//!
//! One connection per operation, WAL journaling, NORMAL synchronous writes,
//! in-memory temp store, shared in-process cache, and a bounded busy wait so
//! concurrent writers retry instead of failing fast. Batch statements stay
//! under SQLite's parameter ceiling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, params_from_iter, Connection, OpenFlags};

use super::{CacheEntry, CacheError};

/// Upper bound on SQL parameters per statement (SQLite's default limit is
/// 999; stay under it).
const MAX_SQL_PARAMS: usize = 900;

/// Bounded wait on a locked database before surfacing `Transient` contention.
const BUSY_TIMEOUT: Duration = Duration::from_millis(2_000);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    key         TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    payload     BLOB NOT NULL,
    updated_utc INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_kind_updated
    ON cache_entries (kind, updated_utc);
";

/// Path-holding handle; every operation opens its own scoped connection.
pub(crate) struct CacheDb {
    path: PathBuf,
}

impl CacheDb {
    /// Create the cache directory and initialize the schema.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        let db = Self {
            path: dir.join("cache.db"),
        };
        let conn = db.connect()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(db)
    }

    fn connect(&self) -> Result<Connection, CacheError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_SHARED_CACHE,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        Ok(conn)
    }

    /// Fetch payloads for the given keys; absent keys are simply missing
    /// from the result.
    pub fn load(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, CacheError> {
        let mut out = HashMap::new();
        if keys.is_empty() {
            return Ok(out);
        }
        let conn = self.connect()?;
        for chunk in keys.chunks(MAX_SQL_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql =
                format!("SELECT key, payload FROM cache_entries WHERE key IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            for row in rows {
                let (key, payload) = row?;
                out.insert(key, payload);
            }
        }
        Ok(out)
    }

    /// Insert or replace entries in a single transaction.
    pub fn upsert(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cache_entries (key, kind, payload, updated_utc)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     kind = excluded.kind,
                     payload = excluded.payload,
                     updated_utc = excluded.updated_utc",
            )?;
            let now = unix_seconds();
            for entry in entries {
                stmt.execute(params![
                    entry.key,
                    entry.kind.as_str(),
                    entry.payload,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove the given keys. Returns the number of rows removed.
    pub fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let conn = self.connect()?;
        let mut removed = 0;
        for chunk in keys.chunks(MAX_SQL_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("DELETE FROM cache_entries WHERE key IN ({placeholders})");
            removed += conn.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        Ok(removed)
    }

    /// Remove every entry of one kind.
    pub fn clear_kind(&self, kind: &str) -> Result<usize, CacheError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM cache_entries WHERE kind = ?1", params![kind])?)
    }

    /// Remove everything.
    pub fn clear_all(&self) -> Result<usize, CacheError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM cache_entries", [])?)
    }

    /// Total persisted entries.
    pub fn count(&self) -> Result<u64, CacheError> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Persisted entries of one kind.
    pub fn count_kind(&self, kind: &str) -> Result<u64, CacheError> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE kind = ?1",
            params![kind],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::super::EntryKind;
    use super::*;
    use tempfile::TempDir;

    fn entry(key: &str, kind: EntryKind, payload: &[u8]) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            kind,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_upsert_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();
        db.upsert(&[
            entry("k1", EntryKind::Pilot, b"one"),
            entry("k2", EntryKind::Full, b"two"),
        ])
        .unwrap();

        let loaded = db.load(&["k1".to_string(), "k2".to_string(), "k3".to_string()]).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["k1"], b"one");
        assert_eq!(loaded["k2"], b"two");
    }

    #[test]
    fn test_upsert_replaces() {
        let dir = TempDir::new().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();
        db.upsert(&[entry("k1", EntryKind::Pilot, b"old")]).unwrap();
        db.upsert(&[entry("k1", EntryKind::Full, b"new")]).unwrap();
        let loaded = db.load(&["k1".to_string()]).unwrap();
        assert_eq!(loaded["k1"], b"new");
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.count_kind("full").unwrap(), 1);
    }

    #[test]
    fn test_clear_kind() {
        let dir = TempDir::new().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();
        db.upsert(&[
            entry("k1", EntryKind::Pilot, b"a"),
            entry("k2", EntryKind::Full, b"b"),
            entry("k3", EntryKind::Pilot, b"c"),
        ])
        .unwrap();
        assert_eq!(db.clear_kind("pilot").unwrap(), 2);
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.clear_kind("full").unwrap(), 1);
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_large_batch_exceeds_param_limit() {
        let dir = TempDir::new().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();
        let entries: Vec<CacheEntry> = (0..2_000)
            .map(|i| entry(&format!("key{i:05}"), EntryKind::Pilot, b"x"))
            .collect();
        db.upsert(&entries).unwrap();
        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        let loaded = db.load(&keys).unwrap();
        assert_eq!(loaded.len(), 2_000);
        assert_eq!(db.delete(&keys).unwrap(), 2_000);
        assert_eq!(db.count().unwrap(), 0);
    }
}
