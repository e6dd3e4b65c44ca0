//! Content-addressed result cache with write-behind persistence.
//!
//! Entries are keyed by the deterministic fingerprints from [`key`] and
//! persisted in an embedded SQLite database ([`db`]). With async writes
//! enabled, `save` buffers entries and a single writer thread drains them in
//! batches; loads overlay the pending buffer so a save is visible to any
//! subsequent load in the same process. Bulk removal bumps a monotonic epoch
//! instead of scanning the buffer: stale pending entries become invisible to
//! loads and ineligible for the next drain.

mod db;
pub mod key;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use db::CacheDb;

/// Cache I/O failure. Reads degrade to empty results at the store level;
/// this surfaces from `open` and synchronous writes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fidelity class of a cached result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Low-turn pruning evaluation; droppable under backpressure.
    Pilot,
    /// Authoritative full-fidelity evaluation.
    Full,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Pilot => "pilot",
            EntryKind::Full => "full",
        }
    }
}

/// One keyed payload headed for (or read from) the store.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: String,
    pub kind: EntryKind,
    pub payload: Vec<u8>,
}

/// Store tuning.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Buffer writes and drain them on a worker thread.
    pub async_writes: bool,
    /// Pending-buffer bound; pilot entries past it are dropped and counted.
    pub max_pending_entries: usize,
    /// Writer wakes at least this often even without a signal.
    pub writer_flush_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            async_writes: true,
            max_pending_entries: 8_192,
            writer_flush_interval: Duration::from_millis(200),
        }
    }
}

/// Observability counters for one store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub pending: usize,
    pub peak_pending: usize,
    pub dropped_pilot: u64,
    pub write_errors: u64,
    pub read_errors: u64,
}

struct PendingEntry {
    kind: EntryKind,
    payload: Vec<u8>,
    epoch: u64,
}

struct Shared {
    db: Mutex<CacheDb>,
    pending: Mutex<HashMap<String, PendingEntry>>,
    signal: Condvar,
    epoch: AtomicU64,
    accepting: AtomicBool,
    shutdown: AtomicBool,
    in_flight: AtomicBool,
    dropped_pilot: AtomicU64,
    write_errors: AtomicU64,
    read_errors: AtomicU64,
    peak_pending: AtomicUsize,
}

/// Persistent keyed store. See the module docs for the write-behind and
/// epoch semantics.
pub struct CacheStore {
    shared: Arc<Shared>,
    writer: Option<JoinHandle<()>>,
    config: CacheConfig,
}

impl CacheStore {
    /// Open (or create) `<dir>/cache.db` and start the writer thread when
    /// async writes are enabled.
    pub fn open(dir: impl AsRef<Path>, config: CacheConfig) -> Result<Self, CacheError> {
        let shared = Arc::new(Shared {
            db: Mutex::new(CacheDb::open(dir.as_ref())?),
            pending: Mutex::new(HashMap::new()),
            signal: Condvar::new(),
            epoch: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            dropped_pilot: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            peak_pending: AtomicUsize::new(0),
        });
        let writer = if config.async_writes {
            let shared = Arc::clone(&shared);
            let interval = config.writer_flush_interval;
            Some(
                std::thread::Builder::new()
                    .name("cache-writer".to_string())
                    .spawn(move || writer_loop(&shared, interval))
                    .map_err(CacheError::Io)?,
            )
        } else {
            None
        };
        Ok(Self {
            shared,
            writer,
            config,
        })
    }

    /// Open with default configuration.
    pub fn open_default(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        Self::open(dir, CacheConfig::default())
    }

    /// Fetch payloads for the given keys; only hits are returned. Read
    /// failures degrade to the pending overlay alone.
    pub fn load(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        let mut unique: Vec<String> = keys.to_vec();
        unique.sort();
        unique.dedup();

        let mut out = {
            let db = self.shared.db.lock().unwrap();
            match db.load(&unique) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!("cache load degraded to empty: {e}");
                    self.shared.read_errors.fetch_add(1, Ordering::Relaxed);
                    HashMap::new()
                }
            }
        };

        if self.config.async_writes {
            let epoch = self.shared.epoch.load(Ordering::Acquire);
            let pending = self.shared.pending.lock().unwrap();
            for key in &unique {
                if let Some(entry) = pending.get(key) {
                    if entry.epoch == epoch {
                        out.insert(key.clone(), entry.payload.clone());
                    }
                }
            }
        }
        out
    }

    /// Persist entries. Synchronous mode upserts transactionally; async mode
    /// buffers and signals the writer. Pilot entries past the pending bound
    /// are dropped and counted.
    pub fn save(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        if !self.shared.accepting.load(Ordering::Acquire) {
            log::debug!("cache save ignored after shutdown ({} entries)", entries.len());
            return Ok(());
        }
        if !self.config.async_writes {
            return self.shared.db.lock().unwrap().upsert(&entries);
        }

        let epoch = self.shared.epoch.load(Ordering::Acquire);
        {
            let mut pending = self.shared.pending.lock().unwrap();
            for entry in entries {
                if pending.len() >= self.config.max_pending_entries
                    && entry.kind == EntryKind::Pilot
                    && !pending.contains_key(&entry.key)
                {
                    self.shared.dropped_pilot.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                pending.insert(
                    entry.key,
                    PendingEntry {
                        kind: entry.kind,
                        payload: entry.payload,
                        epoch,
                    },
                );
            }
            self.shared
                .peak_pending
                .fetch_max(pending.len(), Ordering::Relaxed);
        }
        self.shared.signal.notify_one();
        Ok(())
    }

    /// Remove the given keys, invalidating any buffered writes first.
    pub fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        self.invalidate_pending();
        self.shared.db.lock().unwrap().delete(keys)
    }

    /// Remove every entry of one kind.
    pub fn clear_kind(&self, kind: EntryKind) -> Result<usize, CacheError> {
        self.invalidate_pending();
        self.shared.db.lock().unwrap().clear_kind(kind.as_str())
    }

    /// Remove everything.
    pub fn clear_all(&self) -> Result<usize, CacheError> {
        self.invalidate_pending();
        self.shared.db.lock().unwrap().clear_all()
    }

    /// Bump the epoch and drop the buffer: in-flight entries become invisible
    /// to loads and ineligible for the next drain.
    fn invalidate_pending(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.pending.lock().unwrap().clear();
    }

    /// Poll until the pending buffer has fully drained or the deadline
    /// passes. Returns whether the drain completed.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let drained = {
                let pending = self.shared.pending.lock().unwrap();
                pending.is_empty() && !self.shared.in_flight.load(Ordering::Acquire)
            };
            if drained {
                return true;
            }
            self.shared.signal.notify_one();
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stop accepting writes, drain within the budget, and join the writer.
    /// Returns whether the drain completed.
    pub fn shutdown(&mut self, drain_timeout: Duration) -> bool {
        self.shared.accepting.store(false, Ordering::Release);
        let drained = self.flush(drain_timeout);
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.signal.notify_all();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
        drained
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pending: self.shared.pending.lock().unwrap().len(),
            peak_pending: self.shared.peak_pending.load(Ordering::Relaxed),
            dropped_pilot: self.shared.dropped_pilot.load(Ordering::Relaxed),
            write_errors: self.shared.write_errors.load(Ordering::Relaxed),
            read_errors: self.shared.read_errors.load(Ordering::Relaxed),
        }
    }

    /// Rows currently persisted (excluding the pending buffer).
    pub fn persisted_count(&self) -> Result<u64, CacheError> {
        self.shared.db.lock().unwrap().count()
    }

    /// Persisted rows of one kind.
    pub fn persisted_count_kind(&self, kind: EntryKind) -> Result<u64, CacheError> {
        self.shared.db.lock().unwrap().count_kind(kind.as_str())
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.shutdown(Duration::from_secs(5));
        }
    }
}

/// Writer thread: wait for a signal (or the flush interval), snapshot-and-swap
/// the buffer, filter by the current epoch, upsert the batch.
fn writer_loop(shared: &Shared, flush_interval: Duration) {
    loop {
        let mut pending = shared.pending.lock().unwrap();
        if pending.is_empty() {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            let (guard, _) = shared.signal.wait_timeout(pending, flush_interval).unwrap();
            pending = guard;
            if pending.is_empty() {
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
        }

        shared.in_flight.store(true, Ordering::Release);
        let snapshot = std::mem::take(&mut *pending);
        drop(pending);

        {
            let db = shared.db.lock().unwrap();
            let epoch = shared.epoch.load(Ordering::Acquire);
            let batch: Vec<CacheEntry> = snapshot
                .into_iter()
                .filter(|(_, entry)| entry.epoch == epoch)
                .map(|(key, entry)| CacheEntry {
                    key,
                    kind: entry.kind,
                    payload: entry.payload,
                })
                .collect();
            if !batch.is_empty() {
                match db.upsert(&batch) {
                    Ok(()) => log::debug!("cache writer persisted {} entries", batch.len()),
                    Err(e) => {
                        log::warn!("cache writer dropped {} entries: {e}", batch.len());
                        shared
                            .write_errors
                            .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    }
                }
            }
        }
        shared.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(key: &str, kind: EntryKind, payload: &[u8]) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            kind,
            payload: payload.to_vec(),
        }
    }

    fn sync_config() -> CacheConfig {
        CacheConfig {
            async_writes: false,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_sync_save_then_load() {
        // P8: byte-for-byte coherence on a synchronous store.
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path(), sync_config()).unwrap();
        store
            .save(vec![entry("a", EntryKind::Full, b"payload-a")])
            .unwrap();
        let loaded = store.load(&["a".to_string()]);
        assert_eq!(loaded["a"], b"payload-a");
    }

    #[test]
    fn test_async_overlay_before_drain() {
        // P9: pending entries are visible before the writer drains.
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            // Long interval so the writer stays asleep during the test.
            writer_flush_interval: Duration::from_secs(60),
            ..CacheConfig::default()
        };
        let mut store = CacheStore::open(dir.path(), config).unwrap();
        store
            .save(vec![entry("a", EntryKind::Pilot, b"overlay")])
            .unwrap();
        let loaded = store.load(&["a".to_string()]);
        assert_eq!(loaded["a"], b"overlay");
        store.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_clear_all_hides_pending() {
        // P9: after clear_all, loads see nothing even before a drain.
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            writer_flush_interval: Duration::from_secs(60),
            ..CacheConfig::default()
        };
        let mut store = CacheStore::open(dir.path(), config).unwrap();
        store
            .save(vec![entry("a", EntryKind::Pilot, b"stale")])
            .unwrap();
        store.clear_all().unwrap();
        assert!(store.load(&["a".to_string()]).is_empty());
        store.shutdown(Duration::from_secs(5));
        assert_eq!(store.persisted_count().unwrap(), 0);
    }

    #[test]
    fn test_flush_persists_buffered_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::open_default(dir.path()).unwrap();
        store
            .save(vec![
                entry("a", EntryKind::Pilot, b"1"),
                entry("b", EntryKind::Full, b"2"),
            ])
            .unwrap();
        assert!(store.flush(Duration::from_secs(5)));
        assert_eq!(store.persisted_count().unwrap(), 2);
        store.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_pilot_dropped_at_capacity() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            max_pending_entries: 2,
            writer_flush_interval: Duration::from_secs(60),
            ..CacheConfig::default()
        };
        let mut store = CacheStore::open(dir.path(), config).unwrap();
        store
            .save(vec![
                entry("a", EntryKind::Pilot, b"1"),
                entry("b", EntryKind::Pilot, b"2"),
                entry("c", EntryKind::Pilot, b"3"),
                entry("d", EntryKind::Full, b"4"),
            ])
            .unwrap();
        let stats = store.stats();
        assert_eq!(stats.dropped_pilot, 1);
        // Full entries are never dropped.
        assert_eq!(store.load(&["d".to_string()])["d"], b"4");
        assert!(store.load(&["c".to_string()]).is_empty());
        store.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_clear_kind_lifecycle() {
        // S8: pilot entries cleared, full entry survives, then nothing.
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::open_default(dir.path()).unwrap();
        store
            .save(vec![
                entry("k1", EntryKind::Pilot, b"1"),
                entry("k2", EntryKind::Full, b"2"),
                entry("k3", EntryKind::Pilot, b"3"),
            ])
            .unwrap();
        assert!(store.flush(Duration::from_secs(5)));

        store.clear_kind(EntryKind::Pilot).unwrap();
        let loaded = store.load(&["k1".to_string(), "k2".to_string(), "k3".to_string()]);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["k2"], b"2");

        store.clear_kind(EntryKind::Full).unwrap();
        assert_eq!(store.persisted_count().unwrap(), 0);
        store.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_shutdown_drains() {
        // C7-a: persisted state after shutdown equals the accepted snapshot.
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::open_default(dir.path()).unwrap();
        for i in 0..50 {
            store
                .save(vec![entry(
                    &format!("k{i}"),
                    EntryKind::Full,
                    format!("p{i}").as_bytes(),
                )])
                .unwrap();
        }
        assert!(store.shutdown(Duration::from_secs(10)));
        assert_eq!(store.persisted_count().unwrap(), 50);
        // Saves after shutdown are ignored.
        store
            .save(vec![entry("late", EntryKind::Full, b"x")])
            .unwrap();
        assert_eq!(store.persisted_count().unwrap(), 50);
    }

    #[test]
    fn test_save_visible_to_load_after_drain() {
        // C7-c via the persisted path.
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::open_default(dir.path()).unwrap();
        store
            .save(vec![entry("a", EntryKind::Full, b"persisted")])
            .unwrap();
        assert!(store.flush(Duration::from_secs(5)));
        store.shutdown(Duration::from_secs(5));

        // A fresh store over the same directory sees the entry.
        let reopened = CacheStore::open(dir.path(), sync_config()).unwrap();
        assert_eq!(reopened.load(&["a".to_string()])["a"], b"persisted");
    }
}
