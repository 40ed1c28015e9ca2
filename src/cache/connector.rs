//! File Connector Module
//!
//! Cache connector over a single redb store file. Every operation runs in one
//! short-lived store transaction; the store serializes writers and lets
//! readers proceed concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use redb::{Database, Durability, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use crate::cache::codec::{decode_value, encode_value};
use crate::cache::entry::{current_timestamp_ms, is_expired, read_expiry, StoredEntry};
use crate::config::Config;
use crate::error::{CacheError, Result};

/// Table holding every cache record
const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

// == File Connector ==
/// Cache connector backed by a persistent store file.
///
/// Share it across threads behind an `Arc`. The handle slot lock is only
/// held while the handle is cloned or swapped, never across a transaction.
pub struct FileConnector {
    /// Location of the store file
    path: PathBuf,
    /// Open store handle, None before `open` and after `close`
    db: RwLock<Option<Arc<Database>>>,
}

impl FileConnector {
    // == Constructor ==
    /// Creates a connector for the store at `path` without touching the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: RwLock::new(None),
        }
    }

    /// Creates a connector for the store configured in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.store.clone())
    }

    /// Returns the configured store path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while a store handle is held.
    pub fn is_open(&self) -> bool {
        self.db.read().is_some()
    }

    // == Open ==
    /// Opens the store file, creating it if absent.
    ///
    /// Opening an already open connector is a no-op.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.db.write();
        if slot.is_some() {
            debug!("Store {} already open", self.path.display());
            return Ok(());
        }

        if self.path.as_os_str().is_empty() {
            return Err(CacheError::StoreOpen("store path is empty".to_string()));
        }

        let db = Database::create(&self.path)
            .map_err(|e| CacheError::StoreOpen(format!("{}: {}", self.path.display(), e)))?;

        // Make sure the table exists so read transactions can open it
        let write_txn = db
            .begin_write()
            .map_err(|e| CacheError::StoreOpen(e.to_string()))?;
        write_txn
            .open_table(TABLE)
            .map_err(|e| CacheError::StoreOpen(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| CacheError::StoreOpen(e.to_string()))?;

        *slot = Some(Arc::new(db));
        info!("Opened cache store at {}", self.path.display());
        Ok(())
    }

    // == Close ==
    /// Releases the store handle.
    ///
    /// The handle always leaves the connector, so later operations report
    /// `NotConnected`. A final durable commit flushes the store before the
    /// handle is dropped; operations still running keep their own clone and
    /// the file is released when the last one finishes. Closing a connector
    /// that was never opened is a no-op.
    ///
    /// # Returns
    /// - `Err(StoreClose)` if the final flush fails; the handle is released anyway
    pub fn close(&self) -> Result<()> {
        let Some(db) = self.db.write().take() else {
            return Ok(());
        };

        let flushed = flush(&db);
        drop(db);

        match flushed {
            Ok(()) => {
                info!("Closed cache store at {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                warn!("Closed cache store at {} without flush: {}", self.path.display(), e);
                Err(CacheError::StoreClose(e.to_string()))
            }
        }
    }

    // == Read ==
    /// Retrieves the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent or expired.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.handle()?;
        validate_key(key)?;

        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let Some(entry) = live_entry(&table, key, current_timestamp_ms())? else {
            debug!("Read miss: {}", key);
            return Ok(None);
        };

        debug!("Read hit: {}", key);
        decode_value(&entry.text).map(Some)
    }

    // == Write ==
    /// Stores `value` under `key`, replacing any previous value and expiry.
    ///
    /// # Arguments
    /// * `key` - Non-empty key to store under
    /// * `value` - Opaque bytes, must not be empty
    /// * `ttl` - Time to live, `Duration::ZERO` stores without expiration
    pub fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let db = self.handle()?;
        validate_key(key)?;

        let text = encode_value(value);
        if text.is_empty() {
            return Err(CacheError::EmptyValue);
        }
        let record = StoredEntry::new(text, ttl).to_bytes();

        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE)?;
            table.insert(key, record.as_slice())?;
        }
        write_txn.commit()?;

        debug!("Wrote {} ({} bytes, ttl={:?})", key, value.len(), ttl);
        Ok(())
    }

    // == Exists ==
    /// Returns true iff `key` is present and unexpired.
    pub fn exists(&self, key: &str) -> Result<bool> {
        let db = self.handle()?;
        validate_key(key)?;

        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let found = match table.get(key)? {
            Some(guard) => !is_expired(read_expiry(guard.value())?, current_timestamp_ms()),
            None => false,
        };

        Ok(found)
    }

    // == Delete ==
    /// Removes `key`. Deleting an absent key succeeds.
    pub fn delete(&self, key: &str) -> Result<()> {
        let db = self.handle()?;
        validate_key(key)?;

        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TABLE)?;
            let previous = table.remove(key)?;
            previous.is_some()
        };
        write_txn.commit()?;

        debug!("Deleted {} (present={})", key, removed);
        Ok(())
    }

    // == Sequence ==
    /// Adds `step` to the counter at `key` and returns the new value.
    ///
    /// A missing, expired, corrupt or non-numeric value counts as `start`.
    /// The read, the addition and the write share one write transaction, so
    /// concurrent callers never lose increments.
    ///
    /// # Arguments
    /// * `key` - Key holding the decimal counter
    /// * `start` - Value assumed when no usable counter is stored
    /// * `step` - Amount to add, may be negative
    /// * `ttl` - Expiration applied to the written counter, as in `write`
    ///
    /// # Returns
    /// The counter value after adding `step`.
    pub fn sequence(&self, key: &str, start: i64, step: i64, ttl: Duration) -> Result<i64> {
        let db = self.handle()?;
        validate_key(key)?;

        let write_txn = db.begin_write()?;
        let value = {
            let mut table = write_txn.open_table(TABLE)?;

            let current = match live_entry(&table, key, current_timestamp_ms()) {
                Ok(Some(entry)) => parse_counter(key, &entry.text).unwrap_or(start),
                Ok(None) => start,
                Err(CacheError::Decode(reason)) => {
                    warn!("Sequence {} has a corrupt record, restarting: {}", key, reason);
                    start
                }
                Err(e) => return Err(e),
            };

            let value = current.checked_add(step).ok_or_else(|| {
                CacheError::SequenceOverflow(format!("{} + {} at {}", current, step, key))
            })?;

            let record = StoredEntry::new(encode_value(value.to_string().as_bytes()), ttl);
            table.insert(key, record.to_bytes().as_slice())?;
            value
        };
        write_txn.commit()?;

        debug!("Sequence {} -> {}", key, value);
        Ok(value)
    }

    // == Keys ==
    /// Lists live keys starting with `prefix` in ascending order.
    ///
    /// An empty prefix lists every key.
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let db = self.handle()?;

        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let now = current_timestamp_ms();

        let mut keys = Vec::new();
        for item in table.range(prefix..)? {
            let (key, record) = item?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            // Unreadable headers are listed; `read` reports the corruption
            if matches!(read_expiry(record.value()), Ok(expires_at) if is_expired(expires_at, now))
            {
                continue;
            }
            keys.push(key.to_string());
        }

        debug!("Keys {:?}: {} found", prefix, keys.len());
        Ok(keys)
    }

    // == Clear ==
    /// Removes every key starting with `prefix` and returns how many went.
    ///
    /// Enumeration and removal share one write transaction: either all
    /// matching keys are removed or none are.
    pub fn clear(&self, prefix: &str) -> Result<usize> {
        let db = self.handle()?;

        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TABLE)?;
            let doomed = prefixed_keys(&table, prefix)?;
            for key in &doomed {
                table.remove(key.as_str())?;
            }
            doomed.len()
        };
        write_txn.commit()?;

        info!("Cleared {} keys with prefix {:?}", removed, prefix);
        Ok(removed)
    }

    // == Purge Expired ==
    /// Physically removes every expired record.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let db = self.handle()?;

        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TABLE)?;
            let now = current_timestamp_ms();

            let mut expired = Vec::new();
            for item in table.iter()? {
                let (key, record) = item?;
                // Corrupt records are left for `read` to report
                if let Ok(expires_at) = read_expiry(record.value()) {
                    if is_expired(expires_at, now) {
                        expired.push(key.value().to_string());
                    }
                }
            }

            for key in &expired {
                table.remove(key.as_str())?;
            }
            expired.len()
        };
        write_txn.commit()?;

        Ok(removed)
    }

    /// Clones the store handle out of the slot.
    fn handle(&self) -> Result<Arc<Database>> {
        self.db.read().clone().ok_or(CacheError::NotConnected)
    }
}

impl std::fmt::Debug for FileConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConnector")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Commits an empty transaction with immediate durability.
fn flush(db: &Database) -> std::result::Result<(), redb::Error> {
    let mut write_txn = db.begin_write()?;
    write_txn.set_durability(Durability::Immediate);
    write_txn.commit()?;
    Ok(())
}

/// Rejects keys the cache never stores.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

/// Looks up `key`, treating expired records as absent.
fn live_entry<T>(table: &T, key: &str, now_ms: u64) -> Result<Option<StoredEntry>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let Some(guard) = table.get(key)? else {
        return Ok(None);
    };

    let entry = StoredEntry::from_bytes(guard.value())?;
    if entry.is_expired_at(now_ms) {
        return Ok(None);
    }
    Ok(Some(entry))
}

/// Collects every key starting with `prefix`, expired or not.
fn prefixed_keys<T>(table: &T, prefix: &str) -> Result<Vec<String>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut keys = Vec::new();
    for item in table.range(prefix..)? {
        let (key, _) = item?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}

/// Parses a stored counter, None when it is not a base-10 integer.
fn parse_counter(key: &str, text: &str) -> Option<i64> {
    let parsed = decode_value(text)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|digits| digits.parse::<i64>().ok());

    if parsed.is_none() {
        warn!("Sequence {} holds a non-numeric value, restarting", key);
    }
    parsed
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use tempfile::TempDir;

    fn open_connector() -> (TempDir, FileConnector) {
        let dir = TempDir::new().unwrap();
        let connector = FileConnector::new(dir.path().join("cache.db"));
        connector.open().unwrap();
        (dir, connector)
    }

    #[test]
    fn test_connector_new_is_closed() {
        let connector = FileConnector::new("store/cache.db");
        assert!(!connector.is_open());
        assert_eq!(connector.path(), Path::new("store/cache.db"));
    }

    #[test]
    fn test_open_twice_is_noop() {
        let (_dir, connector) = open_connector();
        connector.open().unwrap();
        assert!(connector.is_open());
    }

    #[test]
    fn test_open_empty_path() {
        let connector = FileConnector::new("");
        let result = connector.open();
        assert!(matches!(result, Err(CacheError::StoreOpen(_))));
        assert!(!connector.is_open());
    }

    #[test]
    fn test_close_never_opened() {
        let connector = FileConnector::new("store/cache.db");
        connector.close().unwrap();
    }

    #[test]
    fn test_write_and_read() {
        let (_dir, connector) = open_connector();

        connector.write("key1", b"value1", Duration::ZERO).unwrap();
        assert_eq!(connector.read("key1").unwrap(), Some(b"value1".to_vec()));
    }

    #[test]
    fn test_read_miss_is_not_error() {
        let (_dir, connector) = open_connector();
        assert_eq!(connector.read("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_empty_value_rejected_and_previous_kept() {
        let (_dir, connector) = open_connector();

        connector.write("key1", b"value1", Duration::ZERO).unwrap();
        let result = connector.write("key1", b"", Duration::ZERO);

        assert!(matches!(result, Err(CacheError::EmptyValue)));
        assert_eq!(connector.read("key1").unwrap(), Some(b"value1".to_vec()));
    }

    #[test]
    fn test_empty_key_rejected() {
        let (_dir, connector) = open_connector();
        let result = connector.write("", b"value", Duration::ZERO);
        assert!(matches!(result, Err(CacheError::InvalidKey(_))));
    }

    #[test]
    fn test_overwrite_resets_ttl() {
        let (_dir, connector) = open_connector();

        connector.write("key1", b"short", Duration::from_millis(200)).unwrap();
        connector.write("key1", b"forever", Duration::ZERO).unwrap();
        sleep(Duration::from_millis(300));

        assert_eq!(connector.read("key1").unwrap(), Some(b"forever".to_vec()));
    }

    #[test]
    fn test_ttl_expiration() {
        let (_dir, connector) = open_connector();

        connector.write("key1", b"value1", Duration::from_millis(200)).unwrap();
        assert!(connector.exists("key1").unwrap());

        sleep(Duration::from_millis(300));

        assert_eq!(connector.read("key1").unwrap(), None);
        assert!(!connector.exists("key1").unwrap());
        assert!(connector.keys("").unwrap().is_empty());
    }

    #[test]
    fn test_exists() {
        let (_dir, connector) = open_connector();

        assert!(!connector.exists("key1").unwrap());
        connector.write("key1", b"value1", Duration::ZERO).unwrap();
        assert!(connector.exists("key1").unwrap());
    }

    #[test]
    fn test_delete_idempotent() {
        let (_dir, connector) = open_connector();

        connector.write("key1", b"value1", Duration::ZERO).unwrap();
        connector.delete("key1").unwrap();
        connector.delete("key1").unwrap();

        assert_eq!(connector.read("key1").unwrap(), None);
    }

    #[test]
    fn test_sequence_accumulates() {
        let (_dir, connector) = open_connector();

        assert_eq!(connector.sequence("seq", 10, 5, Duration::ZERO).unwrap(), 15);
        assert_eq!(connector.sequence("seq", 10, 5, Duration::ZERO).unwrap(), 20);
        assert_eq!(connector.read("seq").unwrap(), Some(b"20".to_vec()));
    }

    #[test]
    fn test_sequence_negative_step() {
        let (_dir, connector) = open_connector();

        assert_eq!(connector.sequence("seq", 0, -3, Duration::ZERO).unwrap(), -3);
        assert_eq!(connector.sequence("seq", 0, -3, Duration::ZERO).unwrap(), -6);
    }

    #[test]
    fn test_sequence_non_numeric_restarts() {
        let (_dir, connector) = open_connector();

        connector.write("seq", b"not a number", Duration::ZERO).unwrap();
        assert_eq!(connector.sequence("seq", 100, 1, Duration::ZERO).unwrap(), 101);
    }

    #[test]
    fn test_sequence_expired_restarts() {
        let (_dir, connector) = open_connector();

        connector.sequence("seq", 0, 1, Duration::from_millis(200)).unwrap();
        sleep(Duration::from_millis(300));

        assert_eq!(connector.sequence("seq", 0, 1, Duration::ZERO).unwrap(), 1);
    }

    #[test]
    fn test_sequence_overflow_keeps_value() {
        let (_dir, connector) = open_connector();

        connector.sequence("seq", i64::MAX - 1, 1, Duration::ZERO).unwrap();
        let result = connector.sequence("seq", 0, 1, Duration::ZERO);

        assert!(matches!(result, Err(CacheError::SequenceOverflow(_))));
        assert_eq!(
            connector.read("seq").unwrap(),
            Some(i64::MAX.to_string().into_bytes())
        );
    }

    #[test]
    fn test_keys_prefix_order() {
        let (_dir, connector) = open_connector();

        connector.write("b:1", b"x", Duration::ZERO).unwrap();
        connector.write("a:2", b"x", Duration::ZERO).unwrap();
        connector.write("a:1", b"x", Duration::ZERO).unwrap();

        assert_eq!(connector.keys("a:").unwrap(), vec!["a:1", "a:2"]);
        assert_eq!(connector.keys("").unwrap(), vec!["a:1", "a:2", "b:1"]);
        assert!(connector.keys("c:").unwrap().is_empty());
    }

    #[test]
    fn test_clear_prefix() {
        let (_dir, connector) = open_connector();

        connector.write("a:1", b"x", Duration::ZERO).unwrap();
        connector.write("a:2", b"x", Duration::ZERO).unwrap();
        connector.write("b:1", b"y", Duration::ZERO).unwrap();

        assert_eq!(connector.clear("a:").unwrap(), 2);
        assert!(connector.keys("a:").unwrap().is_empty());
        assert_eq!(connector.read("b:1").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn test_purge_expired() {
        let (_dir, connector) = open_connector();

        connector.write("short", b"x", Duration::from_millis(100)).unwrap();
        connector.write("long", b"y", Duration::from_secs(60)).unwrap();
        connector.write("forever", b"z", Duration::ZERO).unwrap();
        sleep(Duration::from_millis(200));

        assert_eq!(connector.purge_expired().unwrap(), 1);
        assert_eq!(connector.keys("").unwrap(), vec!["forever", "long"]);
    }

    #[test]
    fn test_operations_after_close() {
        let (_dir, connector) = open_connector();
        connector.close().unwrap();

        assert!(matches!(connector.read("k"), Err(CacheError::NotConnected)));
        assert!(matches!(
            connector.write("k", b"v", Duration::ZERO),
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(connector.keys(""), Err(CacheError::NotConnected)));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let (_dir, connector) = open_connector();

        connector.write("key1", b"value1", Duration::ZERO).unwrap();
        connector.close().unwrap();
        connector.open().unwrap();

        assert_eq!(connector.read("key1").unwrap(), Some(b"value1".to_vec()));
    }

    fn insert_raw(connector: &FileConnector, key: &str, record: &[u8]) {
        let db = connector.handle().unwrap();
        let write_txn = db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(TABLE).unwrap();
            table.insert(key, record).unwrap();
        }
        write_txn.commit().unwrap();
    }

    #[test]
    fn test_close_releases_while_handle_in_use() {
        let (_dir, connector) = open_connector();
        connector.write("key1", b"value1", Duration::ZERO).unwrap();

        let held = connector.handle().unwrap();
        connector.close().unwrap();

        assert!(!connector.is_open());
        assert!(matches!(connector.read("key1"), Err(CacheError::NotConnected)));

        // The in-flight clone still works until it is dropped
        assert!(held.begin_read().is_ok());
        drop(held);

        connector.open().unwrap();
        assert_eq!(connector.read("key1").unwrap(), Some(b"value1".to_vec()));
    }

    #[test]
    fn test_corrupt_record_is_decode_error() {
        let (_dir, connector) = open_connector();
        insert_raw(&connector, "bad", &[0, 1]);

        assert!(matches!(connector.read("bad"), Err(CacheError::Decode(_))));
        assert!(matches!(connector.exists("bad"), Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_corrupt_base64_is_decode_error() {
        let (_dir, connector) = open_connector();
        let mut record = vec![0u8; 8];
        record.extend_from_slice(b"not base64!");
        insert_raw(&connector, "bad", &record);

        assert!(matches!(connector.read("bad"), Err(CacheError::Decode(_))));
        assert!(connector.exists("bad").unwrap());
    }

    #[test]
    fn test_sequence_restarts_on_corrupt_record() {
        let (_dir, connector) = open_connector();
        insert_raw(&connector, "seq", &[0, 1]);

        assert_eq!(connector.sequence("seq", 5, 1, Duration::ZERO).unwrap(), 6);
        assert_eq!(connector.read("seq").unwrap(), Some(b"6".to_vec()));
    }

    #[test]
    fn test_keys_lists_corrupt_records() {
        let (_dir, connector) = open_connector();
        connector.write("a:1", b"x", Duration::ZERO).unwrap();
        insert_raw(&connector, "a:2", &[0, 1]);

        assert_eq!(connector.keys("").unwrap(), vec!["a:1", "a:2"]);
        assert_eq!(connector.purge_expired().unwrap(), 0);
        assert_eq!(connector.clear("a:").unwrap(), 2);
        assert!(connector.keys("").unwrap().is_empty());
    }
}
