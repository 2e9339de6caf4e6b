//! Thread-Safe Storage Engine with Expiry Support
//!
//! A concurrent map from keys to values, each with an optional absolute
//! deadline after which the key reads as absent.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: keys hash onto independent shards, each behind its own
//!    `RwLock`, so operations on keys in different shards never contend.
//! 2. **Absolute Deadlines**: a TTL becomes an `Instant` when the key is set.
//!    Reading a key never moves its deadline.
//! 3. **Lazy Expiry**: `get` never returns an expired value and removes the
//!    entry it found expired. The background sweeper in [`super::expiry`] only
//!    reclaims memory for keys nobody reads.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! An entry is replaced as a whole under the shard's write lock, so a reader
//! sees either the old entry or the new one, never a mix.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::trace;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// A stored value with an optional deadline.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates an entry, resolving `ttl` against the current time.
    ///
    /// `None` and a zero duration both mean the entry never expires.
    pub fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| Instant::now() + ttl);

        Self { value, expires_at }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Checks expiry against a fixed instant. A deadline equal to `now` has not passed.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }
}

type ShardMap = HashMap<Bytes, Entry>;

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardMap>,
}

impl Shard {
    // Every critical section leaves the map consistent, so a poisoned lock
    // still guards valid data.
    fn read(&self) -> RwLockReadGuard<'_, ShardMap> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardMap> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The key-value store shared by every connection.
///
/// Wrap it in an `Arc` and hand a clone to each connection's command handler.
///
/// # Example
///
/// ```
/// use respkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"), None);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// engine.set(Bytes::from("session"), Bytes::from("abc123"), Some(Duration::from_secs(60)));
/// assert!(engine.get(b"session").is_some());
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    /// Statistics: number of keys currently stored, expired ones included
    key_count: AtomicU64,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: expired keys removed, lazily or by the sweeper
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Stores `value` under `key`, replacing any previous entry outright.
    ///
    /// `ttl` is converted to an absolute deadline now. `None` or a zero
    /// duration stores the key without expiry, clearing any earlier deadline.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was replaced.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let entry = Entry::new(value, ttl);
        let mut data = self.shard(&key).write();
        let is_new = data.insert(key, entry).is_none();

        // Counted under the lock; a removal of this key can only run after it
        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        is_new
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or its deadline has passed.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.shard(key);

        // Lookup under the shared lock.
        {
            let data = shard.read();
            match data.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Lock upgrade: the entry was expired, so take the exclusive lock to
        // remove it. Another writer may have replaced it in between, so check again.
        let mut data = shard.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                trace!(key = %String::from_utf8_lossy(key), "Lazily expired key");
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes every entry whose deadline has passed.
    ///
    /// This is called by the background expiry sweeper.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.write();
            let now = Instant::now();
            let before = data.len();

            data.retain(|_, entry| !entry.is_expired_at(now));

            let removed = (before - data.len()) as u64;
            if removed > 0 {
                self.key_count.fetch_sub(removed, Ordering::Relaxed);
                cleaned += removed;
            }
        }

        if cleaned > 0 {
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }

    /// Returns the number of stored keys, including expired keys not yet removed.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Total expired keys removed
    pub expired: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        assert!(engine.set(Bytes::from("key"), Bytes::from("value"), None));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(b"nonexistent"), None);
    }

    #[test]
    fn test_overwrite() {
        let engine = StorageEngine::new();

        assert!(engine.set(Bytes::from("key"), Bytes::from("v1"), None));
        assert!(!engine.set(Bytes::from("key"), Bytes::from("v2"), None));
        assert_eq!(engine.get(b"key"), Some(Bytes::from("v2")));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_binary_keys_and_values() {
        let engine = StorageEngine::new();
        let key = Bytes::from_static(b"k\r\n\x00");
        let value = Bytes::from_static(b"\xff\r\n\x00v");

        engine.set(key.clone(), value.clone(), None);
        assert_eq!(engine.get(&key), Some(value));
    }

    #[test]
    fn test_expiry() {
        let engine = StorageEngine::new();

        engine.set(
            Bytes::from("key"),
            Bytes::from("value"),
            Some(Duration::from_millis(50)),
        );

        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));

        thread::sleep(Duration::from_millis(100));

        assert_eq!(engine.get(b"key"), None);
        // The read removed it
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("value"), Some(Duration::ZERO));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("value"), None);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(engine.get(b"key"), Some(Bytes::from("value")));
        assert_eq!(engine.cleanup_expired(), 0);
    }

    #[test]
    fn test_overwrite_clears_ttl() {
        let engine = StorageEngine::new();

        engine.set(
            Bytes::from("key"),
            Bytes::from("v1"),
            Some(Duration::from_millis(10)),
        );
        thread::sleep(Duration::from_millis(20));
        engine.set(Bytes::from("key"), Bytes::from("v2"), None);

        assert_eq!(engine.get(b"key"), Some(Bytes::from("v2")));
    }

    #[test]
    fn test_overwrite_replaces_ttl() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("key"), Bytes::from("v1"), None);
        engine.set(
            Bytes::from("key"),
            Bytes::from("v2"),
            Some(Duration::from_millis(20)),
        );
        thread::sleep(Duration::from_millis(50));

        assert_eq!(engine.get(b"key"), None);
    }

    #[test]
    fn test_reads_do_not_extend_deadline() {
        let engine = StorageEngine::new();

        engine.set(
            Bytes::from("key"),
            Bytes::from("value"),
            Some(Duration::from_millis(100)),
        );

        thread::sleep(Duration::from_millis(60));
        assert!(engine.get(b"key").is_some());

        thread::sleep(Duration::from_millis(60));
        assert!(engine.get(b"key").is_none());
    }

    #[test]
    fn test_entry_deadline_boundary() {
        let entry = Entry::new(Bytes::from("v"), Some(Duration::from_secs(1)));
        let deadline = entry.expires_at.unwrap();

        assert!(!entry.is_expired_at(deadline));
        assert!(entry.is_expired_at(deadline + Duration::from_nanos(1)));
    }

    #[test]
    fn test_cleanup_expired() {
        let engine = StorageEngine::new();

        engine.set(
            Bytes::from("key1"),
            Bytes::from("value1"),
            Some(Duration::from_millis(10)),
        );
        engine.set(
            Bytes::from("key2"),
            Bytes::from("value2"),
            Some(Duration::from_millis(10)),
        );
        engine.set(Bytes::from("key3"), Bytes::from("value3"), None);

        thread::sleep(Duration::from_millis(50));

        assert_eq!(engine.cleanup_expired(), 2);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get(b"key3"), Some(Bytes::from("value3")));
    }

    #[test]
    fn test_stats() {
        let engine = StorageEngine::new();

        engine.set(Bytes::from("a"), Bytes::from("1"), None);
        engine.set(Bytes::from("b"), Bytes::from("2"), None);
        engine.get(b"a");
        engine.get(b"missing");

        assert_eq!(
            engine.stats(),
            StorageStats {
                keys: 2,
                get_ops: 2,
                set_ops: 2,
                expired: 0,
            }
        );
    }

    #[test]
    fn test_concurrent_access() {
        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    engine.set(Bytes::from(key.clone()), Bytes::from("value"), None);
                    assert_eq!(engine.get(key.as_bytes()), Some(Bytes::from("value")));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_values() {
        const WRITERS: usize = 8;
        const READERS: usize = 8;
        const ROUNDS: usize = 500;

        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        // Every value a writer stores is one byte repeated; a torn value would mix bytes.
        for w in 0..WRITERS {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for round in 0..ROUNDS {
                    let fill = b'a' + ((w + round) % 26) as u8;
                    let value = Bytes::from(vec![fill; 256 + round % 64]);
                    engine.set(Bytes::from(format!("shared-{}", round % 4)), value.clone(), None);
                    engine.set(Bytes::from(format!("own-{}-{}", w, round)), value, None);
                }
            }));
        }

        for _ in 0..READERS {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for round in 0..ROUNDS {
                    let key = format!("shared-{}", round % 4);
                    if let Some(value) = engine.get(key.as_bytes()) {
                        assert!(value.iter().all(|&b| b == value[0]));
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), (WRITERS * ROUNDS + 4) as u64);
        for w in 0..WRITERS {
            for round in 0..ROUNDS {
                let key = format!("own-{}-{}", w, round);
                let fill = b'a' + ((w + round) % 26) as u8;
                assert_eq!(
                    engine.get(key.as_bytes()),
                    Some(Bytes::from(vec![fill; 256 + round % 64]))
                );
            }
        }
    }

    #[test]
    fn test_concurrent_expiry_and_overwrite() {
        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for t in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let ttl = if (i + t) % 2 == 0 {
                        Some(Duration::from_micros(50))
                    } else {
                        None
                    };
                    engine.set(Bytes::from("hot"), Bytes::from(format!("{}-{}", t, i)), ttl);
                    let _ = engine.get(b"hot");
                    if i % 50 == 0 {
                        engine.cleanup_expired();
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // The counter must agree with what is actually stored.
        engine.cleanup_expired();
        let remaining = engine.get(b"hot").is_some() as u64;
        assert_eq!(engine.len(), remaining);
    }

    #[test]
    fn test_key_count_never_underflows_under_churn() {
        use std::sync::atomic::AtomicBool;

        const KEYS: usize = 8;

        let engine = Arc::new(StorageEngine::new());
        let done = Arc::new(AtomicBool::new(false));

        let monitor = {
            let engine = Arc::clone(&engine);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut max_seen = 0;
                while !done.load(Ordering::Relaxed) {
                    max_seen = max_seen.max(engine.len());
                }
                max_seen
            })
        };

        let workers: Vec<_> = (0..4)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..5_000 {
                        let key = Bytes::from(format!("churn-{}", (i + t) % KEYS));
                        if t % 2 == 0 {
                            engine.set(key, Bytes::from("v"), Some(Duration::from_nanos(1)));
                        } else {
                            let _ = engine.get(&key);
                            if i % 100 == 0 {
                                engine.cleanup_expired();
                            }
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);

        // A decrement racing ahead of its increment would wrap the counter
        assert!(monitor.join().unwrap() <= KEYS as u64);
        engine.cleanup_expired();
        assert_eq!(engine.len(), 0);
    }
}
