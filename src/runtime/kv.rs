//! Ephemeral keyed store for partial results and progress counters.
//!
//! Every value carries a TTL. Counters are incremented atomically so concurrent
//! chunk workers never lose an update.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key '{0}' holds a counter, not a value")]
    NotAValue(String),
    #[error("key '{0}' holds a value, not a counter")]
    NotACounter(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value port used by the preview orchestrator.
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Store a value, replacing any previous one.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), KvError>;

    /// Store a value only if the key is absent. Returns true when written.
    async fn put_once(&self, key: &str, value: String, ttl: Duration) -> Result<bool, KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Read and delete a value in one step.
    async fn take(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Atomically add `by` to a counter (created at zero) and return the new value.
    async fn increment(&self, key: &str, by: i64, ttl: Duration) -> Result<i64, KvError>;

    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), KvError>;

    async fn counter(&self, key: &str) -> Result<Option<i64>, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// Serialize and store a value as JSON.
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), KvError> {
    let encoded = serde_json::to_string(value)?;
    store.put(key, encoded, ttl).await
}

/// Serialize and store a value as JSON unless the key is already taken.
/// Returns true when written.
pub async fn put_once_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<bool, KvError> {
    let encoded = serde_json::to_string(value)?;
    store.put_once(key, encoded, ttl).await
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, KvError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn take_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, KvError> {
    match store.take(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Value(String),
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

/// In-process store backed by a mutex-guarded map.
///
/// Expired entries are invisible to readers and purged lazily on writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, KvError> {
        self.entries
            .lock()
            .map_err(|_| KvError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn live<'a>(map: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        map.get(key).filter(|e| e.expires_at > Instant::now())
    }

    fn purge_expired(map: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        map.retain(|_, e| e.expires_at > now);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|map| map.values().filter(|e| e.expires_at > Instant::now()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), KvError> {
        let mut map = self.lock()?;
        Self::purge_expired(&mut map);
        map.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn put_once(&self, key: &str, value: String, ttl: Duration) -> Result<bool, KvError> {
        let mut map = self.lock()?;
        Self::purge_expired(&mut map);
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let map = self.lock()?;
        match Self::live(&map, key).map(|e| &e.slot) {
            Some(Slot::Value(v)) => Ok(Some(v.clone())),
            Some(Slot::Counter(_)) => Err(KvError::NotAValue(key.to_string())),
            None => Ok(None),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut map = self.lock()?;
        let holds_value = match Self::live(&map, key).map(|e| &e.slot) {
            Some(Slot::Value(_)) => Some(true),
            Some(Slot::Counter(_)) => Some(false),
            None => None,
        };
        match holds_value {
            Some(true) => match map.remove(key).map(|e| e.slot) {
                Some(Slot::Value(v)) => Ok(Some(v)),
                _ => Ok(None),
            },
            Some(false) => Err(KvError::NotAValue(key.to_string())),
            None => {
                map.remove(key);
                Ok(None)
            }
        }
    }

    async fn increment(&self, key: &str, by: i64, ttl: Duration) -> Result<i64, KvError> {
        let mut map = self.lock()?;
        let now = Instant::now();
        let entry = map
            .entry(key.to_string())
            .and_modify(|e| {
                if e.expires_at <= now {
                    e.slot = Slot::Counter(0);
                }
            })
            .or_insert(Entry {
                slot: Slot::Counter(0),
                expires_at: now + ttl,
            });
        match &mut entry.slot {
            Slot::Counter(n) => {
                *n += by;
                entry.expires_at = now + ttl;
                Ok(*n)
            }
            Slot::Value(_) => Err(KvError::NotACounter(key.to_string())),
        }
    }

    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), KvError> {
        let mut map = self.lock()?;
        map.insert(
            key.to_string(),
            Entry {
                slot: Slot::Counter(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn counter(&self, key: &str) -> Result<Option<i64>, KvError> {
        let map = self.lock()?;
        match Self::live(&map, key).map(|e| &e.slot) {
            Some(Slot::Counter(n)) => Ok(Some(*n)),
            Some(Slot::Value(_)) => Err(KvError::NotACounter(key.to_string())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
