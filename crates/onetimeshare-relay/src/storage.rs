//! Key-value TTL store capability
//!
//! The relay never holds shared state of its own; every correctness guarantee
//! rests on the store executing the primitives below atomically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the store
    #[error("connection failed: {0}")]
    Connection(String),

    /// Store rejected or failed a command
    #[error("command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Store result alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Atomic primitives the consumption engine relies on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write a plain value that expires after `ttl` (`SET .. PX`)
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()>;

    /// Atomically read and remove a plain value (`GETDEL`)
    async fn get_del(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write hash fields and arm an expiry on the whole hash in one step
    async fn hset_ex(
        &self,
        key: &str,
        fields: Vec<(String, Vec<u8>)>,
        ttl: Duration,
    ) -> StoreResult<()>;

    /// Read every field of a hash; empty when the key is absent (`HGETALL`)
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>>;

    /// Atomically increment a hash field, only if the hash still exists.
    ///
    /// Returns the post-increment value, or `None` when the key is gone. A
    /// deleted or expired record is never recreated.
    async fn hincr_existing(&self, key: &str, field: &str, delta: i64) -> StoreResult<Option<i64>>;

    /// Remove a key; removing an absent key is not an error (`DEL`)
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Liveness probe (`PING`)
    async fn ping(&self) -> StoreResult<()>;
}

#[derive(Clone, Debug)]
enum Value {
    Plain(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-memory store with Redis-like expiry semantics.
///
/// Expiry is evaluated lazily on access against the tokio clock, so tests can
/// pause and advance time. Each operation holds the map lock for its whole
/// duration, which makes every primitive atomic. Construct one per deployment
/// and share it by handle; it is never a process-wide singleton.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether no live keys remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries to reclaim memory
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            info!("Purged {} expired keys", removed);
        }
        removed
    }

    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
            debug!("Lazily evicted expired key");
            return None;
        }
        entries.get_mut(key)
    }

    fn deadline(ttl: Duration) -> StoreResult<Instant> {
        Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StoreError::Command(format!("invalid expire time {:?}", ttl)))
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::Command(format!("WRONGTYPE operation against key {}", key))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let entry = Entry {
            value: Value::Plain(value),
            expires_at: Self::deadline(ttl)?,
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn get_del(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        let is_hash = Self::live(&mut entries, key).map(|e| matches!(e.value, Value::Hash(_)));
        match is_hash {
            None => Ok(None),
            Some(true) => Err(Self::wrong_type(key)),
            Some(false) => match entries.remove(key).map(|e| e.value) {
                Some(Value::Plain(bytes)) => Ok(Some(bytes)),
                _ => Ok(None),
            },
        }
    }

    async fn hset_ex(
        &self,
        key: &str,
        fields: Vec<(String, Vec<u8>)>,
        ttl: Duration,
    ) -> StoreResult<()> {
        let expires_at = Self::deadline(ttl)?;
        let mut entries = self.entries.lock();
        if let Some(entry) = Self::live(&mut entries, key) {
            return match &mut entry.value {
                Value::Hash(existing) => {
                    existing.extend(fields);
                    entry.expires_at = expires_at;
                    Ok(())
                }
                Value::Plain(_) => Err(Self::wrong_type(key)),
            };
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields.into_iter().collect()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(Value::Plain(_)) => Err(Self::wrong_type(key)),
        }
    }

    async fn hincr_existing(&self, key: &str, field: &str, delta: i64) -> StoreResult<Option<i64>> {
        let mut entries = self.entries.lock();
        let fields = match Self::live(&mut entries, key).map(|e| &mut e.value) {
            None => return Ok(None),
            Some(Value::Hash(fields)) => fields,
            Some(Value::Plain(_)) => return Err(Self::wrong_type(key)),
        };

        let current = match fields.get(field) {
            None => 0,
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    StoreError::Command("hash value is not an integer".to_string())
                })?,
        };
        let next = current + delta;
        fields.insert(field.to_string(), next.to_string().into_bytes());
        Ok(Some(next))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        let existed = Self::live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Increment a hash field only while the hash exists. A bare `HINCRBY` on a
/// key deleted by a concurrent reader would recreate it without an expiry.
const HINCR_EXISTING_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
end
return false
"#;

/// Redis-backed store over a multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    hincr_existing: Arc<redis::Script>,
}

impl RedisStore {
    /// Connect to the server at `url`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to redis store");
        Ok(Self {
            conn,
            hincr_existing: Arc::new(redis::Script::new(HINCR_EXISTING_SCRIPT)),
        })
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        // Out-of-range values are left for the server to reject.
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_del(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn hset_ex(
        &self,
        key: &str,
        fields: Vec<(String, Vec<u8>)>,
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key);
        for (field, value) in fields {
            pipe.arg(field).arg(value);
        }
        pipe.ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(Self::ttl_millis(ttl))
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, Vec<u8>> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(fields)
    }

    async fn hincr_existing(&self, key: &str, field: &str, delta: i64) -> StoreResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = self
            .hincr_existing
            .key(key)
            .arg(field)
            .arg(delta)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
