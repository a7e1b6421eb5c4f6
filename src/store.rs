use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::OnceCell;

/// StoreError
///
/// Failure talking to the shared key/value store. Callers decide the policy: the rate
/// limiter fails open, the token resolver surfaces it as a resolution failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Counter state of one window after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time left until the window key expires.
    pub ttl: Duration,
}

// 1. Store Contracts

/// CounterStore
///
/// Atomic increment-with-expiry over a key shared by every service instance. The first
/// increment of a key creates it with the given expiry; later increments in the same
/// window keep the original expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str, expires_in: Duration) -> Result<WindowCount, StoreError>;
}

/// RevocationStore
///
/// Records tokens destroyed on logout until their natural expiry.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError>;
}

pub type CounterState = Arc<dyn CounterStore>;
pub type RevocationState = Arc<dyn RevocationStore>;

// 2. The Real Implementation (Redis)

/// INCR the window key, set its expiry on creation, and report the count with the TTL in
/// one round trip so concurrent instances observe a single consistent counter.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {current, ttl}
"#;

/// RedisStore
///
/// Shared store backed by Redis. The connection is opened on first use and re-attempted
/// on every call until it succeeds, so an outage at startup only affects the calls made
/// while Redis is down. Every call is bounded by `op_timeout`; nothing is retried here.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: Arc<OnceCell<ConnectionManager>>,
    prefix: Arc<String>,
    op_timeout: Duration,
}

impl RedisStore {
    /// Validates the url without connecting.
    pub fn open(url: &str, prefix: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|err| StoreError::Unavailable(format!("redis client: {err}")))?;
        Ok(Self {
            client,
            manager: Arc::new(OnceCell::new()),
            prefix: Arc::new(prefix.to_string()),
            op_timeout,
        })
    }

    /// Returns the shared connection, connecting first if no attempt has succeeded yet.
    /// Once established, the manager reconnects on its own.
    pub async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                tokio::time::timeout(self.op_timeout, ConnectionManager::new(self.client.clone()))
                    .await
                    .map_err(|_| StoreError::Timeout(self.op_timeout))?
                    .map_err(|err| StoreError::Unavailable(format!("redis connect: {err}")))
            })
            .await?;
        Ok(manager.clone())
    }

    fn namespaced_key(&self, kind: &str, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, kind, key)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
            .map_err(|err| StoreError::Unavailable(format!("redis: {err}")))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, expires_in: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(INCREMENT_SCRIPT);
        let mut invocation = script.key(self.namespaced_key("rate", key));
        invocation.arg(expires_in.as_millis().max(1) as u64);
        let (count, ttl_ms): (i64, i64) = self.bounded(invocation.invoke_async(&mut conn)).await?;

        Ok(WindowCount {
            count: count.max(0) as u64,
            // PTTL reports -1/-2 for keys without expiry; fall back to the requested window.
            ttl: if ttl_ms > 0 {
                Duration::from_millis(ttl_ms as u64)
            } else {
                expires_in
            },
        })
    }
}

#[async_trait]
impl RevocationStore for RedisStore {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.namespaced_key("revoked", token);
        let millis = ttl.as_millis().max(1) as u64;
        self.bounded(async {
            redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("PX")
                .arg(millis)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.namespaced_key("revoked", token);
        self.bounded(async {
            redis::cmd("EXISTS")
                .arg(&key)
                .query_async::<_, bool>(&mut conn)
                .await
        })
        .await
    }
}

// 3. The In-Process Implementation (tests, single-instance development)

/// MemoryStore
///
/// Process-local stand-in for Redis. Its counters are NOT shared across instances, so it
/// must not back the rate limiter of a horizontally scaled deployment.
#[derive(Default)]
pub struct MemoryStore {
    counters: Mutex<HashMap<String, (u64, Instant)>>,
    revoked: Mutex<HashMap<String, Instant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, expires_in: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| StoreError::Unavailable("counter lock poisoned".to_string()))?;

        counters.retain(|_, (_, expires_at)| *expires_at > now);
        let entry = counters
            .entry(key.to_string())
            .or_insert((0, now + expires_in));
        entry.0 += 1;

        Ok(WindowCount {
            count: entry.0,
            ttl: entry.1.saturating_duration_since(now),
        })
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut revoked = self
            .revoked
            .lock()
            .map_err(|_| StoreError::Unavailable("revocation lock poisoned".to_string()))?;
        let now = Instant::now();
        revoked.retain(|_, expires_at| *expires_at > now);
        revoked.insert(token.to_string(), now + ttl);
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        let revoked = self
            .revoked
            .lock()
            .map_err(|_| StoreError::Unavailable("revocation lock poisoned".to_string()))?;
        Ok(revoked
            .get(token)
            .is_some_and(|expires_at| *expires_at > Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revoke_prunes_expired_entries() {
        let store = MemoryStore::new();
        store.revoke("old", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        store.revoke("new", Duration::from_secs(60)).await.unwrap();

        let revoked = store.revoked.lock().unwrap();
        assert_eq!(revoked.len(), 1);
        assert!(revoked.contains_key("new"));
    }
}
