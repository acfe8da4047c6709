//! Decision cache for permission checks.
//!
//! Entries are keyed `auth:{object}:{relation}:{user}`. Because object ids
//! never contain `:`, `auth:{object}:` covers every decision on one object and
//! `auth:{namespace}:` every decision on a namespace.

use crate::{error::Result, models::*};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

pub const KEY_PREFIX: &str = "auth:";
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const SCAN_BATCH: usize = 500;

pub fn decision_key(object: &Object, relation: &Relation, user: &User) -> String {
    format!("{KEY_PREFIX}{object}:{relation}:{user}")
}

/// Prefix of every decision for `relation` on `object`
pub fn object_relation_prefix(object: &Object, relation: &Relation) -> String {
    format!("{KEY_PREFIX}{object}:{relation}:")
}

/// Prefix of every decision on `object`
pub fn object_prefix(object: &Object) -> String {
    format!("{KEY_PREFIX}{object}:")
}

/// Prefix of every decision on objects of `namespace`
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{KEY_PREFIX}{namespace}:")
}

/// Key-value cache for check results.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<bool>>;

    async fn set(&self, key: &str, value: bool, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`, returning how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Upper bound on live entries held by [`InMemoryDecisionCache`].
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Process-local cache with per-entry expiry.
///
/// Expired entries are swept on writes at most once per sweep interval, or
/// immediately once the cache is full. A cache still full of live entries
/// after a sweep sheds a tenth of them.
pub struct InMemoryDecisionCache {
    entries: DashMap<String, (bool, Instant)>,
    max_entries: usize,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for InMemoryDecisionCache {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            last_sweep: Mutex::new(Instant::now()),
        }
    }
}

impl InMemoryDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep_if_due(&self, now: Instant) {
        let full = self.entries.len() >= self.max_entries;
        let due = match self.last_sweep.try_lock() {
            Ok(mut last) if full || now.duration_since(*last) >= self.sweep_interval => {
                *last = now;
                true
            }
            _ => false,
        };
        if !due {
            return;
        }

        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);

        if self.entries.len() >= self.max_entries {
            let victims: Vec<String> = self
                .entries
                .iter()
                .take(self.max_entries / 10 + 1)
                .map(|entry| entry.key().clone())
                .collect();
            for key in victims {
                self.entries.remove(&key);
            }
        }
        debug!(
            removed = before.saturating_sub(self.entries.len()),
            remaining = self.entries.len(),
            "Swept decision cache"
        );
    }
}

#[async_trait]
impl DecisionCache for InMemoryDecisionCache {
    async fn get(&self, key: &str) -> Result<Option<bool>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = *entry;
            if expires_at > now {
                return Ok(Some(value));
            }
        }
        self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: bool, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        self.sweep_if_due(now);
        self.entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Escape Redis glob metacharacters so `value` matches only itself.
pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^' | '-') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis-backed cache shared between service instances.
#[derive(Clone)]
pub struct RedisDecisionCache {
    redis: ConnectionManager,
}

impl RedisDecisionCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }

    pub fn from_manager(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl DecisionCache for RedisDecisionCache {
    async fn get(&self, key: &str) -> Result<Option<bool>> {
        let mut conn = self.redis.clone();
        Ok(conn.get::<_, Option<bool>>(key).await?)
    }

    async fn set(&self, key: &str, value: bool, ttl: Duration) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(keys).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, removed, "Deleted cached decisions");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(object: &str, relation: &str, user: &str) -> String {
        let t = Tuple::parse(object, relation, user).unwrap();
        decision_key(&t.object, &t.relation, &t.user)
    }

    #[test]
    fn test_key_layout() {
        let t = Tuple::parse("doc:readme", "viewer", "user:alice").unwrap();
        assert_eq!(decision_key(&t.object, &t.relation, &t.user), "auth:doc:readme:viewer:user:alice");
        assert_eq!(object_relation_prefix(&t.object, &t.relation), "auth:doc:readme:viewer:");
        assert_eq!(object_prefix(&t.object), "auth:doc:readme:");
        assert_eq!(namespace_prefix("doc"), "auth:doc:");
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("auth:doc:1:"), "auth:doc:1:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[tokio::test]
    async fn test_in_memory_expiry() {
        let cache = InMemoryDecisionCache::new();
        cache.set("k", true, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(true));

        cache.set("gone", false, Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("gone").await.unwrap(), None);
        assert_eq!(cache.len(), 1);

        cache.delete("k").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_are_swept() {
        let cache = InMemoryDecisionCache::new().with_sweep_interval(Duration::from_millis(5));
        for i in 0..1000 {
            cache.set(&format!("short:{i}"), true, Duration::from_millis(1)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..10 {
            cache.set(&format!("long:{i}"), true, DEFAULT_TTL).await.unwrap();
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.get("long:0").await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_live_entries_are_bounded() {
        let cache = InMemoryDecisionCache::new().with_max_entries(100);
        for i in 0..1000 {
            cache.set(&format!("k:{i}"), false, DEFAULT_TTL).await.unwrap();
        }
        assert!(cache.len() <= 100);
        assert_eq!(cache.get("k:999").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_prefix_invalidation_scopes() {
        let cache = InMemoryDecisionCache::new();
        for k in [
            key("doc:1", "viewer", "user:alice"),
            key("doc:1", "editor", "user:alice"),
            key("doc:10", "viewer", "user:alice"),
            key("group:1", "member", "user:alice"),
        ] {
            cache.set(&k, true, DEFAULT_TTL).await.unwrap();
        }

        let doc1 = Object::parse("doc:1").unwrap();
        let viewer = Relation::new("viewer").unwrap();
        assert_eq!(cache.delete_prefix(&object_relation_prefix(&doc1, &viewer)).await.unwrap(), 1);
        assert_eq!(cache.delete_prefix(&object_prefix(&doc1)).await.unwrap(), 1);
        assert_eq!(cache.get(&key("doc:10", "viewer", "user:alice")).await.unwrap(), Some(true));

        assert_eq!(cache.delete_prefix(&namespace_prefix("doc")).await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }
}
