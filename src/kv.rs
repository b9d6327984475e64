//! Shared key-value store backing the API cache and per-user flags.
//!
//! Redis in production; an in-process `DashMap` store for tests and
//! `serve --in-memory`. Both honour optional TTLs.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> RedisResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> RedisResult<()>;

    /// Deletes the given keys and returns how many existed.
    async fn del(&self, keys: &[String]) -> RedisResult<u64>;

    /// Adds `member` to the set at `key`, refreshing the set's TTL if given.
    async fn sadd(&self, key: &str, member: &str, ttl_secs: Option<u64>) -> RedisResult<()>;

    /// Union of all members of the given sets.
    async fn sunion(&self, keys: &[String]) -> RedisResult<Vec<String>>;

    /// Removes `members` from each set in `keys`. Empty sets disappear.
    async fn srem(&self, keys: &[String], members: &[String]) -> RedisResult<()>;
}

#[derive(Clone)]
pub struct RedisKv {
    redis: ConnectionManager,
}

impl RedisKv {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        let mut conn = self.redis.clone();
        conn.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> RedisResult<()> {
        let mut conn = self.redis.clone();
        match ttl_secs {
            Some(ttl) => conn.set_ex(key, value, ttl).await,
            None => conn.set(key, value).await,
        }
    }

    async fn del(&self, keys: &[String]) -> RedisResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.redis.clone();
        conn.del(keys).await
    }

    async fn sadd(&self, key: &str, member: &str, ttl_secs: Option<u64>) -> RedisResult<()> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().sadd(key, member).ignore();
        if let Some(ttl) = ttl_secs {
            pipe.cmd("EXPIRE").arg(key).arg(ttl).ignore();
        }
        pipe.query_async(&mut conn).await
    }

    async fn sunion(&self, keys: &[String]) -> RedisResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        conn.sunion(keys).await
    }

    async fn srem(&self, keys: &[String], members: &[String]) -> RedisResult<()> {
        if keys.is_empty() || members.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.srem(key, members).ignore();
        }
        pipe.query_async(&mut conn).await
    }
}

#[derive(Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

fn deadline(ttl_secs: Option<u64>) -> Option<Instant> {
    ttl_secs.map(|ttl| Instant::now() + Duration::from_secs(ttl))
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_secs: Option<u64>) -> Self {
        Self {
            value,
            expires_at: deadline(ttl_secs),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// In-process store. Expired entries are evicted lazily on access.
#[derive(Default)]
pub struct MemoryKv {
    values: DashMap<String, Expiring<String>>,
    sets: DashMap<String, Expiring<HashSet<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of plain values currently stored (sets excluded).
    pub fn len(&self) -> usize {
        self.values.iter().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        if let Some(entry) = self.values.get(key) {
            if entry.is_live() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> RedisResult<()> {
        self.values
            .insert(key.to_string(), Expiring::new(value.to_string(), ttl_secs));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> RedisResult<u64> {
        let mut deleted = 0;
        for key in keys {
            if let Some((_, entry)) = self.values.remove(key) {
                if entry.is_live() {
                    deleted += 1;
                }
            }
            if let Some((_, entry)) = self.sets.remove(key) {
                if entry.is_live() {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn sadd(&self, key: &str, member: &str, ttl_secs: Option<u64>) -> RedisResult<()> {
        let mut entry = self
            .sets
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(HashSet::new(), ttl_secs));
        if !entry.is_live() {
            *entry = Expiring::new(HashSet::new(), ttl_secs);
        }
        entry.value.insert(member.to_string());
        if ttl_secs.is_some() {
            entry.expires_at = deadline(ttl_secs);
        }
        Ok(())
    }

    async fn sunion(&self, keys: &[String]) -> RedisResult<Vec<String>> {
        let mut members = HashSet::new();
        for key in keys {
            if let Some(entry) = self.sets.get(key) {
                if entry.is_live() {
                    members.extend(entry.value.iter().cloned());
                }
            }
        }
        Ok(members.into_iter().collect())
    }

    async fn srem(&self, keys: &[String], members: &[String]) -> RedisResult<()> {
        for key in keys {
            if let Some(mut entry) = self.sets.get_mut(key) {
                for member in members {
                    entry.value.remove(member);
                }
            }
            self.sets
                .remove_if(key, |_, entry| entry.value.is_empty() || !entry.is_live());
        }
        Ok(())
    }
}
