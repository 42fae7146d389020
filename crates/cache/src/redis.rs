use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use tracing::{debug, info};

use crate::{CacheFamily, CacheKey, Generation, Result, store::Cache};

/// Stores an entry and indexes it under its family, optionally guarded by the
/// family generation.
///
/// KEYS: entry, family index, family generation.
/// ARGV: value, ttl in ms, expected generation (empty for none).
const FILL: &str = r"
redis.replicate_commands()
if ARGV[3] ~= '' then
  local current = redis.call('GET', KEYS[3]) or '0'
  if current ~= ARGV[3] then
    return 0
  end
end
local time = redis.call('TIME')
local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
local ttl = tonumber(ARGV[2])
redis.call('SET', KEYS[1], ARGV[1], 'PX', ttl)
redis.call('ZADD', KEYS[2], now + ttl, KEYS[1])
redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', now)
if redis.call('PTTL', KEYS[2]) < ttl then
  redis.call('PEXPIRE', KEYS[2], ttl)
end
return 1
";

/// Redis-backed cache.
///
/// Values are plain strings with a millisecond TTL. Each family is a sorted
/// set of member keys scored by expiry time; members that have expired are
/// trimmed on every fill, and the set itself lives as long as its newest
/// member. The family generation is a counter next to the set.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    fill: Script,
}

impl RedisCache {
    /// Connects to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for cache");

        Ok(Self {
            conn,
            fill: Script::new(FILL),
        })
    }

    /// Number of keys indexed under `family`, expired ones not yet trimmed
    /// included.
    pub async fn family_members(&self, family: &CacheFamily) -> Result<usize> {
        let mut conn = self.conn.clone();
        let members: usize = conn.zcard(family.as_str()).await?;
        Ok(members)
    }

    async fn store(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
        seen: Option<Generation>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let seen = seen.map(|g| g.to_string()).unwrap_or_default();

        let stored: i64 = self
            .fill
            .key(key.as_str())
            .key(key.family().as_str())
            .key(generation_key(key.family()))
            .arg(value)
            .arg(millis(ttl))
            .arg(seen)
            .invoke_async(&mut conn)
            .await?;

        Ok(stored == 1)
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn generation_key(family: &CacheFamily) -> String {
    format!("{family}#generation")
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key.as_str()).await?;
        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.store(key, value, ttl, None).await?;
        Ok(())
    }

    async fn generation(&self, family: &CacheFamily) -> Result<Generation> {
        let mut conn = self.conn.clone();
        let current: Option<u64> = conn.get(generation_key(family)).await?;
        Ok(Generation::new(current.unwrap_or_default()))
    }

    async fn set_if_current(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
        seen: Generation,
    ) -> Result<bool> {
        self.store(key, value, ttl, Some(seen)).await
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .del(key.as_str())
            .ignore()
            .zrem(key.family().as_str(), key.as_str())
            .ignore()
            .incr(generation_key(key.family()), 1)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn invalidate_family(&self, family: &CacheFamily) -> Result<usize> {
        let mut conn = self.conn.clone();

        // Read and drop the index in one step so keys registered afterwards
        // land in a fresh one.
        let (members, _, _): (Vec<String>, usize, u64) = redis::pipe()
            .atomic()
            .zrange(family.as_str(), 0, -1)
            .del(family.as_str())
            .incr(generation_key(family), 1)
            .query_async(&mut conn)
            .await?;

        if members.is_empty() {
            return Ok(0);
        }

        let removed: usize = conn.del(&members).await?;
        debug!(family = %family, removed, "Invalidated cache family");
        Ok(removed)
    }
}
