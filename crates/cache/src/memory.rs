use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{CacheError, CacheFamily, CacheKey, Generation, Result, store::Cache};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    family: CacheFamily,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    families: HashMap<CacheFamily, HashSet<String>>,
    /// One `(expires_at, key)` per entry, soonest first.
    expiries: BTreeSet<(Instant, String)>,
    generations: HashMap<CacheFamily, u64>,
}

impl State {
    fn insert(&mut self, key: &CacheKey, value: Vec<u8>, expires_at: Instant) {
        self.remove(key.as_str());
        self.expiries.insert((expires_at, key.as_str().to_string()));
        self.families
            .entry(key.family().clone())
            .or_default()
            .insert(key.as_str().to_string());
        self.entries.insert(
            key.as_str().to_string(),
            Entry {
                value,
                expires_at,
                family: key.family().clone(),
            },
        );
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.forget(key)?;
        self.expiries.remove(&(entry.expires_at, key.to_string()));
        Some(entry)
    }

    /// Drops the entry and its family membership, leaving the expiry queue.
    fn forget(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        if let Some(members) = self.families.get_mut(&entry.family) {
            members.remove(key);
            if members.is_empty() {
                self.families.remove(&entry.family);
            }
        }
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) {
        while self.expiries.first().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, key)) = self.expiries.pop_first() {
                self.forget(&key);
            }
        }
    }

    fn generation(&self, family: &CacheFamily) -> Generation {
        Generation::new(self.generations.get(family).copied().unwrap_or_default())
    }

    fn advance(&mut self, family: &CacheFamily) {
        *self.generations.entry(family.clone()).or_default() += 1;
    }
}

/// In-memory cache.
///
/// Expired entries are purged on every read and write, so family membership
/// only ever holds live keys plus those expired since the last call. Uses the
/// tokio clock, so tests can drive expiry with a paused runtime.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored entries, expired ones included until the next call.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys currently registered under `family`.
    pub async fn family_members(&self, family: &CacheFamily) -> usize {
        self.state
            .lock()
            .await
            .families
            .get(family)
            .map_or(0, HashSet::len)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        state.purge_expired(Instant::now());
        Ok(state.entries.get(key.as_str()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let now = Instant::now();
        state.purge_expired(now);
        state.insert(key, value, now + ttl);
        Ok(())
    }

    async fn generation(&self, family: &CacheFamily) -> Result<Generation> {
        self.check_available()?;
        Ok(self.state.lock().await.generation(family))
    }

    async fn set_if_current(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
        seen: Generation,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let now = Instant::now();
        state.purge_expired(now);
        if state.generation(key.family()) != seen {
            return Ok(false);
        }
        state.insert(key, value, now + ttl);
        Ok(true)
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        state.remove(key.as_str());
        state.advance(key.family());
        Ok(())
    }

    async fn invalidate_family(&self, family: &CacheFamily) -> Result<usize> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        state.purge_expired(Instant::now());
        state.advance(family);
        let Some(members) = state.families.get(family).cloned() else {
            return Ok(0);
        };
        let removed = members
            .iter()
            .filter(|key| state.remove(key).is_some())
            .count();
        Ok(removed)
    }
}
