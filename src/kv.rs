//! Key-value capability the push bookkeeping is written against.
//!
//! The contract mirrors a small Redis subset: string keys with optional expiry
//! plus unordered sets of strings. Implementations are constructed once per
//! process and shared behind an `Arc<dyn KvStore>`.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Returns the value unless the key is missing or expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Overwrites the key. `ttl` of `None` keeps it until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Deletes the key. Missing keys are not an error.
    async fn del(&self, key: &str) -> anyhow::Result<()>;

    async fn sadd(&self, set: &str, member: &str) -> anyhow::Result<()>;

    /// Removes a member. Missing members are not an error.
    async fn srem(&self, set: &str, member: &str) -> anyhow::Result<()>;

    async fn smembers(&self, set: &str) -> anyhow::Result<Vec<String>>;

    /// Live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

/// In-process store for tests and local runs without Postgres.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> anyhow::Result<()> {
        self.sets
            .write()
            .map_err(poisoned)?
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> anyhow::Result<()> {
        let mut sets = self.sets.write().map_err(poisoned)?;
        if let Some(members) = sets.get_mut(set) {
            members.remove(member);
            if members.is_empty() {
                sets.remove(set);
            }
        }
        Ok(())
    }

    async fn smembers(&self, set: &str) -> anyhow::Result<Vec<String>> {
        let sets = self.sets.read().map_err(poisoned)?;
        Ok(sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let now = Instant::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
