use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use tracing::debug;

use crate::kv::KvStore;
use crate::models::{Slot, Subscription};

pub const ENDPOINTS_KEY: &str = "push:endpoints";
pub const SUBSCRIPTION_PREFIX: &str = "push:sub:";
pub const DEDUP_PREFIX: &str = "push:last-sent:";
pub const DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn subscription_key(endpoint: &str) -> String {
    format!("{SUBSCRIPTION_PREFIX}{endpoint}")
}

pub fn dedup_key(slot: Slot, date: NaiveDate) -> String {
    format!("{DEDUP_PREFIX}{slot}:{date}")
}

/// Push subscriptions and per-slot dedup markers on top of a `KvStore`.
///
/// All endpoints live in one set; each endpoint also has a key holding the
/// serialized subscription.
#[derive(Clone)]
pub struct SubscriptionStore {
    kv: Arc<dyn KvStore>,
}

impl SubscriptionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Stores or overwrites the subscription for its endpoint.
    pub async fn add(&self, subscription: &Subscription) -> anyhow::Result<()> {
        let record = serde_json::to_string(subscription)?;
        self.kv.sadd(ENDPOINTS_KEY, &subscription.endpoint).await?;
        self.kv
            .set(&subscription_key(&subscription.endpoint), &record, None)
            .await?;
        debug!(endpoint = %subscription.endpoint, "subscription stored");
        Ok(())
    }

    /// Drops the set membership and the record. Unknown endpoints are a no-op.
    pub async fn remove(&self, endpoint: &str) -> anyhow::Result<()> {
        self.kv.srem(ENDPOINTS_KEY, endpoint).await?;
        self.kv.del(&subscription_key(endpoint)).await?;
        debug!(endpoint, "subscription removed");
        Ok(())
    }

    /// Removes only the set membership, for endpoints whose record is already gone.
    pub async fn forget_endpoint(&self, endpoint: &str) -> anyhow::Result<()> {
        self.kv.srem(ENDPOINTS_KEY, endpoint).await
    }

    pub async fn list_endpoints(&self) -> anyhow::Result<Vec<String>> {
        self.kv.smembers(ENDPOINTS_KEY).await
    }

    pub async fn get(&self, endpoint: &str) -> anyhow::Result<Option<Subscription>> {
        let Some(record) = self.kv.get(&subscription_key(endpoint)).await? else {
            return Ok(None);
        };
        let subscription = serde_json::from_str(&record)
            .with_context(|| format!("corrupt subscription record for {endpoint}"))?;
        Ok(Some(subscription))
    }

    /// Timestamp of the earlier send for `(slot, date)`, if it has not expired.
    pub async fn dedup_marker(&self, slot: Slot, date: NaiveDate) -> anyhow::Result<Option<String>> {
        self.kv.get(&dedup_key(slot, date)).await
    }

    pub async fn mark_sent(&self, slot: Slot, date: NaiveDate) -> anyhow::Result<()> {
        self.kv
            .set(
                &dedup_key(slot, date),
                &Utc::now().to_rfc3339(),
                Some(DEDUP_TTL),
            )
            .await
    }

    /// Removes every subscription and dedup marker. Returns both counts.
    pub async fn clear_all(&self) -> anyhow::Result<(usize, usize)> {
        let endpoints = self.list_endpoints().await?;
        for endpoint in &endpoints {
            self.remove(endpoint).await?;
        }

        let markers = self.kv.keys_with_prefix(DEDUP_PREFIX).await?;
        for key in &markers {
            self.kv.del(key).await?;
        }

        Ok((endpoints.len(), markers.len()))
    }
}
