use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::kv::KvStore;

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// `KvStore` backed by two Postgres tables in the `school_cycle` schema.
#[derive(Debug, Clone)]
pub struct PgKv {
    pool: PgPool,
}

impl PgKv {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for PgKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM school_cycle.kv_entries
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read key {key}"))?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(Utc::now() + chrono::Duration::from_std(ttl)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO school_cycle.kv_entries (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write key {key}"))?;

        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM school_cycle.kv_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete key {key}"))?;
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO school_cycle.kv_sets (set_key, member)
            VALUES ($1, $2)
            ON CONFLICT (set_key, member) DO NOTHING
            "#,
        )
        .bind(set)
        .bind(member)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to add member to {set}"))?;
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM school_cycle.kv_sets WHERE set_key = $1 AND member = $2")
            .bind(set)
            .bind(member)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to remove member from {set}"))?;
        Ok(())
    }

    async fn smembers(&self, set: &str) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT member FROM school_cycle.kv_sets WHERE set_key = $1 ORDER BY member",
        )
        .bind(set)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list members of {set}"))?;

        Ok(rows.into_iter().map(|row| row.get("member")).collect())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        // left() keeps the match literal; LIKE would treat `_` and `%` as wildcards.
        let rows = sqlx::query(
            r#"
            SELECT key FROM school_cycle.kv_entries
            WHERE left(key, length($1)) = $1
              AND (expires_at IS NULL OR expires_at > now())
            ORDER BY key
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .context("failed to scan keys")?;

        Ok(rows.into_iter().map(|row| row.get("key")).collect())
    }
}
