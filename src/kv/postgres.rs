use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, Instrument};

use super::{duration_millis, Counter, KvStore};

/// Key-value store shared by every instance through the `kv_entries` table.
#[derive(Clone, Debug)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn millis_to_duration(millis: i64) -> Duration {
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let query = "SELECT value FROM kv_entries WHERE key = $1 AND expires_at > NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read kv entry")?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let query = r"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 millisecond'))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(duration_millis(ttl))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to write kv entry")?;
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<Counter> {
        // A stale row restarts the window; a live one keeps its expiry.
        let query = r"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES ($1, '1', NOW() + ($2 * INTERVAL '1 millisecond'))
            ON CONFLICT (key) DO UPDATE
            SET value = CASE
                    WHEN kv_entries.expires_at <= NOW() THEN '1'
                    ELSE (kv_entries.value::BIGINT + 1)::TEXT
                END,
                expires_at = CASE
                    WHEN kv_entries.expires_at <= NOW() THEN EXCLUDED.expires_at
                    ELSE kv_entries.expires_at
                END
            RETURNING
                value::BIGINT AS hits,
                GREATEST(EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000, 0)::BIGINT AS ttl_ms
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(duration_millis(window))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to increment kv counter")?;

        let hits: i64 = row.get("hits");
        let ttl_ms: i64 = row.get("ttl_ms");
        Ok(Counter {
            hits: u64::try_from(hits).unwrap_or(0),
            ttl: millis_to_duration(ttl_ms),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let query = r"
            UPDATE kv_entries
            SET expires_at = NOW() + ($2 * INTERVAL '1 millisecond')
            WHERE key = $1 AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(key)
            .bind(duration_millis(ttl))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update kv expiry")?;
        Ok(result.rows_affected() > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let query = r"
            SELECT GREATEST(EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000, 0)::BIGINT AS ttl_ms
            FROM kv_entries
            WHERE key = $1 AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read kv ttl")?;
        Ok(row.map(|row| millis_to_duration(row.get("ttl_ms"))))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let query = "DELETE FROM kv_entries WHERE key = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete kv entry")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = "DELETE FROM kv_entries WHERE expires_at <= NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired kv entries")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire kv connection")?;
        conn.ping()
            .instrument(span)
            .await
            .context("failed to ping kv store")
    }
}
