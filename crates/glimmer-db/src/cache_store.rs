//! PostgreSQL implementation of [`CacheStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use glimmer_core::{CacheEntry, CacheStore, Error, OperationKind, Result};

const ENTRY_COLUMNS: &str = "cache_key, subject_id, operation_kind, payload, created_at, \
                             expires_at, access_count, last_accessed_at";

/// Cache entries in the `ai_cache` table.
#[derive(Clone)]
pub struct PgCacheStore {
    pool: Pool<Postgres>,
}

impl PgCacheStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_entry_row(row: sqlx::postgres::PgRow) -> CacheEntry {
        CacheEntry {
            key: row.get("cache_key"),
            subject_id: row.get("subject_id"),
            operation_kind: OperationKind::parse(row.get::<&str, _>("operation_kind")),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            access_count: row.get("access_count"),
            last_accessed_at: row.get("last_accessed_at"),
        }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(
        &self,
        key: &str,
        subject_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        // Read and access accounting in one statement; expired rows never match.
        let query = format!(
            "UPDATE ai_cache
             SET access_count = access_count + 1, last_accessed_at = $3
             WHERE cache_key = $1 AND subject_id = $2 AND expires_at > $3
             RETURNING {ENTRY_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(key)
            .bind(subject_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_entry_row))
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO ai_cache (cache_key, subject_id, operation_kind, payload, created_at,
                                   expires_at, access_count, last_accessed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (cache_key) DO UPDATE SET
                 payload = EXCLUDED.payload,
                 created_at = EXCLUDED.created_at,
                 expires_at = EXCLUDED.expires_at,
                 access_count = EXCLUDED.access_count,
                 last_accessed_at = EXCLUDED.last_accessed_at",
        )
        .bind(&entry.key)
        .bind(&entry.subject_id)
        .bind(entry.operation_kind.as_str())
        .bind(&entry.payload)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .bind(entry.access_count)
        .bind(entry.last_accessed_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "cache_store",
            op = "upsert",
            cache_key = %entry.key,
            operation_kind = %entry.operation_kind,
            "Stored cache entry"
        );
        Ok(())
    }

    async fn delete_for_subject(
        &self,
        subject_id: &str,
        kind: Option<&OperationKind>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM ai_cache
             WHERE subject_id = $1 AND ($2::text IS NULL OR operation_kind = $2)",
        )
        .bind(subject_id)
        .bind(kind.map(OperationKind::as_str))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ai_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
