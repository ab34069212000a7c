//! PostgreSQL implementation of [`AnalysisSink`].

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};

use glimmer_core::{AnalysisSink, Error, OperationKind, Result};

/// Photo analysis results in the `photo_analyses` table.
#[derive(Clone)]
pub struct PgAnalysisSink {
    pool: Pool<Postgres>,
}

impl PgAnalysisSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Fetch a stored analysis.
    pub async fn get(
        &self,
        subject_id: &str,
        photo_key: &str,
        kind: &OperationKind,
    ) -> Result<Option<JsonValue>> {
        let row = sqlx::query(
            "SELECT payload FROM photo_analyses
             WHERE subject_id = $1 AND photo_key = $2 AND operation_kind = $3",
        )
        .bind(subject_id)
        .bind(photo_key)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| r.get("payload")))
    }
}

#[async_trait]
impl AnalysisSink for PgAnalysisSink {
    async fn upsert_analysis(
        &self,
        subject_id: &str,
        photo_key: &str,
        kind: &OperationKind,
        payload: &JsonValue,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO photo_analyses (subject_id, photo_key, operation_kind, payload, analyzed_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (subject_id, photo_key, operation_kind) DO UPDATE SET
                 payload = EXCLUDED.payload,
                 analyzed_at = EXCLUDED.analyzed_at",
        )
        .bind(subject_id)
        .bind(photo_key)
        .bind(kind.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }
}
