//! Read-only execution of validated search statements.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use glimmer_core::{Error, QueryExecutor, Result};

/// SQLSTATE for `query_canceled` (raised by `statement_timeout`).
const QUERY_CANCELED: &str = "57014";

/// SQLSTATE for `read_only_sql_transaction`.
const READ_ONLY_VIOLATION: &str = "25006";

/// Extra client-side allowance over the server-side statement timeout.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// Runs statements inside a `READ ONLY` transaction with a
/// transaction-local `statement_timeout`, returning rows as JSON objects.
#[derive(Clone)]
pub struct PgQueryExecutor {
    pool: Pool<Postgres>,
}

impl PgQueryExecutor {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn map_error(e: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref db) = e {
            match db.code().as_deref() {
                Some(QUERY_CANCELED) => {
                    return Error::Timeout(format!("Statement cancelled: {}", db.message()))
                }
                Some(READ_ONLY_VIOLATION) => {
                    return Error::Query(format!("Write attempted in read-only query: {}", db.message()))
                }
                _ => {}
            }
        }
        Error::Query(e.to_string())
    }

    async fn run(&self, sql: &str, timeout: Duration) -> Result<Vec<JsonValue>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(Self::map_error)?;

        // SET cannot take bind parameters; the value is a plain integer.
        let set_timeout = format!(
            "SET LOCAL statement_timeout = {}",
            timeout.as_millis().max(1)
        );
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_error)?;

        let wrapped = format!("SELECT row_to_json(q) AS row FROM ({}) AS q", sql);
        let rows = sqlx::query(&wrapped)
            .fetch_all(&mut *tx)
            .await
            .map_err(Self::map_error)?;

        tx.rollback().await.map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| row.try_get::<JsonValue, _>("row").map_err(Self::map_error))
            .collect()
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<Vec<JsonValue>> {
        let start = Instant::now();
        let rows = tokio::time::timeout(timeout + CLIENT_TIMEOUT_GRACE, self.run(sql, timeout))
            .await
            .map_err(|_| Error::Timeout(format!("Query exceeded {}ms", timeout.as_millis())))??;

        debug!(
            subsystem = "database",
            component = "query_executor",
            op = "execute",
            result_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Executed search query"
        );
        Ok(rows)
    }
}
