//! PostgreSQL connection pool.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use glimmer_core::{defaults, env_or, Error, Result};

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Maximum wait for a connection from the pool.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            min_connections: defaults::DB_MIN_CONNECTIONS,
            acquire_timeout: Duration::from_secs(defaults::DB_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::DB_IDLE_TIMEOUT_SECS),
            max_lifetime: Duration::from_secs(defaults::DB_MAX_LIFETIME_SECS),
        }
    }
}

impl PoolConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DATABASE_MAX_CONNECTIONS` | `10` |
    /// | `DATABASE_MIN_CONNECTIONS` | `1` |
    /// | `DATABASE_ACQUIRE_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Self {
        Self::default()
            .max_connections(env_or("DATABASE_MAX_CONNECTIONS", defaults::DB_MAX_CONNECTIONS))
            .min_connections(env_or("DATABASE_MIN_CONNECTIONS", defaults::DB_MIN_CONNECTIONS))
            .acquire_timeout(Duration::from_secs(env_or(
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                defaults::DB_ACQUIRE_TIMEOUT_SECS,
            )))
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    /// Clamped to `max_connections` when the pool is built.
    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Connect a pool with explicit settings.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

/// Connect a pool with [`PoolConfig::from_env`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::from_env()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = PoolConfig::default()
            .max_connections(20)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(60));

        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.max_lifetime, Duration::from_secs(defaults::DB_MAX_LIFETIME_SECS));
    }

    #[test]
    fn test_max_connections_never_zero() {
        assert_eq!(PoolConfig::default().max_connections(0).max_connections, 1);
    }
}
