//! Server configuration from environment variables.

use std::path::PathBuf;

use axum::http::HeaderValue;
use tracing::warn;

use glimmer_core::defaults;

/// HTTP server settings.
///
/// | Variable | Default |
/// |----------|---------|
/// | `DATABASE_URL` | `postgres://localhost/glimmer` |
/// | `HOST` | `0.0.0.0` |
/// | `PORT` | `3000` |
/// | `OBJECT_STORE_PATH` | `/var/lib/glimmer/objects` |
/// | `MAX_BODY_SIZE_BYTES` | 16 MB |
/// | `ALLOWED_ORIGINS` | `http://localhost:3000` (comma-separated) |
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub object_store_path: PathBuf,
    pub max_body_bytes: usize,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/glimmer".to_string(),
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            object_store_path: PathBuf::from("/var/lib/glimmer/objects"),
            max_body_bytes: defaults::MAX_BODY_SIZE_BYTES,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let fallback = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(fallback.database_url),
            host: std::env::var("HOST").unwrap_or(fallback.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback.port),
            object_store_path: std::env::var("OBJECT_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(fallback.object_store_path),
            max_body_bytes: std::env::var("MAX_BODY_SIZE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback.max_body_bytes),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|v| split_origins(&v))
                .unwrap_or(fallback.allowed_origins),
        }
    }

    /// `host:port` for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Allowed origins as header values. Unparseable entries are skipped.
    pub fn origin_headers(&self) -> Vec<HeaderValue> {
        self.allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(subsystem = "api", origin = %origin, error = %e, "Invalid CORS origin");
                    None
                }
            })
            .collect()
    }
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_origins_skips_blanks() {
        assert_eq!(
            split_origins(" https://glimmer.shop, ,http://localhost:5173 ,"),
            vec!["https://glimmer.shop", "http://localhost:5173"]
        );
    }

    #[test]
    fn test_invalid_origin_is_dropped() {
        let config = ServerConfig {
            allowed_origins: vec!["https://ok.example".to_string(), "bad\norigin".to_string()],
            ..Default::default()
        };
        assert_eq!(config.origin_headers().len(), 1);
    }

    #[test]
    fn test_bind_address() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }
}
