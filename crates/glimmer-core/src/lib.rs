//! # glimmer-core
//!
//! Core types, traits, and abstractions for glimmer.
//!
//! This crate provides the foundational data structures and collaborator
//! traits that the inference, cache, jobs and search crates depend on.

pub mod clock;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

/// Generate a time-ordered UUIDv7 identifier.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}

/// Read an environment variable and parse it, falling back to `default`.
///
/// Unparseable values are logged and ignored.
pub fn env_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Ignoring unparseable environment value");
                default
            }
        },
        Err(_) => default,
    }
}
