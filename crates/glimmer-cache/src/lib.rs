//! # glimmer-cache
//!
//! Subject-partitioned cache for AI results.
//!
//! Entries are keyed by a hash of `(subject, operation kind, canonical input)`
//! and expire after a per-kind TTL. Concurrent misses for one key share a
//! single generation, and a failing backing store degrades to "always miss"
//! rather than failing requests.

pub mod cache;
pub mod canonical;
pub mod ttl;

pub use cache::{CacheLookup, CacheStats, ResultCache};
pub use canonical::{cache_key, canonical_json};
pub use ttl::TtlTable;
