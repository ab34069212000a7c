//! # glimmer-search
//!
//! Natural-language product search for glimmer.
//!
//! This crate provides:
//! - Translation of free-text queries into candidate SQL via the retrying invoker
//! - AST-based validation against a fixed table/column allowlist
//! - A search service that only executes validated, confident queries and
//!   falls back to a bounded listing otherwise
//!
//! ## Example
//!
//! ```ignore
//! use glimmer_search::{SchemaAllowlist, SearchConfig, SearchService};
//!
//! let service = SearchService::new(
//!     invoker,
//!     Arc::new(db.query_executor()),
//!     Arc::new(SchemaAllowlist::catalog()),
//!     SearchConfig::from_env(),
//! );
//! let outcome = service.search("fragrance-free moisturizer under $30", None).await;
//! ```

pub mod allowlist;
pub mod service;
pub mod translator;
pub mod validator;

pub use allowlist::{fallback_listing_sql, SchemaAllowlist};
pub use service::{FallbackReason, SearchConfig, SearchOutcome, SearchService, SearchSource, SearchStats};
pub use translator::{QueryMetadata, QueryTranslator, Translation, SEARCH_CACHE_SUBJECT};
pub use validator::{QueryPlan, QueryValidator, Rejection, RejectionRule};
