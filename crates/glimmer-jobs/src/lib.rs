//! # glimmer-jobs
//!
//! Background job queue for glimmer.
//!
//! This crate provides:
//! - Durable enqueue with per-job attempt budgets and delays
//! - A bounded worker pool with a pool-wide start-rate limit
//! - Exponential retry backoff that honours provider retry hints
//! - Graceful shutdown with a deadline, stalled-job recovery and retention purge
//! - Worker events via a broadcast channel
//!
//! ## Example
//!
//! ```ignore
//! use glimmer_jobs::{JobOptions, JobQueue, WorkerConfig};
//!
//! let queue = JobQueue::new(store, WorkerConfig::from_env());
//! queue.register_handler(photo_handler).await;
//! queue.start().await?;
//!
//! let handle = queue
//!     .enqueue(OperationKind::PhotoAnalysis, payload, JobOptions::default())
//!     .await?;
//! let state = queue.status(handle.id).await?;
//!
//! queue.shutdown().await?;
//! ```

pub mod adapters;
pub mod handler;
pub mod queue;
pub mod worker;

pub use adapters::{PhotoAnalysisHandler, PhotoAnalysisPayload};
pub use handler::{JobContext, JobHandler, JobResult};
pub use queue::{JobHandle, JobOptions, JobQueue};
pub use worker::{WorkerConfig, WorkerEvent};
