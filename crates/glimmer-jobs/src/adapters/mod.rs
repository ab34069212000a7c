//! Job handlers for AI-backed operation kinds.

pub mod photo_analysis;

pub use photo_analysis::{PhotoAnalysisHandler, PhotoAnalysisPayload};
