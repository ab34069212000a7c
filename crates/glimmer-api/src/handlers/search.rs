//! Natural-language product search.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use glimmer_search::{SearchOutcome, SearchStats};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    /// Shopper segment passed to the model as a hint.
    #[serde(default)]
    pub segment: Option<String>,
}

/// Always answers 200; failures surface as a fallback listing.
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Json<SearchOutcome> {
    Json(
        state
            .search
            .search(&body.query, body.segment.as_deref())
            .await,
    )
}

pub async fn search_stats(State(state): State<AppState>) -> Json<SearchStats> {
    Json(state.search.stats())
}
