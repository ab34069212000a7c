//! Shared handler state.

use std::sync::Arc;

use glimmer_cache::ResultCache;
use glimmer_db::FilesystemObjectStore;
use glimmer_jobs::JobQueue;
use glimmer_search::SearchService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub search: SearchService,
    pub queue: Arc<JobQueue>,
    /// Upload target for photos awaiting analysis.
    pub photos: Arc<FilesystemObjectStore>,
    pub cache: ResultCache,
}

impl AppState {
    pub fn new(
        search: SearchService,
        queue: Arc<JobQueue>,
        photos: Arc<FilesystemObjectStore>,
        cache: ResultCache,
    ) -> Self {
        Self {
            search,
            queue,
            photos,
            cache,
        }
    }
}
