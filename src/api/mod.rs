pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::artifacts::ArtifactStore;
use crate::serving::ModelHandle;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub model: ModelHandle,
    pub store: ArtifactStore,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(model: ModelHandle, store: ArtifactStore) -> Self {
        Self {
            model,
            store,
            started_at: Instant::now(),
        }
    }
}
