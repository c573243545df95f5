use crate::engine::EngineHandle;
use std::sync::Arc;
use veriface_store::{FaceIndex, GalleryStore};

/// Shared application state handed to every request handler.
pub struct AppState {
    /// Durable gallery (image files + embedding cache).
    pub store: Arc<GalleryStore>,
    /// Published face index snapshots.
    pub index: Arc<FaceIndex>,
    /// Handle to the embedder engine thread.
    pub engine: EngineHandle,
    /// Default match threshold; requests may override it.
    pub match_threshold: f32,
}

impl AppState {
    pub fn new(
        store: Arc<GalleryStore>,
        index: Arc<FaceIndex>,
        engine: EngineHandle,
        match_threshold: f32,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            index,
            engine,
            match_threshold,
        })
    }
}
