//! veriface-core — face detection, embedding extraction and matching.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running
//! via ONNX Runtime for CPU inference. The [`Embedder`] trait is the contract
//! the rest of the system programs against; [`OnnxEmbedder`] is its
//! production implementation.

pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use embedder::{
    EmbedError, EmbedOutcome, Embedder, OnnxEmbedder, DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE,
};
pub use matcher::{Matcher, ScanMatcher};
pub use types::{
    Embedding, FaceBox, IndexEntry, MatchResult, DEFAULT_MATCH_THRESHOLD, EMBEDDING_DIM,
    EMBEDDING_SCHEME,
};

use std::path::PathBuf;

/// Default directory for the ONNX model files: `$XDG_DATA_HOME/veriface/models`
/// (falling back to `~/.local/share/veriface/models`).
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("veriface/models")
}
